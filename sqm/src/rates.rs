//! Where line rates come from.
//!
//! The modem advertises its synchronised downstream and upstream rates in kbit/s. The
//! [`RateSource`] trait is the seam the [`RatePoller`](crate::controller::RatePoller) reads
//! through; [`SnmpRateSource`] is the production implementation.

use std::{fmt, io, str::FromStr, time::Duration};

use async_trait::async_trait;
use snmp::{SyncSession, Value};

/// Default OID for the ingress (downstream) rate. VDSL2 line attainable rate on Zyxel modems.
pub const DEFAULT_INGRESS_OID: &str = "1.3.6.1.2.1.10.97.1.1.2.1.10.1";
/// Default OID for the egress (upstream) rate.
pub const DEFAULT_EGRESS_OID: &str = "1.3.6.1.2.1.10.97.1.1.2.1.10.2";

const SNMP_PORT: u16 = 161;

/// A numeric SNMP object identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Oid(Vec<u32>);

impl Oid {
    /// The arcs, outermost first.
    pub fn components(&self) -> &[u32] {
        &self.0
    }
}

/// Returned when a string isn't a dotted OID with at least two arcs.
#[derive(Debug, thiserror::Error)]
#[error("invalid OID {0:?}")]
pub struct ParseOidError(String);

impl FromStr for Oid {
    type Err = ParseOidError;

    /// Parses dotted notation. A leading dot is accepted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.strip_prefix('.').unwrap_or(s);
        let components = trimmed
            .split('.')
            .map(str::parse::<u32>)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| ParseOidError(s.to_string()))?;

        // X.690 requires at least two arcs.
        if components.len() < 2 {
            return Err(ParseOidError(s.to_string()));
        }

        Ok(Self(components))
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for component in &self.0 {
            if !first {
                f.write_str(".")?;
            }
            write!(f, "{component}")?;
            first = false;
        }
        Ok(())
    }
}

/// A pair of line rates, in kbit/s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rates {
    /// Downstream rate.
    pub ingress: i64,
    /// Upstream rate.
    pub egress: i64,
}

/// A failed rate query.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// The UDP socket couldn't be set up.
    #[error("cannot connect to SNMP host {host}: {source}")]
    Connect {
        /// `host:port` being queried.
        host: String,
        /// Socket error.
        #[source]
        source: io::Error,
    },

    /// The agent didn't answer, or answered with an error.
    ///
    /// `snmp::SnmpError` has no `Display`, so its debug form is kept.
    #[error("cannot read SNMP oid {oid}: {reason}")]
    Get {
        /// Requested object.
        oid: Oid,
        /// Debug form of the SNMP error.
        reason: String,
    },

    /// The agent answered with something that isn't an integer rate.
    #[error("unexpected value for SNMP oid {oid}: {value}")]
    UnexpectedValue {
        /// Requested object.
        oid: Oid,
        /// Debug form of the value.
        value: String,
    },

    /// The blocking query task panicked or was cancelled.
    #[error("rate query task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Something that can report the current line rates.
#[async_trait]
pub trait RateSource: fmt::Debug + Send + Sync + 'static {
    /// Fetch both rates. Either both are returned or neither is.
    async fn query(&self) -> Result<Rates, QueryError>;
}

/// Reads both rates from an SNMPv2c agent.
#[derive(Debug, Clone)]
pub struct SnmpRateSource {
    /// `host:port`.
    target: String,
    community: Vec<u8>,
    timeout: Duration,
    ingress_oid: Oid,
    egress_oid: Oid,
}

impl SnmpRateSource {
    /// Query `host`, on port 161 unless one is given.
    pub fn new(host: &str, ingress_oid: Oid, egress_oid: Oid) -> Self {
        let target =
            if host.contains(':') { host.to_string() } else { format!("{host}:{SNMP_PORT}") };

        Self {
            target,
            community: b"public".to_vec(),
            timeout: Duration::from_secs(5),
            ingress_oid,
            egress_oid,
        }
    }

    /// Set the SNMPv2c community string.
    pub fn with_community(mut self, community: impl Into<Vec<u8>>) -> Self {
        self.community = community.into();
        self
    }

    /// Set how long to wait for each response.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The `host:port` being queried.
    pub fn target(&self) -> &str {
        &self.target
    }

    fn query_blocking(&self) -> Result<Rates, QueryError> {
        let mut session =
            SyncSession::new(self.target.as_str(), &self.community, Some(self.timeout), 0)
                .map_err(|source| QueryError::Connect { host: self.target.clone(), source })?;

        let ingress = get_rate(&mut session, &self.ingress_oid)?;
        let egress = get_rate(&mut session, &self.egress_oid)?;

        Ok(Rates { ingress, egress })
    }
}

#[async_trait]
impl RateSource for SnmpRateSource {
    async fn query(&self) -> Result<Rates, QueryError> {
        let source = self.clone();
        tokio::task::spawn_blocking(move || source.query_blocking()).await?
    }
}

fn get_rate(session: &mut SyncSession, oid: &Oid) -> Result<i64, QueryError> {
    let mut response = session
        .get(oid.components())
        .map_err(|e| QueryError::Get { oid: oid.clone(), reason: format!("{e:?}") })?;

    match response.varbinds.next() {
        Some((_, value)) => value_as_rate(&value).ok_or_else(|| QueryError::UnexpectedValue {
            oid: oid.clone(),
            value: format!("{value:?}"),
        }),
        None => Err(QueryError::UnexpectedValue { oid: oid.clone(), value: "no varbinds".into() }),
    }
}

/// Integer-like SNMP values as a rate. Timeticks are a duration and don't count.
fn value_as_rate(value: &Value<'_>) -> Option<i64> {
    match *value {
        Value::Integer(v) => Some(v),
        Value::Counter32(v) | Value::Unsigned32(v) => Some(i64::from(v)),
        Value::Counter64(v) => i64::try_from(v).ok(),
        _ => None,
    }
}
