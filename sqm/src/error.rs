//! Errors surfaced by controllers and startup.

use std::fmt;

use crate::rates::QueryError;
use crate::state::Direction;

/// A fact published into the [`SharedState`](crate::state::SharedState) that controllers wait
/// on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dependency {
    /// The physical device has been looked up.
    RootDevice,
    /// The ifb device exists.
    IfbDevice,
    /// A non-zero ingress rate has been read from the modem.
    IngressRate,
    /// A non-zero egress rate has been read from the modem.
    EgressRate,
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::RootDevice => "root device",
            Self::IfbDevice => "ifb device",
            Self::IngressRate => "ingress rate",
            Self::EgressRate => "egress rate",
        };
        f.write_str(s)
    }
}

/// Errors surfaced by controllers and by startup.
///
/// Everything except [`Error::Startup`] is contained by the manager: logged against the
/// controller that returned it and retried on the next tick.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A dependency hasn't been published yet.
    #[error("{0} not yet ready")]
    NotReady(Dependency),

    /// A device that should already exist couldn't be found.
    #[error("error retrieving device {name}: {source}")]
    Lookup {
        /// Interface name.
        name: String,
        /// Lookup failure.
        #[source]
        source: sqm_netlink::Error,
    },

    /// The kernel rejected a configuration request.
    #[error("{context}: {source}")]
    Configuration {
        /// What was being attempted.
        context: &'static str,
        /// Kernel error.
        #[source]
        source: sqm_netlink::Error,
    },

    /// A published rate is too large to program as a CAKE bandwidth.
    #[error("{direction:?} rate of {rate} kbit/s is out of range")]
    RateOutOfRange {
        /// Direction being shaped.
        direction: Direction,
        /// Rate in kbit/s.
        rate: i64,
    },

    /// The modem couldn't be queried.
    #[error(transparent)]
    RateQuery(#[from] QueryError),

    /// The process can't start at all.
    #[error("{context}: {source}")]
    Startup {
        /// What was being attempted.
        context: &'static str,
        /// Underlying failure.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl Error {
    /// Returns a closure wrapping a kernel error as [`Error::Configuration`], for `map_err`.
    pub(crate) fn configuration(context: &'static str) -> impl FnOnce(sqm_netlink::Error) -> Self {
        move |source| Self::Configuration { context, source }
    }

    /// Returns a closure wrapping any error as [`Error::Startup`], for `map_err`.
    pub fn startup<E>(context: &'static str) -> impl FnOnce(E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        move |source| Self::Startup { context, source: Box::new(source) }
    }

    /// Whether this error only means "try again later".
    pub fn is_not_ready(&self) -> bool {
        matches!(self, Self::NotReady(_))
    }
}

/// Result type for controller operations.
pub type Result<T> = std::result::Result<T, Error>;
