//! The `sqm` daemon.

use std::{process::ExitCode, sync::Arc};

use clap::{Parser, error::ErrorKind};
use sqm::{Error, Manager, Options, rates::SnmpRateSource, register_controllers};
use sqm_netlink::{Netlink, RtNetlink};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let options = match Options::try_parse() {
        Ok(options) => options,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = e.print();
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            let _ = e.print();
            return ExitCode::FAILURE;
        }
    };

    match run(options).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(err = %e, "sqm failed to start");
            ExitCode::FAILURE
        }
    }
}

async fn run(options: Options) -> Result<(), Error> {
    let netlink: Arc<dyn Netlink> =
        Arc::new(RtNetlink::connect().map_err(Error::startup("failed to open netlink socket"))?);

    let rates = SnmpRateSource::new(
        &options.snmp_host,
        options.ingress_oid.clone(),
        options.egress_oid.clone(),
    )
    .with_community(options.community.as_bytes())
    .with_timeout(options.snmp_timeout());

    tracing::info!(
        interface = %options.interface,
        snmp = rates.target(),
        ingress_oid = %options.ingress_oid,
        egress_oid = %options.egress_oid,
        "starting sqm"
    );

    let mut manager = Manager::new();
    register_controllers(&mut manager, &options, netlink, Box::new(rates));

    manager.run_until_signal().await
}
