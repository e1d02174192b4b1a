#![deny(warnings)]

use {
    anyhow::{anyhow, Result},
    clap::Parser,
    sockets_client::{ClientConfig, ReceiveOutcome},
    std::env,
    tracing::log::{self, LevelFilter},
};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let mut logger = pretty_env_logger::formatted_builder();
    logger.filter_level(LevelFilter::Info);
    if let Ok(filters) = env::var("RUST_LOG") {
        logger.parse_filters(&filters);
    }
    logger.init();

    let config = ClientConfig::parse();

    log::info!("connecting to {}:{}", config.host, config.port);

    let report = sockets_client::run(&config).await.map_err(|e| match e.code() {
        Some(code) => anyhow!(e).context(format!("error code {code}")),
        None => anyhow!(e),
    })?;

    match &report.received {
        Ok(ReceiveOutcome::Data(data)) => {
            log::info!("received {} bytes from {}", data.len(), report.peer);
            println!("{}", String::from_utf8_lossy(data));
        }
        Ok(ReceiveOutcome::PeerClosed) => log::info!("{} closed the connection", report.peer),
        Err(e) => log::error!("{e}"),
    }

    if let Err(e) = &report.half_close {
        log::error!("{e}");
    }

    Ok(())
}
