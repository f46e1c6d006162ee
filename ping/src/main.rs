use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use ping::clock::SystemClock;
use ping::config::Args;
use ping::coordinator;
use ping::shutdown::Shutdown;
use tracing::{error, info, Level};
use transport::MulticastTransport;

#[tokio::main]
pub async fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            // --help and --version are reported as 'errors' by clap
            return if e.use_stderr() { ExitCode::FAILURE } else { ExitCode::SUCCESS };
        }
    };

    let level = match (args.verbose, args.very_verbose) {
        (_, true) => Level::TRACE,
        (true, _) => Level::DEBUG,
        (false, false) => Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_thread_ids(true)
        .try_init()
        .ok();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let (ping_config, transport_config) = args.to_configs()?;

    let transport = MulticastTransport::bind(transport_config, ping_config.role.transport_direction()).await
        .context("error creating transport")?;
    info!("transport session {} bound", transport.tsi());

    let shutdown = Shutdown::new();
    let ctrl_c_shutdown = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupted");
                ctrl_c_shutdown.trigger();
            }
            Err(e) => error!("error listening for Ctrl-C: {}", e),
        }
    });

    coordinator::run(Arc::new(ping_config), Arc::new(transport), Arc::new(SystemClock), shutdown).await?;
    Ok(())
}
