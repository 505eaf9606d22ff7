use clap::Parser;
use push_mtr::conf::{read_conf, Args};
use push_mtr::probe::Probe;
use std::process;
use tracing::{error, info};

const LOG_LEVEL: tracing::Level = tracing::Level::INFO;

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let level = if args.debug {
        tracing::Level::DEBUG
    } else {
        LOG_LEVEL
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    info!("Starting push-mtr");
    let settings = match read_conf(args).await {
        Ok(settings) => settings,
        Err(e) => {
            error!("Invalid configuration: {:#}", e);
            process::exit(exitcode::CONFIG);
        }
    };

    let probe = match Probe::from_settings(&settings).await {
        Ok(probe) => probe,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            process::exit(exitcode::CONFIG);
        }
    };

    match settings.repeat {
        Some(period) => probe.run_every(period).await,
        None => match probe.run_once().await {
            Ok(_) => process::exit(exitcode::OK),
            Err(e) => {
                error!("Report cycle fail, err:{}", e);
                process::exit(e.exit_code());
            }
        },
    }
}
