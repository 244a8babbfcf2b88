use std::{path::PathBuf, sync::Arc};

use ::tracing::{error, info};
use blob_store::{S3Credentials, S3Storage};
use clap::Parser;

mod config;
mod deadline;
mod event;
mod gunzip;
mod handler;
mod task;
mod tracing;
use tracing::setup_tracing;
#[cfg(test)]
mod testing;

use config::RelayConfig;
use event::NotificationEvent;
use handler::BatchRunner;

#[derive(Parser)]
#[command(version, about = "Streams .gz objects from object storage through gunzip into a destination bucket", long_about = None)]
struct Cli {
    /// Path to the notification event JSON, or "-" for stdin
    #[arg(value_name = "event file")]
    event: PathBuf,
    #[arg(short, long, value_name = "config file", help = "Path to config file")]
    config: Option<PathBuf>,
}

fn read_event(path: &PathBuf) -> anyhow::Result<NotificationEvent> {
    let raw = if path.as_os_str() == "-" {
        std::io::read_to_string(std::io::stdin())?
    } else {
        std::fs::read_to_string(path)?
    };
    NotificationEvent::from_json(&raw)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match RelayConfig::load(cli.config.as_deref().and_then(|p| p.to_str())) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("invalid configuration: {err:#}");
            std::process::exit(2);
        }
    };
    setup_tracing(&config);

    let event = match read_event(&cli.event) {
        Ok(event) => event,
        Err(err) => {
            error!("unreadable event payload: {err:#}");
            std::process::exit(2);
        }
    };

    let storage = Arc::new(S3Storage::new(
        S3Credentials {
            access_key_id: config.secret_id.clone(),
            secret_access_key: config.secret_key.clone(),
        },
        config.endpoint.clone(),
    ));

    let runner = BatchRunner::new(config, storage);
    let summary = match runner.run(&event).await {
        Ok(summary) => summary,
        Err(err) => {
            error!("invocation failed before any task ran: {err:#}");
            std::process::exit(2);
        }
    };

    match summary.into_result() {
        Ok(message) => {
            info!("all objects transferred");
            println!("{message}");
        }
        Err(err) => {
            error!("{err}");
            std::process::exit(1);
        }
    }
}
