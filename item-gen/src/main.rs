//! Item Gen Main Entry Point
//!
//! Consumes generation requests from Kafka, runs the requested stactools
//! transformation and relays the produced items onto the load channel.

use dotenv::dotenv;
use item_gen::{Dependencies, ServiceError};
use std::env;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing/logging.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("item_gen=info,stac_ingest_queue=info"));

    let json = env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json"));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(true).pretty())
            .init();
    }

    info!(
        service_name = "item-gen",
        service_version = env!("CARGO_PKG_VERSION"),
        json_format = json,
        "Tracing initialized"
    );
}

#[tokio::main]
async fn main() -> Result<(), ServiceError> {
    // Load environment variables from .env file
    dotenv().ok();

    init_tracing();

    info!("Starting item generation stage");

    let deps = match Dependencies::new() {
        Ok(deps) => {
            info!("Dependencies initialized successfully");
            deps
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize dependencies");
            return Err(e);
        }
    };

    match deps.worker.run().await {
        Ok(()) => {
            info!("Item generation stage stopped");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Item generation stage failed");
            Err(e.into())
        }
    }
}
