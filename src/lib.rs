pub mod api;
pub mod channels;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod modbus;
pub mod mqtt;
pub mod options;
pub mod prelude;
pub mod scheduler;
pub mod stats;

const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

use crate::prelude::*;

use crate::coordinator::Coordinator;
use crate::mqtt::Mqtt;
use crate::scheduler::Scheduler;
use std::error::Error;
use std::sync::Arc;

/// Holds the long-running components for coordinated shutdown.
#[derive(Clone)]
pub struct Components {
    pub coordinator: Arc<Coordinator>,
    pub scheduler: Arc<Scheduler>,
    pub mqtt: Arc<Mqtt>,
    pub channels: Channels,
}

impl Components {
    /// Coordinator first so no new commands are produced, then MQTT. The
    /// scheduler exits on the same shutdown broadcast the MQTT stop sends.
    pub async fn stop(&self) {
        info!("Stopping all components...");

        self.coordinator.stop();
        let _ = self.mqtt.stop().await;

        info!("Shutdown complete");
    }
}

fn init_logger(level: &str) -> env_logger::Builder {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level));
    builder
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {} {}] {}",
                chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                record.level(),
                record.module_path().unwrap_or(""),
                record.args()
            )
        })
        .write_style(env_logger::WriteStyle::Never);
    builder
}

pub async fn app(
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let options = Options::new();
    let config_file = options.config_file.clone();

    // Logging starts at info so config loading is visible; once the config
    // is parsed the level is re-applied from it.
    init_logger("info").init();

    info!(
        "lumentree-bridge {} starting with config file: {}",
        CARGO_PKG_VERSION, config_file
    );

    let config = ConfigWrapper::new(options.config_file).unwrap_or_else(|err| {
        error!("Failed to load config: {:?}", err);
        std::process::exit(255);
    });

    if let Err(err) = init_logger(&config.loglevel()).try_init() {
        error!("Failed to update log level: {}", err);
    }

    info!("Initializing channels...");
    let channels = Channels::new();

    info!("Initializing components...");

    let coordinator = Coordinator::new(config.clone(), channels.clone())?;
    let coordinator_clone = coordinator.clone();
    let coordinator_handle = tokio::spawn(async move {
        if let Err(e) = coordinator_clone.start().await {
            error!("Coordinator task failed: {}", e);
        }
    });

    let scheduler = Scheduler::new(config.clone(), channels.clone());
    let scheduler_clone = scheduler.clone();
    let scheduler_handle = tokio::spawn(async move {
        if let Err(e) = scheduler_clone.start().await {
            error!("Scheduler task failed: {}", e);
        }
    });

    let mqtt = Mqtt::new(config.clone(), channels.clone());
    let mqtt_clone = mqtt.clone();
    let mqtt_handle = tokio::spawn(async move {
        if let Err(e) = mqtt_clone.start().await {
            error!("MQTT task failed: {}", e);
        }
    });

    let components = Components {
        coordinator: Arc::new(coordinator),
        scheduler: Arc::new(scheduler),
        mqtt: Arc::new(mqtt),
        channels: channels.clone(),
    };

    info!("Components started");

    match options.runtime {
        Some(secs) => {
            tokio::select! {
                _ = shutdown_rx.recv() => {}
                _ = tokio::time::sleep(std::time::Duration::from_secs(secs)) => {
                    info!("runtime limit of {}s reached", secs);
                }
            }
        }
        None => {
            let _ = shutdown_rx.recv().await;
        }
    }

    info!("Shutdown signal received, stopping components...");

    components.stop().await;

    if let Err(e) = coordinator_handle.await {
        error!("Error waiting for coordinator task: {}", e);
    }
    if let Err(e) = scheduler_handle.await {
        error!("Error waiting for scheduler task: {}", e);
    }
    if let Err(e) = mqtt_handle.await {
        error!("Error waiting for MQTT task: {}", e);
    }

    info!("Application shutdown complete");
    Ok(())
}
