use anyhow::{Context, Result};
use std::sync::Arc;

use lib_telemetry::downstream::{self, DownstreamState};
use lib_telemetry::ingestors::{MockFrameSource, SerialFrameSource};
use lib_telemetry::{BroadcastHub, FrameSource, IngestionLoop, ShutdownCoordinator, StartupError, open_sink};

mod telemetry_logic;
use telemetry_logic::config::{self, Settings, SourceKind};
use telemetry_logic::{logger, workers};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let loaded = config::load_config()?;
    let settings = loaded.settings;
    let _log_guard = logger::setup_logging(&settings.log_dir, &settings.log_level)?;
    for note in &loaded.notes {
        tracing::info!("{}", note);
    }

    let shutdown = ShutdownCoordinator::new();
    let interrupt_handle = shutdown.listen_for_interrupt();

    // Startup failures are fatal: nothing below runs without a source, a store and a socket.
    let mut source = open_source(&settings).await.context("Failed to open the frame source")?;
    let mut sink = match open_sink(&settings.storage_url, &settings.storage_table).await {
        Ok(sink) => sink,
        Err(e) => {
            source.close().await;
            return Err(anyhow::Error::from(e).context("Failed to open storage"));
        }
    };
    let listener = match downstream::bind(&settings.bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            source.close().await;
            sink.close().await;
            return Err(anyhow::Error::from(e).context("Failed to start the subscriber server"));
        }
    };

    let hub = Arc::new(BroadcastHub::new(settings.hub.clone()));
    tracing::info!(
        "Broadcasting with ElectricityUsage {}",
        if settings.hub.include_electricity_usage { "included" } else { "omitted" }
    );

    let downstream_state = DownstreamState {
        hub: hub.clone(),
        shutdown: shutdown.clone(),
        send_timeout: settings.send_timeout,
    };
    // Whichever worker ends first, for whatever reason, stops the other one.
    let downstream_handle = workers::spawn_supervised(
        "Downstream",
        shutdown.clone(),
        downstream::serve(listener, downstream_state),
    );
    let ingestion_handle = workers::spawn_supervised(
        "Ingestion",
        shutdown.clone(),
        IngestionLoop::new(source, sink, hub, shutdown.clone(), settings.poll_interval)
            .with_append_timeout(settings.append_timeout)
            .run(),
    );

    let (downstream_result, ingestion_result) = tokio::join!(downstream_handle, ingestion_handle);

    match downstream_result {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => tracing::error!("Downstream server failed: {}", e),
        Ok(Err(e)) | Err(e) => tracing::error!("Downstream task panicked: {}", e),
    }
    match ingestion_result {
        Ok(Ok(stats)) => tracing::info!("Ingestion summary: {:?}", stats),
        Ok(Err(e)) | Err(e) => tracing::error!("Ingestion task panicked: {}", e),
    }

    shutdown.signal();
    let _ = interrupt_handle.await;

    tracing::info!("Shutdown complete.");
    Ok(())
}

async fn open_source(settings: &Settings) -> Result<Box<dyn FrameSource>> {
    match settings.source {
        SourceKind::Serial => {
            let source = SerialFrameSource::open(&settings.serial).await.map_err(StartupError::from)?;
            Ok(Box::new(source))
        }
        SourceKind::Mock => {
            tracing::info!(
                "Using mock feed, one reading every {} ms",
                settings.mock_interval.as_millis()
            );
            Ok(Box::new(MockFrameSource::new(settings.mock_interval, settings.mock_seed)))
        }
    }
}
