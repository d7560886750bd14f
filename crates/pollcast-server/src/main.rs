// pollcast server entry point.
//
// Startup sequence:
// 1. Load config (copying defaults on first run)
// 2. Initialize tracing
// 3. Create mpsc channels
// 4. Bind the listener and spawn the WebSocket server task
// 5. Spawn the coordinator task
// 6. Wait for Ctrl+C or a task failure
// 7. Cleanup on exit

use pollcast_app::coordinator::{self, ControlCommand, Coordinator};
use pollcast_core::ws_server;
use pollcast_server::config::{self, LoggingConfig};

use anyhow::Context;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load config
    let config = config::load_config().context("failed to load configuration")?;

    // 2. Initialize tracing
    init_tracing(&config.logging)?;
    info!("pollcast starting up");
    info!(
        "Config loaded: listen_addr={}, subscriber_buffer={}",
        config.listen_addr, config.subscriber_buffer
    );

    // 3. Create mpsc channels
    let (ws_tx, ws_rx) = mpsc::channel(256);
    let (cmd_tx, cmd_rx) = mpsc::channel(16);

    // 4. Bind and spawn the WebSocket server
    let listener = ws_server::TungsteniteListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    let local_addr = listener.local_addr()?;
    let buffer = config.subscriber_buffer;
    let mut ws_handle = tokio::spawn(async move {
        if let Err(e) = ws_server::run(listener, ws_tx, buffer).await {
            error!("WebSocket server error: {:#}", e);
        }
    });

    // 5. Spawn the coordinator
    let mut app_handle = tokio::spawn(async move {
        if let Err(e) = coordinator::run(ws_rx, cmd_rx, Coordinator::new()).await {
            error!("Coordinator error: {}", e);
        }
    });

    info!("Listening for WebSocket connections on ws://{}", local_addr);

    // 6. Run until Ctrl+C or either task stops on its own
    let coordinator_running = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for Ctrl+C")?;
            info!("Ctrl+C received, shutting down");
            true
        }
        _ = &mut ws_handle => {
            error!("WebSocket server stopped, no new clients can connect; shutting down");
            true
        }
        _ = &mut app_handle => {
            error!("Coordinator exited unexpectedly");
            false
        }
    };

    // 7. Cleanup
    if coordinator_running {
        let _ = cmd_tx.send(ControlCommand::Shutdown).await;
        if tokio::time::timeout(Duration::from_secs(5), &mut app_handle)
            .await
            .is_err()
        {
            error!("Coordinator did not stop in time");
            app_handle.abort();
        }
    }
    ws_handle.abort();

    info!("pollcast shut down cleanly");
    Ok(())
}

/// Initialize tracing. `RUST_LOG` takes precedence over the configured
/// filter; output goes to `<log_dir>/pollcast.log` when a log dir is set.
fn init_tracing(logging: &LoggingConfig) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::fmt::writer::BoxMakeWriter;
    use tracing_subscriber::EnvFilter;

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&logging.filter)
            .with_context(|| format!("invalid log filter `{}`", logging.filter))?,
    };

    let (writer, to_file) = match &logging.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create log dir {}", dir.display()))?;
            let log_file = std::fs::File::create(dir.join("pollcast.log"))?;
            (BoxMakeWriter::new(log_file), true)
        }
        None => (BoxMakeWriter::new(std::io::stdout), false),
    };

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(!to_file)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
