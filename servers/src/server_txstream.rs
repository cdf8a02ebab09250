use anyhow::Result;
use tokio::signal;

use lib_common::core::connection_manager::ConnectionManager;
use lib_common::decoders::JsonParsedDecoder;
use lib_common::ingestors::HeliusWssConnector;

mod txstream_logic;
use txstream_logic::{config, logger, sink::LogSink};

#[tokio::main]
async fn main() -> Result<()> {
    // Explicitly install the default crypto provider for rustls
    let _ = rustls::crypto::ring::default_provider().install_default();

    config::load_env_files();
    let config = config::load_config();
    logger::setup_logging(&config.log_dir(), config.log_level())?;

    // A missing API key fails here, before any connection attempt.
    let connector = HeliusWssConnector::new(&config.helius_config())?;
    let feed_config = config.feed_config();
    log::info!(
        "Subscribing to {} (program filter: {})",
        feed_config.subscription.target_address,
        feed_config.filter.program_ids().collect::<Vec<_>>().join(", ")
    );

    let manager = ConnectionManager::new(connector, feed_config, JsonParsedDecoder, LogSink::default());
    let shutdown = manager.shutdown_handle();
    let mut feed_handle = tokio::spawn(manager.run());

    // Wait for shutdown signal, or for the feed to give up on its own
    let finished = tokio::select! {
        result = &mut feed_handle => Some(result),
        _ = signal::ctrl_c() => {
            log::info!("Ctrl-C received, initiating shutdown.");
            None
        }
        _ = terminate() => {
            log::info!("SIGTERM received, initiating shutdown.");
            None
        }
    };

    let result = match finished {
        Some(result) => result,
        None => {
            shutdown.shutdown();
            feed_handle.await
        }
    };

    match result? {
        Ok(()) => {
            log::info!("Shutdown complete.");
            Ok(())
        }
        Err(e) => {
            log::error!("Feed stopped: {}", e);
            Err(e.into())
        }
    }
}

async fn terminate() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term_signal) => {
                term_signal.recv().await;
            }
            Err(e) => {
                log::warn!("Could not install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        // On non-unix platforms, just wait forever.
        std::future::pending::<()>().await;
    }
}
