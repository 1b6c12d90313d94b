//! Main application logic and lifecycle management.
//!
//! This module contains the core `Application` struct that orchestrates
//! server startup, signal handling, and multi-phase graceful shutdown.

use crate::{cli::CliArgs, config::AppConfig, logging::display_banner, signals::{setup_signal_handlers, setup_signal_handlers_silent}};
use meridian_server::{dispatch::builtin_handlers, DispatchTable, GameServer, ShutdownState};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Main application struct.
///
/// The `Application` struct manages the complete lifecycle of the Meridian
/// server, including configuration loading, server initialization, and
/// graceful shutdown handling.
///
/// # Architecture
///
/// * **Configuration Management**: Loads and validates configuration from
///   files and CLI
/// * **Server Orchestration**: Initializes and manages the game server
///   instance
/// * **Graceful Shutdown**: Handles termination signals and phased
///   connection draining
pub struct Application {
    /// Loaded application configuration
    config: AppConfig,
    /// Game server instance
    server: Arc<GameServer>,
}

impl Application {
    /// Creates a new application instance.
    ///
    /// Loads configuration, applies CLI overrides, validates settings, and
    /// initializes the game server with the built-in protocol handlers.
    ///
    /// # Arguments
    ///
    /// * `args` - Parsed command-line arguments
    ///
    /// # Returns
    ///
    /// A configured `Application` instance ready to run, or an error if
    /// initialization failed.
    ///
    /// # Process
    ///
    /// 1. Load configuration from file (creating default if missing)
    /// 2. Apply command-line argument overrides
    /// 3. Validate merged configuration
    /// 4. Display startup banner
    /// 5. Build the dispatch table and initialize the game server
    pub async fn new(args: CliArgs) -> Result<Self, Box<dyn std::error::Error>> {
        info!("🔧 Loading configuration from: {}", args.config_path.display());
        let mut config = AppConfig::load_from_file(&args.config_path).await?;

        // Apply CLI overrides
        if let Some(bind_address) = args.bind_address {
            config.server.bind_address = bind_address;
        }

        if let Some(log_level) = args.log_level {
            config.logging.level = log_level;
        }

        if args.json_logs {
            config.logging.json_format = true;
        }

        // Validate configuration
        if let Err(e) = config.validate() {
            return Err(format!("Configuration validation failed: {e}").into());
        }
        info!("✅ Configuration loaded and validated successfully");

        // Display banner after logging is setup
        display_banner();

        // Duplicate type codes in the handler set are a startup error, not
        // something to paper over at runtime.
        let dispatch = DispatchTable::build(builtin_handlers())
            .map_err(|e| format!("Dispatch table construction failed: {e}"))?;

        let server_config = config.to_server_config()?;
        let server = Arc::new(GameServer::new(server_config, dispatch));

        info!("🚀 Meridian Game Server v1.0.0");
        info!("🏗️ Architecture: Network Core + External Gameplay Handlers");
        info!("📂 Config: {}", args.config_path.display());

        Ok(Self { config, server })
    }

    /// Runs the application until a shutdown signal arrives.
    ///
    /// Starts the server, waits for shutdown signals, and performs a
    /// phased graceful shutdown.
    ///
    /// # Returns
    ///
    /// `Ok(())` if the application ran and shut down successfully, or an
    /// error if there was a critical failure during execution.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        info!("🌟 Starting Meridian Game Server Application");

        self.log_configuration_summary();

        // Create shutdown state for coordinated shutdown
        let shutdown_state = ShutdownState::new();
        let shutdown_state_for_server = shutdown_state.clone();

        // Start server in background
        let server_handle = {
            let server = self.server.clone();
            tokio::spawn(async move {
                match server.start_with_shutdown_state(shutdown_state_for_server).await {
                    Ok(()) => {
                        info!("✅ Server completed successfully");
                    }
                    Err(e) => {
                        error!("❌ Server error: {:?}", e);
                        std::process::exit(1);
                    }
                }
            })
        };

        info!("✅ Meridian Server is now running!");
        info!(
            "🎮 Ready to accept connections on {}",
            self.config.server.bind_address
        );
        info!("🛑 Press Ctrl+C to gracefully shutdown");

        // Wait for shutdown signal
        let signal_shutdown_state = setup_signal_handlers().await?;

        // merciless shutdown
        tokio::spawn(async move {
            if let Err(e) = setup_signal_handlers_silent().await {
                error!("Failed to set up merciless shutdown signal handler: {e}");
                return;
            }

            warn!("Shutdown handler received again! I'll make this quick.");
            std::process::exit(1);
        });

        // Transfer shutdown state to our server's shutdown state
        if signal_shutdown_state.is_shutdown_initiated() {
            shutdown_state.initiate_shutdown();
        }

        info!("🛑 Shutdown signal received, beginning graceful shutdown...");

        // Phase 1: Stop accepting new connections
        info!("📡 Phase 1: Stopping accept loop...");
        self.server.shutdown().await?;

        if let Err(e) =
            tokio::time::timeout(tokio::time::Duration::from_secs(8), server_handle).await
        {
            warn!("⏰ Server task did not complete within timeout, proceeding with cleanup: {:?}", e);
        } else {
            info!("✅ Server task completed gracefully");
        }

        // Phase 2: Drain live connections
        info!("⏳ Phase 2: Draining live connections...");
        let mut wait_cycles = 0;
        const MAX_WAIT_CYCLES: u32 = 30; // Wait up to 3 seconds (30 * 100ms)

        while wait_cycles < MAX_WAIT_CYCLES {
            if self.server.live_connections() == 0 {
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            wait_cycles += 1;
        }

        if wait_cycles >= MAX_WAIT_CYCLES {
            info!(
                "⏰ Timeout reached with {} connection(s) still live, proceeding with shutdown",
                self.server.live_connections()
            );
        } else {
            info!("✅ All connections drained");
        }

        // Mark shutdown as complete
        shutdown_state.complete_shutdown();

        // Display final statistics
        self.log_final_statistics();

        info!("✅ Meridian Game Server shutdown complete");
        info!("👋 Thank you for using Meridian Game Server!");

        Ok(())
    }

    /// Logs the configuration summary at startup.
    fn log_configuration_summary(&self) {
        info!("📋 Configuration Summary:");
        info!("  🌐 Bind address: {}", self.config.server.bind_address);
        info!("  👥 Max connections: {}", self.config.admission.max_connections);
        info!(
            "  🚦 Reconnect pacing: {}ms minimum gap, {}s block",
            self.config.admission.min_reconnect_interval_ms,
            self.config.admission.block_duration_secs
        );
        info!("  🗂️ Diagnostics: {}", self.config.server.diagnostics_dir);
    }

    /// Logs final statistics during shutdown.
    fn log_final_statistics(&self) {
        info!("📊 Final Statistics:");
        info!("  - Live connections: {}", self.server.live_connections());
        info!("  - Sessions in realms: {}", self.server.realms().total_sessions());
        info!(
            "  - Blocked addresses: {}",
            self.server.admission().blocked_count()
        );
    }
}
