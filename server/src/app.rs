//! Core application: assembles config, storage, the engine context, and the
//! background workers, then hands everything to `ApiServer`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::api::{ApiServer, AppState, AuthState};
use crate::core::banner;
use crate::core::cli::{self, CliConfig, Commands, SystemCommands};
use crate::core::config::{AppConfig, Settings};
use crate::core::constants::{
    APP_NAME_LOWER, ENV_LOG, ORDERING_BUFFER_SWEEP_SECS, SESSION_SWEEP_SECS,
};
use crate::core::shutdown::ShutdownService;
use crate::core::storage::AppStorage;
use crate::domain::interaction::Interaction;
use crate::domain::interval::Interval;
use crate::domain::pipeline::{self, EngineContext, OrderingBuffer};
use crate::domain::storage::{FilesystemStorage, Op, Resource, Storage, StorageError};

pub struct CoreApp {
    pub shutdown: ShutdownService,
    pub config: AppConfig,
    pub storage: AppStorage,
    pub ctx: Arc<EngineContext>,
    pub buffer: Arc<OrderingBuffer>,
    /// Taken once, by `start_background_tasks`, and handed to the batch
    /// worker. A `Mutex` rather than plain `Option` so `CoreApp` stays
    /// `Sync` without borrowing `&mut self` through `ApiServer::new`.
    receiver: Mutex<Option<mpsc::Receiver<Interaction>>>,
}

impl CoreApp {
    /// Run the application with CLI argument parsing
    pub async fn run() -> Result<()> {
        dotenvy::dotenv().ok();
        Self::init_logging();

        tracing::debug!("Application starting");

        let (cli_config, command) = cli::parse();
        tracing::trace!(command = ?command, "Parsed command");

        match command {
            Some(Commands::System { command: system_cmd }) => {
                return Self::handle_system_command(system_cmd);
            }
            Some(Commands::Start) | None => {}
        }

        let app = Self::init(&cli_config).await?;
        Self::start_server(app).await
    }

    async fn init(cli: &CliConfig) -> Result<Self> {
        let storage = AppStorage::init(config_data_dir(cli).as_deref()).await?;
        let backend: Arc<dyn Storage> = Arc::new(FilesystemStorage::new(storage.data_dir()));

        let stored_settings = Self::fetch_stored_settings(&backend).await?;
        let config = AppConfig::load(cli, stored_settings.as_ref())?;

        let enabled_intervals = enabled_intervals(&config);

        let ctx = Arc::new(EngineContext::new(
            config.timezone,
            enabled_intervals,
            config.session_ttl_minutes,
            config.settings.interactions_storage,
            backend,
        ));

        // Storage is the rehydration source at start-up: any read failure
        // here (other than a missing record, which `rehydrate` already
        // treats as "nothing to load") is fatal rather than silently
        // starting from an empty state.
        pipeline::rehydrate(&ctx).await.context("failed to rehydrate from storage")?;

        let (sender, receiver) = pipeline::channel();
        let buffer = Arc::new(OrderingBuffer::new(sender));

        let shutdown = ShutdownService::new();

        Ok(Self {
            config,
            storage,
            ctx,
            buffer,
            shutdown,
            receiver: Mutex::new(Some(receiver)),
        })
    }

    /// Reads the persisted `Settings` record so a dashboard-toggled setting
    /// survives a restart. `DoesNotExist` (first-ever boot) falls back to
    /// CLI/env/file/default in `AppConfig::load`; any other storage error is
    /// fatal per the initial-settings-fetch rule.
    async fn fetch_stored_settings(backend: &Arc<dyn Storage>) -> Result<Option<Settings>> {
        match backend.do_op(Op::read(Resource::Settings, Settings::ID)).await {
            Ok(result) => {
                let item = result.item.context("settings read returned no item")?;
                Ok(Some(serde_json::from_value(item)?))
            }
            Err(StorageError::DoesNotExist) => Ok(None),
            Err(err) => Err(err).context("fatal: failed to read persisted settings at startup"),
        }
    }

    fn handle_system_command(cmd: SystemCommands) -> Result<()> {
        match cmd {
            SystemCommands::Prune { yes } => Self::prune_data(yes),
        }
    }

    fn prune_data(skip_confirm: bool) -> Result<()> {
        let data_dir = AppStorage::resolve_data_dir();

        if !data_dir.exists() {
            println!(
                "Nothing to prune. Data directory does not exist: {}",
                data_dir.display()
            );
            return Ok(());
        }

        let data_dir = data_dir.canonicalize().unwrap_or(data_dir);

        println!("This will permanently delete the local data directory:");
        println!("  {}", data_dir.display());
        println!();
        println!(
            "Make sure the server is not running. \
             Deleting data while the server is running will cause data corruption."
        );

        if !skip_confirm {
            print!("\nContinue? [y/N] ");
            std::io::Write::flush(&mut std::io::stdout())?;

            let mut input = String::new();
            std::io::stdin().read_line(&mut input)?;

            if !matches!(input.trim().to_lowercase().as_str(), "y" | "yes") {
                println!("Aborted.");
                return Ok(());
            }
        }

        std::fs::remove_dir_all(&data_dir)
            .with_context(|| format!("Failed to delete data directory: {}", data_dir.display()))?;
        println!("Pruned: {}", data_dir.display());
        Ok(())
    }

    fn init_logging() {
        let default_filter = format!("info,{}=info", APP_NAME_LOWER);

        let filter = std::env::var(ENV_LOG)
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or(default_filter);

        tracing_subscriber::fmt()
            .with_target(false)
            .with_thread_ids(false)
            .with_level(true)
            .with_ansi(true)
            .compact()
            .with_env_filter(filter)
            .init();
    }

    async fn start_server(app: Self) -> Result<()> {
        app.shutdown.install_signal_handlers();

        app.start_background_tasks().await;

        banner::print_banner(
            &app.config.server.host,
            app.config.server.port,
            app.config.is_dev(),
            &app.storage.data_dir().display().to_string(),
        );

        let server = ApiServer::new(app);
        let app = server.start().await?;
        app.shutdown.shutdown().await;

        Ok(())
    }

    /// Spawns the two periodic sweeps that drive moka's
    /// time-based eviction even while idle: the ordering buffer's TTL
    /// forwards interactions to the batch worker, and the session cache's
    /// TTL folds expired sessions into every enabled summary.
    pub async fn start_background_tasks(&self) {
        let receiver = self
            .receiver
            .lock()
            .take()
            .expect("start_background_tasks called more than once");
        let worker_handles =
            crate::domain::pipeline::spawn_batch_worker(self.ctx.clone(), receiver, self.shutdown.subscribe());
        for handle in worker_handles {
            self.shutdown.register(handle).await;
        }

        let buffer = self.buffer.clone();
        let mut buffer_shutdown = self.shutdown.subscribe();
        let buffer_handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(ORDERING_BUFFER_SWEEP_SECS));
            loop {
                tokio::select! {
                    _ = ticker.tick() => buffer.run_pending_tasks().await,
                    _ = buffer_shutdown.changed() => {
                        if *buffer_shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        });
        self.shutdown.register(buffer_handle).await;

        let sessions_ctx = self.ctx.clone();
        let mut sessions_shutdown = self.shutdown.subscribe();
        let sessions_handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(SESSION_SWEEP_SECS));
            loop {
                tokio::select! {
                    _ = ticker.tick() => sessions_ctx.sessions.run_pending_tasks().await,
                    _ = sessions_shutdown.changed() => {
                        if *sessions_shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        });
        self.shutdown.register(sessions_handle).await;

        tracing::debug!("Background tasks started");
    }

    pub fn state(&self) -> AppState {
        AppState {
            ctx: self.ctx.clone(),
            buffer: self.buffer.clone(),
        }
    }

    pub fn auth_state(&self) -> AuthState {
        AuthState {
            api_key: self.config.settings.api_key.clone(),
            dev_mode: self.config.is_dev(),
        }
    }
}

fn enabled_intervals(config: &AppConfig) -> Vec<Interval> {
    let toggles = &config.settings.stats_toggles;
    let mut intervals = vec![Interval::AllTime];
    if toggles.hourly {
        intervals.push(Interval::Hourly);
    }
    if toggles.daily {
        intervals.push(Interval::Daily);
    }
    if toggles.weekly {
        intervals.push(Interval::Weekly);
    }
    if toggles.monthly {
        intervals.push(Interval::Monthly);
    }
    if toggles.quarterly {
        intervals.push(Interval::Quarterly);
    }
    if toggles.yearly {
        intervals.push(Interval::Yearly);
    }
    intervals
}

fn config_data_dir(cli: &CliConfig) -> Option<std::path::PathBuf> {
    cli.data_dir.clone()
}
