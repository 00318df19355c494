use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::{LevelFilter, info};
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;

use copsd::api::{AppState, create_router};
use copsd::auth::PostgresAuthorizer;
use copsd::catalog::ServiceCatalog;
use copsd::config::AppConfig;
use copsd::engine::{CliEngine, ContainerEngine};
use copsd::label::{CommandLabeler, Labeler, NullLabeler};
use copsd::launch::{InstanceLauncher, LauncherSettings};
use copsd::login::LoginForwarder;
use copsd::ports::PortAllocator;
use copsd::session::{InstanceSet, MonitorContext, MonitorSet, SessionRegistry};
use copsd::shutdown::ShutdownCoordinator;

#[derive(Parser)]
#[command(name = "copsd", version, about = "COPS platform per-session service orchestrator")]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Clone, Debug)]
struct CommonOpts {
    /// Path to the configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON.
    #[arg(long, global = true)]
    json: bool,

    /// Suppress all log output.
    #[arg(long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Run the orchestrator.
    Serve(ServeArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Bind address override.
    #[arg(long)]
    host: Option<String>,

    /// Bind port override.
    #[arg(long, short)]
    port: Option<u16>,
}

fn main() {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "{err:?}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.common)?;

    match cli.command {
        Command::Serve(args) => async_serve(cli.common, args),
    }
}

#[tokio::main]
async fn async_serve(common: CommonOpts, args: ServeArgs) -> Result<()> {
    serve(common, args).await
}

fn init_logging(common: &CommonOpts) -> Result<()> {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    if common.quiet {
        log::set_max_level(LevelFilter::Off);
        return Ok(());
    }

    let level = common.log_level.to_lowercase();
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("copsd={level},tower_http={level}")));

    if common.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .ok();
    }

    // Also init env_logger for compatibility with log crate users.
    let filter = level.parse::<LevelFilter>().unwrap_or(LevelFilter::Info);
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    builder.filter_level(filter);
    builder.try_init().ok();

    Ok(())
}

async fn serve(common: CommonOpts, args: ServeArgs) -> Result<()> {
    let mut config = AppConfig::load(common.config.as_deref())?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    config.validate()?;

    if config.enforce {
        info!("Running with mandatory-access-control enforcement");
    } else {
        info!("Running without mandatory-access-control enforcement");
    }

    // Engine client, probed once so a missing engine fails at startup
    // instead of on the first request.
    let engine: Arc<dyn ContainerEngine> = Arc::new(build_engine(&config));
    engine
        .version()
        .await
        .context("container engine is not available")?;

    let labeler: Arc<dyn Labeler> = if config.enforce {
        Arc::new(CommandLabeler::new(
            config.labeling.apply_command.clone(),
            config.labeling.clear_command.clone(),
        ))
    } else {
        Arc::new(NullLabeler)
    };

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect_lazy(&config.database.url())
        .context("configuring database pool")?;
    let authorizer = Arc::new(PostgresAuthorizer::new(pool));

    let catalog = Arc::new(ServiceCatalog::from_entries(&config.services));
    let allocator = Arc::new(PortAllocator::from_catalog(&catalog));
    let registry = Arc::new(SessionRegistry::new());
    let instances = Arc::new(InstanceSet::new());
    let monitors = Arc::new(MonitorSet::new());

    let launcher = Arc::new(InstanceLauncher::new(
        engine.clone(),
        instances.clone(),
        LauncherSettings {
            readiness_marker: config.launch.readiness_marker.clone(),
            readiness_timeout: Duration::from_secs(config.launch.readiness_timeout_secs),
            poll_interval: Duration::from_millis(config.launch.readiness_poll_ms),
            instance_env: config
                .database
                .instance_env(&config.launch.gateway_address),
        },
    ));

    let forwarder = Arc::new(
        LoginForwarder::new(Duration::from_secs(config.login.timeout_secs))
            .context("building login forwarder")?,
    );

    let monitor_ctx = MonitorContext {
        registry: registry.clone(),
        instances: instances.clone(),
        monitors: monitors.clone(),
        engine: engine.clone(),
        labeler: labeler.clone(),
        http: reqwest::Client::new(),
        interval: Duration::from_secs(config.monitor.interval_secs),
    };

    let state = AppState {
        catalog,
        allocator,
        registry,
        instances: instances.clone(),
        monitors: monitors.clone(),
        engine: engine.clone(),
        labeler: labeler.clone(),
        authorizer,
        launcher,
        forwarder,
        monitor_ctx,
        cors_origins: config.server.cors_origins.clone(),
    };
    let app = create_router(state);

    let coordinator = ShutdownCoordinator::new(
        monitors,
        instances,
        engine,
        labeler,
        Duration::from_secs(config.monitor.join_timeout_secs),
    );

    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Listening on http://{}", addr);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;

    // Graceful shutdown: reclaim every session before the server exits.
    let shutdown_signal = async move {
        let ctrl_c = async {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install Ctrl+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install signal handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }

        coordinator.run().await;
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("running server")?;

    Ok(())
}

fn build_engine(config: &AppConfig) -> CliEngine {
    match (&config.engine.kind, &config.engine.binary) {
        (Some(kind), Some(binary)) => CliEngine::with_binary(*kind, binary.clone()),
        (Some(kind), None) => CliEngine::with_kind(*kind),
        (None, Some(binary)) => CliEngine::with_binary(Default::default(), binary.clone()),
        (None, None) => CliEngine::detect(),
    }
}
