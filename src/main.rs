use clap::Parser;
use mediaserver_image::action::{ACTION_TYPE, ActionRouter};
use mediaserver_image::client::{ControllerDescriptor, Dispatcher, HttpDatabase, HttpDispatcher};
use mediaserver_image::imaging::{ImageBackend, NativeBackend, ShutdownGuard};
use mediaserver_image::registration::{self, Registrar};
use mediaserver_image::storage::LocalStore;
use mediaserver_image::{config, logging, server};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "mediaserverimage")]
#[command(about = "Image worker for the media server")]
#[command(long_about = "\
Image worker for the media server

Registers with the configured dispatchers and executes image actions:

  resize   size=WxH [crop|stretch] [format] [quality] [compress] [sharpen] [blur]
  convert  [format] [quality] [compress]

Sources are the canonical renditions known to the database; results are
written under the request's storage data directory and described by the
returned cache record.

Run 'mediaserverimage --gen-config' to print a documented config file.")]
#[command(version)]
struct Cli {
    /// Config file (TOML). Stock defaults are used when omitted.
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Override the configured log level
    #[arg(long)]
    log_level: Option<String>,

    /// Print a stock config with all options documented and exit
    #[arg(long)]
    gen_config: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    if cli.gen_config {
        print!("{}", config::stock_config_toml());
        return Ok(());
    }

    let mut config = config::load_config(cli.config.as_deref())?;
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }
    let log_file = (!config.log_file.is_empty()).then(|| PathBuf::from(&config.log_file));
    let _log_guard = logging::init(&config.log_level, log_file.as_deref())?;

    // Dropped on every exit from here on, which shuts the backend down once.
    let teardown = ShutdownGuard::new(Arc::new(NativeBackend::new(config.aspect_comparison)));
    let backend = teardown.backend();
    tracing::info!(
        backend = backend.name(),
        formats = ?backend.supported_formats(),
        "image backend ready"
    );

    let database = Arc::new(HttpDatabase::new(&config.database, config.client_timeout())?);
    match database.ping().await {
        Ok(message) => tracing::info!(endpoint = database.endpoint(), %message, "database reachable"),
        Err(e) => tracing::warn!(endpoint = database.endpoint(), error = %e, "database not reachable"),
    }

    let mut dispatchers: Vec<Arc<dyn Dispatcher>> = Vec::with_capacity(config.dispatchers.len());
    for endpoint in &config.dispatchers {
        let dispatcher = HttpDispatcher::new(endpoint, config.client_timeout())?;
        match dispatcher.ping().await {
            Ok(message) => tracing::info!(endpoint = dispatcher.endpoint(), %message, "dispatcher reachable"),
            Err(e) => tracing::warn!(endpoint = dispatcher.endpoint(), error = %e, "dispatcher not reachable"),
        }
        dispatchers.push(Arc::new(dispatcher));
    }

    let actions = Arc::new(
        ActionRouter::new(Arc::clone(backend), Arc::new(LocalStore::new()), database)
            .with_limits(config.concurrency as usize, config.action_timeout()),
    );

    let listener = TcpListener::bind(config.socket_addr()?).await?;
    let stop = CancellationToken::new();

    let descriptor = ControllerDescriptor {
        kind: ACTION_TYPE.to_string(),
        instance: config.instance.clone(),
        domains: config.domains.clone(),
        concurrency: config.concurrency,
        queue_size: config.queue_size,
        actions: ActionRouter::<NativeBackend>::capabilities(),
    };
    let registrations =
        Registrar::new(descriptor, config.error_timeout()).spawn(dispatchers, stop.clone());

    let server_stop = stop.clone();
    let mut server = tokio::spawn(server::serve(
        listener,
        server::router(actions),
        async move { server_stop.cancelled().await },
    ));

    let served = tokio::select! {
        _ = shutdown_signal() => {
            tracing::info!("shutdown requested");
            stop.cancel();
            server.await
        }
        result = &mut server => {
            tracing::error!("rpc server stopped unexpectedly");
            stop.cancel();
            result
        }
    };

    registration::join_all(registrations).await;
    drop(teardown);
    tracing::info!("worker stopped");

    served??;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
