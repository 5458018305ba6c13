//! bankcore Server Binary

use std::convert::Infallible;
use std::sync::Arc;

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bankcore_auth::{AuthService, LogOtpDelivery, OtpConfig, PrincipalDirectory};
use bankcore_engine::{AccountService, AuthorizationGate, History, Metrics, TransactionEngine};
use bankcore_fx::{ConverterConfig, CurrencyConverter, HttpRateSource};
use bankcore_ledger::{
    AccountNumberConfig, AccountNumberGenerator, InMemoryLedgerStore, LedgerStore, PgLedgerConfig,
    PgLedgerStore, RetryPolicy,
};
use bankcore_server::{App, ServerConfig, ServerState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting bankcore server");

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(anyhow::anyhow!("Configuration error: {}", e));
    }

    let app = Arc::new(build_app(&config).await?);

    let maintenance = {
        let app = app.clone();
        let interval = config.auth.cleanup_interval;
        tokio::spawn(async move { app.run_maintenance(interval).await })
    };

    let listener = TcpListener::bind((config.listen_addr.as_str(), config.listen_port)).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut stop = shutdown_rx.clone();

    {
        let app = app.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for Ctrl+C, graceful shutdown disabled");
                std::future::pending::<()>().await;
            }
            info!("Shutdown signal received");
            app.set_state(ServerState::ShuttingDown);
            let _ = shutdown_tx.send(true);
        });
    }

    app.set_state(ServerState::Running);
    info!(
        listen_addr = %config.listen_addr,
        listen_port = config.listen_port,
        "Server running"
    );

    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "Accept failed");
                        continue;
                    }
                };
                let app = app.clone();
                let mut shutdown = shutdown_rx.clone();
                connections.spawn(async move {
                    let service = service_fn(move |req| {
                        let app = app.clone();
                        async move { Ok::<_, Infallible>(app.serve(req).await) }
                    });
                    let conn = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
                    tokio::pin!(conn);

                    let finished = tokio::select! {
                        result = conn.as_mut() => Some(result),
                        _ = shutdown.changed() => None,
                    };
                    let result = match finished {
                        Some(result) => result,
                        None => {
                            conn.as_mut().graceful_shutdown();
                            conn.await
                        }
                    };
                    if let Err(e) = result {
                        warn!(peer = %peer, error = %e, "Connection error");
                    }
                });
            }
            _ = stop.changed() => break,
        }
    }

    drop(listener);
    let drained = tokio::time::timeout(config.shutdown_grace, async {
        while connections.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!(open = connections.len(), "Grace period elapsed, closing remaining connections");
        connections.abort_all();
    }

    maintenance.abort();
    app.set_state(ServerState::Stopped);
    info!("Server shutdown complete");
    Ok(())
}

async fn build_app(config: &ServerConfig) -> anyhow::Result<App> {
    let numbers = AccountNumberGenerator::new(AccountNumberConfig::default());
    let store: Arc<dyn LedgerStore> = match &config.ledger.database_url {
        Some(url) => {
            let pg = PgLedgerConfig {
                url: url.clone(),
                max_connections: config.ledger.max_connections,
                lock_timeout: config.ledger.lock_timeout,
            };
            info!("Using PostgreSQL ledger store");
            Arc::new(PgLedgerStore::connect(&pg, numbers).await?)
        }
        None => {
            warn!("DATABASE_URL not set, ledger is held in memory");
            Arc::new(InMemoryLedgerStore::new(config.ledger.lock_timeout, numbers))
        }
    };

    let directory = Arc::new(match &config.auth.directory_path {
        Some(path) => {
            let directory = PrincipalDirectory::load(path)?;
            if directory.is_empty() {
                warn!(path = %path, "Principal directory is empty");
            }
            directory
        }
        None => {
            warn!("DIRECTORY_PATH not set, no principal can log in");
            PrincipalDirectory::from_json(r#"{"principals": []}"#)?
        }
    });

    let auth = Arc::new(AuthService::new(
        directory.clone(),
        OtpConfig {
            ttl: config.auth.otp_ttl,
            max_attempts: config.auth.otp_max_attempts,
        },
        Arc::new(LogOtpDelivery),
        config.auth.session_ttl,
    ));

    let converter = Arc::new(CurrencyConverter::new(
        Arc::new(HttpRateSource::new(config.fx.rate_url.clone())?),
        ConverterConfig {
            spread: config.fx.spread,
            timeout: config.fx.timeout,
        },
    ));

    let gate = AuthorizationGate::new(directory);
    let metrics = Arc::new(Metrics::new());
    let retry = RetryPolicy {
        max_attempts: config.ledger.max_retries,
        backoff: config.ledger.retry_backoff,
    };

    Ok(App::new(
        auth,
        TransactionEngine::new(store.clone(), converter, gate.clone(), metrics.clone(), retry),
        AccountService::new(store.clone(), gate.clone()),
        History::new(store.clone(), gate),
        store,
        metrics,
        config.max_body_bytes,
    ))
}
