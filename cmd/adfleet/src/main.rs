//! # adfleet
//!
//! Assembles the fleet server from the adapters selected at compile time.

#[cfg(not(feature = "web-axum"))]
compile_error!("adfleet needs the web-axum feature");

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use api_adapters::{router, AppState};
use configs::{LogFormat, LogSettings, Settings};
use device_adapters::{BoxClientConfig, HmacLinkSigner, HttpBoxClient};
use domains::{AdRepo, FleetRepo, Notifier};
use services::{AssignmentPolicy, FleetServices, LifecyclePolicy, Ports, ServiceSettings};
use storage_adapters::MemoryStore;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().context("loading configuration")?;
    init_tracing(&settings.log);

    let ports = build_ports(&settings).await?;
    let services = FleetServices::build(ports, service_settings(&settings));
    let app = router(AppState::new(services.clone()));

    let address = settings.bind_address();
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("binding {address}"))?;
    info!(%address, "adfleet listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP")?;

    info!("draining box sync queue");
    services.shutdown().await;
    let stats = services.gateway.stats();
    info!(
        delivered = stats.queue.delivered,
        failed = stats.queue.failed,
        dropped = stats.queue.dropped,
        "adfleet stopped"
    );
    Ok(())
}

fn init_tracing(log: &LogSettings) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.filter));
    let output = match log.format {
        LogFormat::Json => fmt::layer().json().with_current_span(true).boxed(),
        LogFormat::Pretty => fmt::layer().pretty().boxed(),
    };
    tracing_subscriber::registry().with(output).with(filter).init();
}

fn service_settings(settings: &Settings) -> ServiceSettings {
    ServiceSettings {
        assignment: AssignmentPolicy {
            reserved_partner_slots: settings.slots.reserved_partner_slots,
            default_block_quantity: settings.slots.default_block_quantity,
            max_attempts: settings.slots.assign_attempts,
        },
        lifecycle: LifecyclePolicy { max_refusals: settings.slots.max_refusals },
        queue_capacity: settings.box_sync.queue_capacity,
        sync_workers: settings.box_sync.workers,
    }
}

async fn build_ports(settings: &Settings) -> anyhow::Result<Ports> {
    let signer = HmacLinkSigner::new(
        settings.links.base_url.clone(),
        settings.links.signing_key.clone(),
        chrono::Duration::seconds(settings.links.ttl_secs),
    );
    let box_client = HttpBoxClient::new(BoxClientConfig {
        port: settings.box_sync.port,
        api_key: settings.box_sync.api_key.clone(),
        timeout: Duration::from_millis(settings.box_sync.timeout_ms),
    })?;

    #[cfg(feature = "db-postgres")]
    if let Some(url) = &settings.database.url {
        use secrecy::ExposeSecret;

        let store = storage_adapters::PgStore::connect(url.expose_secret(), settings.database.max_connections)
            .await
            .context("connecting to postgres")?;
        store.migrate().await?;
        info!("using postgres store");
        return Ok(ports(Arc::new(store), signer, box_client));
    }

    warn!("no database configured, state lives in memory only");
    Ok(ports(Arc::new(MemoryStore::new()), signer, box_client))
}

fn ports<S>(store: Arc<S>, signer: HmacLinkSigner, box_client: HttpBoxClient) -> Ports
where
    S: FleetRepo + AdRepo + Notifier + 'static,
{
    Ports {
        fleet: store.clone(),
        ads: store.clone(),
        notifier: store,
        signer: Arc::new(signer),
        box_client: Arc::new(box_client),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "could not listen for ctrl-c");
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
                warn!(error = %e, "could not listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
