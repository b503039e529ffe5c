//! ---
//! cf_section: "03-persistence-logging"
//! cf_subsection: "module"
//! cf_type: "source"
//! cf_scope: "code"
//! cf_description: "Prometheus registry, daemon metrics, and the /metrics exporter."
//! cf_version: "v0.0.0-prealpha"
//! cf_owner: "tbd"
//! ---
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntGaugeVec, Opts, Registry, TextEncoder};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

pub use prometheus;

/// Registry shared by the daemon and the engine.
pub type SharedRegistry = Arc<Registry>;

pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Render every family in `registry` in the Prometheus text format.
pub fn encode_text(registry: &Registry) -> Result<String> {
    TextEncoder::new()
        .encode_to_string(&registry.gather())
        .context("failed to encode metric families")
}

/// Serve `registry` on `addr` until [`MetricsServer::shutdown`].
///
/// Binding happens before this returns so a bad address fails fast; port 0
/// picks a free port, see [`MetricsServer::addr`].
pub fn spawn_http_server(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let (listener, bound) = bind(addr)?;
    let app = Router::new()
        .route("/metrics", get(render_metrics))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(registry);

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = stop_rx.await;
            })
            .await
            .context("metrics exporter stopped with an error")
    });
    info!(address = %bound, "metrics exporter listening");

    Ok(MetricsServer {
        addr: bound,
        stop: Some(stop_tx),
        task,
    })
}

fn bind(addr: SocketAddr) -> Result<(TcpListener, SocketAddr)> {
    let listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind metrics listener {addr}"))?;
    listener
        .set_nonblocking(true)
        .context("failed to make metrics listener non-blocking")?;
    let bound = listener.local_addr().context("metrics listener has no address")?;
    let listener = TcpListener::from_std(listener).context("failed to register metrics listener")?;
    Ok((listener, bound))
}

async fn render_metrics(State(registry): State<SharedRegistry>) -> Response {
    match encode_text(&registry) {
        Ok(body) => (
            [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
            body,
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "metrics scrape failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding error").into_response()
        }
    }
}

/// Running exporter.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting scrapes and wait for in-flight ones.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        self.task.await.context("metrics exporter task panicked")?
    }
}

/// Process-level metrics of `cf-failoverd`.
#[derive(Clone)]
pub struct DaemonMetrics {
    registry: SharedRegistry,
    starts: IntCounter,
    config_load: Histogram,
    build_info: IntGaugeVec,
}

impl DaemonMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let starts = IntCounter::new(
            "cf_failoverd_starts_total",
            "Times the failover daemon has started",
        )?;
        let config_load = Histogram::with_opts(
            HistogramOpts::new(
                "cf_failoverd_config_load_seconds",
                "Time spent reading and validating configuration",
            )
            .buckets(prometheus::exponential_buckets(0.0005, 4.0, 8)?),
        )?;
        let build_info = IntGaugeVec::new(
            Opts::new("cf_failoverd_build_info", "Version, target and mode of the running daemon"),
            &["version", "target", "mode"],
        )?;

        registry.register(Box::new(starts.clone()))?;
        registry.register(Box::new(config_load.clone()))?;
        registry.register(Box::new(build_info.clone()))?;
        Ok(Self {
            registry,
            starts,
            config_load,
            build_info,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        Arc::clone(&self.registry)
    }

    pub fn inc_start(&self) {
        self.starts.inc();
    }

    pub fn observe_config_load(&self, seconds: f64) {
        self.config_load.observe(seconds);
    }

    pub fn set_build_info(&self, version: &str, target: &str, mode: &str) {
        self.build_info.with_label_values(&[version, target, mode]).set(1);
    }
}

impl std::fmt::Debug for DaemonMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaemonMetrics")
            .field("starts", &self.starts.get())
            .finish_non_exhaustive()
    }
}
