//! Prometheus metrics for log forwarding.
//!
//! Exposes:
//! - `telelog_messages_total` (counter by severity)
//! - `telelog_deliveries_total` (counter by status)
//! - `telelog_delivery_duration_seconds` (histogram by status)
//! - `telelog_queue_pending` (gauge)
//! - process metrics via `process` collector

use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use once_cell::sync::Lazy;
use prometheus::process_collector::ProcessCollector;
use prometheus::{
    default_registry, register_histogram_vec, register_int_counter_vec, register_int_gauge,
    Encoder, HistogramVec, IntCounterVec, IntGauge, TextEncoder,
};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::format::Severity;

static PROCESS_COLLECTOR: Lazy<()> = Lazy::new(|| {
    if let Err(err) = default_registry().register(Box::new(ProcessCollector::for_self())) {
        warn!("Failed to register process collector: {}", err);
    }
});

static MESSAGES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "telelog_messages_total",
        "Log calls accepted for dispatch by severity",
        &["severity"]
    )
    .expect("failed to register message counter")
});

static DELIVERIES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "telelog_deliveries_total",
        "Per-recipient deliveries by status",
        &["status"]
    )
    .expect("failed to register delivery counter")
});

static DELIVERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    // Exponential buckets from 10ms up to ~40 seconds.
    let buckets =
        prometheus::exponential_buckets(0.01, 2.0, 13).expect("failed to create histogram buckets");
    register_histogram_vec!(
        "telelog_delivery_duration_seconds",
        "Time spent sending one message to one recipient",
        &["status"],
        buckets
    )
    .expect("failed to register delivery duration histogram")
});

static QUEUE_PENDING: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "telelog_queue_pending",
        "Deliveries enqueued but not yet completed"
    )
    .expect("failed to register pending gauge")
});

/// Ensure collectors are registered.
fn init_collectors() {
    Lazy::force(&PROCESS_COLLECTOR);
    Lazy::force(&MESSAGES_TOTAL);
    Lazy::force(&DELIVERIES_TOTAL);
    Lazy::force(&DELIVERY_DURATION);
    Lazy::force(&QUEUE_PENDING);
}

/// Count a log call that passed the severity gate.
pub fn record_message(severity: Severity) {
    init_collectors();
    MESSAGES_TOTAL.with_label_values(&[severity.as_str()]).inc();
}

/// A job entered the dispatch queue.
pub fn record_enqueued() {
    init_collectors();
    QUEUE_PENDING.inc();
}

/// A job left the dispatch queue after an attempt.
pub fn record_delivery(status: &'static str, duration: Duration) {
    init_collectors();
    QUEUE_PENDING.dec();
    DELIVERIES_TOTAL.with_label_values(&[status]).inc();
    DELIVERY_DURATION
        .with_label_values(&[status])
        .observe(duration.as_secs_f64());
}

/// A job counted by [`record_enqueued`] was refused by the queue.
pub fn record_dropped(status: &'static str) {
    init_collectors();
    QUEUE_PENDING.dec();
    DELIVERIES_TOTAL.with_label_values(&[status]).inc();
}

/// A job never made it into the queue.
pub fn record_rejected(status: &'static str) {
    init_collectors();
    DELIVERIES_TOTAL.with_label_values(&[status]).inc();
}

fn plain_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}

async fn metrics_response() -> Result<Response<Full<Bytes>>, Infallible> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", err);
        return Ok(plain_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "encode error",
        ));
    }

    let mut response = plain_response(StatusCode::OK, buffer);
    if let Ok(value) = hyper::header::HeaderValue::from_str(encoder.format_type()) {
        response
            .headers_mut()
            .insert(hyper::header::CONTENT_TYPE, value);
    }
    Ok(response)
}

async fn handle_request(req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    match req.uri().path() {
        "/metrics" => metrics_response().await,
        _ => Ok(plain_response(StatusCode::NOT_FOUND, Bytes::new())),
    }
}

async fn serve(addr: SocketAddr) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "Prometheus metrics endpoint started");

    loop {
        let (stream, peer) = listener.accept().await?;
        let service = service_fn(handle_request);
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                warn!(?peer, "Metrics connection error: {}", err);
            }
        });
    }
}

/// Spawn the metrics HTTP endpoint on the given address.
pub fn spawn_metrics_server(addr: SocketAddr) {
    init_collectors();
    tokio::spawn(async move {
        if let Err(err) = serve(addr).await {
            error!(%addr, "Metrics server failed: {}", err);
        }
    });
}
