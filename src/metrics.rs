//! Prometheus metrics for the forwarder.
//!
//! Exposes:
//! - `auto_forward_messages_total` (counter by status: forwarded, gone, failed)
//! - `auto_forward_rate_limit_waits_total` (counter)
//! - `auto_forward_rate_limit_wait_seconds_total` (counter)
//! - `auto_forward_run_duration_seconds` (histogram by outcome)
//! - process metrics via `process` collector

use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use once_cell::sync::Lazy;
use prometheus::process_collector::ProcessCollector;
use prometheus::{
    default_registry, register_histogram_vec, register_int_counter, register_int_counter_vec,
    Encoder, HistogramVec, IntCounter, IntCounterVec, TextEncoder,
};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

static PROCESS_COLLECTOR: Lazy<()> = Lazy::new(|| {
    if let Err(err) = default_registry().register(Box::new(ProcessCollector::for_self())) {
        warn!("Failed to register process collector: {}", err);
    }
});

static MESSAGES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "auto_forward_messages_total",
        "Forward attempts by outcome",
        &["status"]
    )
    .expect("failed to register message counter")
});

static RATE_LIMIT_WAITS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "auto_forward_rate_limit_waits_total",
        "Number of server-requested rate-limit waits"
    )
    .expect("failed to register rate limit counter")
});

static RATE_LIMIT_SECONDS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "auto_forward_rate_limit_wait_seconds_total",
        "Seconds spent waiting on rate limits"
    )
    .expect("failed to register rate limit seconds counter")
});

static RUN_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    // Exponential buckets from 1s up to ~9 hours.
    let buckets =
        prometheus::exponential_buckets(1.0, 2.0, 16).expect("failed to create histogram buckets");
    register_histogram_vec!(
        "auto_forward_run_duration_seconds",
        "Duration of one resolve/enumerate/forward run",
        &["outcome"],
        buckets
    )
    .expect("failed to register run duration histogram")
});

/// Outcome of a single forward attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardOutcome {
    Forwarded,
    Gone,
    Failed,
}

impl ForwardOutcome {
    fn label(&self) -> &'static str {
        match self {
            ForwardOutcome::Forwarded => "forwarded",
            ForwardOutcome::Gone => "gone",
            ForwardOutcome::Failed => "failed",
        }
    }
}

/// Ensure collectors are registered.
fn init_collectors() {
    Lazy::force(&PROCESS_COLLECTOR);
    Lazy::force(&MESSAGES_TOTAL);
    Lazy::force(&RATE_LIMIT_WAITS);
    Lazy::force(&RATE_LIMIT_SECONDS);
    Lazy::force(&RUN_DURATION);
}

pub fn record_forward(outcome: ForwardOutcome) {
    init_collectors();
    MESSAGES_TOTAL.with_label_values(&[outcome.label()]).inc();
}

pub fn record_rate_limit(seconds: u32) {
    init_collectors();
    RATE_LIMIT_WAITS.inc();
    RATE_LIMIT_SECONDS.inc_by(u64::from(seconds));
}

pub fn record_run(duration: Duration, success: bool) {
    init_collectors();
    RUN_DURATION
        .with_label_values(&[if success { "ok" } else { "error" }])
        .observe(duration.as_secs_f64());
}

fn plain_response(status: StatusCode, body: Full<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    response
}

async fn metrics_response() -> Result<Response<Full<Bytes>>, Infallible> {
    init_collectors();
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", err);
        return Ok(plain_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            Full::from("encode error"),
        ));
    }

    let mut response = plain_response(StatusCode::OK, Full::from(buffer));
    if let Ok(value) = HeaderValue::from_str(encoder.format_type()) {
        response.headers_mut().insert(CONTENT_TYPE, value);
    }
    Ok(response)
}

async fn handle_request(req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    match req.uri().path() {
        "/metrics" => metrics_response().await,
        _ => Ok(plain_response(StatusCode::NOT_FOUND, Full::new(Bytes::new()))),
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

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[test]
    fn forward_outcomes_are_counted_by_label() {
        let before = MESSAGES_TOTAL.with_label_values(&["gone"]).get();
        record_forward(ForwardOutcome::Gone);
        record_forward(ForwardOutcome::Gone);
        assert!(MESSAGES_TOTAL.with_label_values(&["gone"]).get() >= before + 2);
    }

    #[test]
    fn rate_limit_waits_accumulate_seconds() {
        let waits = RATE_LIMIT_WAITS.get();
        let seconds = RATE_LIMIT_SECONDS.get();
        record_rate_limit(3);
        assert!(RATE_LIMIT_WAITS.get() > waits);
        assert!(RATE_LIMIT_SECONDS.get() >= seconds + 3);
    }

    #[test]
    fn run_duration_recorded() {
        record_run(Duration::from_secs(2), true);
        let histogram = RUN_DURATION.with_label_values(&["ok"]);
        assert!(histogram.get_sample_count() >= 1);
        assert!(histogram.get_sample_sum() >= 2.0);
    }

    #[tokio::test]
    async fn metrics_response_contains_registered_metrics() {
        record_forward(ForwardOutcome::Forwarded);

        let response = metrics_response().await.expect("metrics response");
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(CONTENT_TYPE).is_some());

        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("collect metrics body")
            .to_bytes();
        let text = String::from_utf8(body_bytes.to_vec()).expect("utf-8 metrics body");
        assert!(text.contains("auto_forward_messages_total"));
        assert!(text.contains("forwarded"));
    }
}
