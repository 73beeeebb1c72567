//! Prometheus metrics HTTP endpoint
//!
//! Exposes service counters in Prometheus text format at /metrics, plus /health.
//! Uses hyper for the HTTP server.

use crate::infra::metrics::{
    Metrics, MetricsSummary, FAILURE_KINDS, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS,
};
use crate::infra::shutdown::wait_for_shutdown;
use crate::services::deliveries::DeliveryRegistry;
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric (counter or gauge) with service label
fn write_metric(output: &mut String, name: &str, help: &str, typ: MetricType, service: &str, val: u64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{service=\"{service}\"}} {val}");
}

fn write_latency_histogram(output: &mut String, service: &str, summary: &MetricsSummary) {
    let name = "route_sim_message_latency_us";
    let _ = writeln!(output, "# HELP {name} Inbound message handling latency in microseconds");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let buckets = &summary.handle_latency_buckets;
    let mut cumulative = 0u64;
    for (i, &bound) in METRICS_BUCKET_BOUNDS.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{service=\"{service}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{service=\"{service}\",le=\"+Inf\"}} {cumulative}");
    let _ = writeln!(output, "{name}_sum{{service=\"{service}\"}} {}", summary.handle_latency_sum_us);
    let _ = writeln!(output, "{name}_count{{service=\"{service}\"}} {cumulative}");
}

/// Format metrics in Prometheus text exposition format
pub fn format_prometheus_metrics(metrics: &Metrics, active_deliveries: usize, service: &str) -> String {
    let summary = metrics.snapshot(active_deliveries);
    let mut output = String::with_capacity(4096);

    write_metric(
        &mut output,
        "route_sim_messages_received_total",
        "Inbound payloads read from the route topic",
        MetricType::Counter,
        service,
        summary.messages_received,
    );
    write_metric(
        &mut output,
        "route_sim_messages_handled_total",
        "Inbound payloads handled without error",
        MetricType::Counter,
        service,
        summary.messages_handled,
    );

    let name = "route_sim_messages_failed_total";
    let _ = writeln!(output, "# HELP {name} Inbound payloads dropped, by error kind");
    let _ = writeln!(output, "# TYPE {name} counter");
    for (kind, count) in FAILURE_KINDS.iter().zip(summary.failures.iter()) {
        let _ = writeln!(output, "{name}{{service=\"{service}\",kind=\"{kind}\"}} {count}");
    }

    write_metric(
        &mut output,
        "route_sim_messages_in_flight",
        "Inbound payloads currently being handled",
        MetricType::Gauge,
        service,
        summary.in_flight,
    );
    write_latency_histogram(&mut output, service, &summary);
    write_metric(
        &mut output,
        "route_sim_freight_published_total",
        "FreightCalculated events published",
        MetricType::Counter,
        service,
        summary.freight_published,
    );
    write_metric(
        &mut output,
        "route_sim_deliveries_started_total",
        "Deliveries launched",
        MetricType::Counter,
        service,
        summary.deliveries_started,
    );
    write_metric(
        &mut output,
        "route_sim_deliveries_finished_total",
        "Deliveries whose producer and publisher have both exited",
        MetricType::Counter,
        service,
        summary.deliveries_finished,
    );
    write_metric(
        &mut output,
        "route_sim_deliveries_active",
        "Deliveries currently running",
        MetricType::Gauge,
        service,
        summary.active_deliveries as u64,
    );
    write_metric(
        &mut output,
        "route_sim_positions_produced_total",
        "Positions emitted by simulators",
        MetricType::Counter,
        service,
        summary.positions_produced,
    );
    write_metric(
        &mut output,
        "route_sim_positions_published_total",
        "DriverMoved events published",
        MetricType::Counter,
        service,
        summary.positions_published,
    );
    write_metric(
        &mut output,
        "route_sim_position_publish_failures_total",
        "DriverMoved publishes that failed",
        MetricType::Counter,
        service,
        summary.position_publish_failures,
    );
    write_metric(
        &mut output,
        "route_sim_idle_timeouts_total",
        "Publisher loops stopped by the idle guard",
        MetricType::Counter,
        service,
        summary.idle_timeouts,
    );

    output
}

fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
    registry: Arc<DeliveryRegistry>,
    service: Arc<String>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => {
            let body = format_prometheus_metrics(&metrics, registry.len(), &service);
            let mut response = text_response(StatusCode::OK, body);
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; version=0.0.4"));
            Ok(response)
        }
        (&Method::GET, "/health") => Ok(text_response(StatusCode::OK, "ok")),
        _ => Ok(text_response(StatusCode::NOT_FOUND, "Not Found")),
    }
}

/// Start the Prometheus metrics HTTP server
pub async fn start_metrics_server(
    port: u16,
    metrics: Arc<Metrics>,
    registry: Arc<DeliveryRegistry>,
    service: String,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    let service = Arc::new(service);

    info!(port = %port, "prometheus_metrics_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let metrics = metrics.clone();
                        let registry = registry.clone();
                        let service = service.clone();

                        tokio::spawn(async move {
                            let svc = service_fn(move |req| {
                                handle_request(req, metrics.clone(), registry.clone(), service.clone())
                            });

                            if let Err(e) = http1::Builder::new().serve_connection(io, svc).await {
                                error!(error = %e, "prometheus_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "prometheus_accept_error");
                    }
                }
            }
            _ = wait_for_shutdown(&mut shutdown) => {
                info!("prometheus_metrics_server_shutdown");
                return Ok(());
            }
        }
    }
}
