//! Observability module for Pylon
//!
//! This module provides Prometheus exposition of the router state.
//! It's only available when the 'observability' feature is enabled.

#[cfg(feature = "observability")]
pub mod prometheus_metrics {
    use crate::app::AppState;
    use ::prometheus::{Gauge, GaugeVec, Opts, Registry, TextEncoder};
    use axum::{extract::State, http::StatusCode, response::IntoResponse};
    use pylon_loadbalance::RouterService;
    use std::sync::Arc;

    /// Prometheus metrics collector
    ///
    /// All values are gauges refreshed from the router snapshot at scrape time.
    #[derive(Clone)]
    pub struct PrometheusMetrics {
        pub registry: Arc<Registry>,
        pub requests: GaugeVec,
        pub average_response_time_ms: Gauge,
        pub success_rate_percent: Gauge,
        pub healthy_endpoints: Gauge,
        pub endpoint_health_status: GaugeVec,
        pub endpoint_requests_this_window: GaugeVec,
        pub endpoint_error_count: GaugeVec,
        pub endpoint_latency_ms: GaugeVec,
    }

    impl PrometheusMetrics {
        pub fn new() -> Result<Self, ::prometheus::Error> {
            let registry = Arc::new(Registry::new());

            let requests = GaugeVec::new(
                Opts::new("requests", "Dispatched attempts by outcome").namespace("pylon"),
                &["outcome"],
            )?;

            let average_response_time_ms = Gauge::with_opts(
                Opts::new("average_response_time_ms", "Mean attempt latency in milliseconds")
                    .namespace("pylon"),
            )?;

            let success_rate_percent = Gauge::with_opts(
                Opts::new("success_rate_percent", "Share of successful attempts")
                    .namespace("pylon"),
            )?;

            let healthy_endpoints = Gauge::with_opts(
                Opts::new("healthy_endpoints", "Number of endpoints in rotation")
                    .namespace("pylon"),
            )?;

            let endpoint_health_status = GaugeVec::new(
                Opts::new(
                    "endpoint_health_status",
                    "Health status of endpoints (1 = healthy, 0 = unhealthy)",
                )
                    .namespace("pylon"),
                &["endpoint"],
            )?;

            let endpoint_requests_this_window = GaugeVec::new(
                Opts::new(
                    "endpoint_requests_this_window",
                    "Successful requests in the current window",
                )
                    .namespace("pylon"),
                &["endpoint"],
            )?;

            let endpoint_error_count = GaugeVec::new(
                Opts::new("endpoint_error_count", "Lifetime failures observed per endpoint")
                    .namespace("pylon"),
                &["endpoint"],
            )?;

            let endpoint_latency_ms = GaugeVec::new(
                Opts::new("endpoint_latency_ms", "Smoothed endpoint latency in milliseconds")
                    .namespace("pylon"),
                &["endpoint"],
            )?;

            registry.register(Box::new(requests.clone()))?;
            registry.register(Box::new(average_response_time_ms.clone()))?;
            registry.register(Box::new(success_rate_percent.clone()))?;
            registry.register(Box::new(healthy_endpoints.clone()))?;
            registry.register(Box::new(endpoint_health_status.clone()))?;
            registry.register(Box::new(endpoint_requests_this_window.clone()))?;
            registry.register(Box::new(endpoint_error_count.clone()))?;
            registry.register(Box::new(endpoint_latency_ms.clone()))?;

            Ok(Self {
                registry,
                requests,
                average_response_time_ms,
                success_rate_percent,
                healthy_endpoints,
                endpoint_health_status,
                endpoint_requests_this_window,
                endpoint_error_count,
                endpoint_latency_ms,
            })
        }

        /// Update metrics from router state
        pub fn update_from_service(&self, service: &RouterService) {
            let snapshot = service.get_metrics_snapshot();

            self.requests
                .with_label_values(&["success"])
                .set(snapshot.successful_requests as f64);
            self.requests
                .with_label_values(&["rate_limited"])
                .set(snapshot.rate_limited_requests as f64);
            self.requests
                .with_label_values(&["forbidden"])
                .set(snapshot.forbidden_requests as f64);
            self.requests
                .with_label_values(&["other"])
                .set(snapshot.other_errors as f64);
            self.average_response_time_ms.set(snapshot.average_response_time_ms);
            self.success_rate_percent.set(snapshot.success_rate_percent);
            self.healthy_endpoints.set(snapshot.healthy_endpoint_count as f64);

            for endpoint in service.registry().snapshots() {
                let label = [endpoint.name.as_str()];
                self.endpoint_health_status
                    .with_label_values(&label)
                    .set(if endpoint.is_healthy() { 1.0 } else { 0.0 });
                self.endpoint_requests_this_window
                    .with_label_values(&label)
                    .set(f64::from(endpoint.requests_this_window));
                self.endpoint_error_count
                    .with_label_values(&label)
                    .set(endpoint.error_count as f64);
                self.endpoint_latency_ms
                    .with_label_values(&label)
                    .set(endpoint.average_latency_ms as f64);
            }
        }

        pub fn encode(&self) -> Result<String, ::prometheus::Error> {
            TextEncoder::new().encode_to_string(&self.registry.gather())
        }
    }

    /// Prometheus metrics endpoint handler
    pub async fn prometheus_metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
        let Some(ref metrics) = state.prometheus_metrics else {
            return (StatusCode::NOT_FOUND, "Prometheus registry unavailable").into_response();
        };

        metrics.update_from_service(&state.service);

        match metrics.encode() {
            Ok(output) => (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4")],
                output,
            )
                .into_response(),
            Err(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
                .into_response(),
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use pylon_core::config::model::{EndpointConfig, GlobalSettings, ServerSettings};
        use pylon_core::{Config, ErrorClass};

        #[test]
        fn test_exposition_includes_endpoint_gauges() {
            let config = Config {
                endpoints: vec![
                    EndpointConfig::new("alpha", "https://alpha.example.com", 10),
                    EndpointConfig::new("beta", "https://beta.example.com", 10),
                ],
                settings: GlobalSettings::default(),
                server: ServerSettings::default(),
            };
            let service = RouterService::new(config).unwrap();
            service.registry().mark_failure("beta", ErrorClass::Forbidden);

            let metrics = PrometheusMetrics::new().unwrap();
            metrics.update_from_service(&service);
            let output = metrics.encode().unwrap();

            assert!(output.contains("pylon_endpoint_health_status{endpoint=\"alpha\"} 1"));
            assert!(output.contains("pylon_endpoint_health_status{endpoint=\"beta\"} 0"));
            assert!(output.contains("pylon_healthy_endpoints 1"));
            assert!(output.contains("pylon_requests{outcome=\"success\"} 0"));
        }
    }
}
