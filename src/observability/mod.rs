//! Logging and metrics shared by the gateway and `backup-cli`.
//!
//! Gateway requests log under the `x-request-id` span from tower-http;
//! backup runs log with their `run_id`. Metrics are recorded unconditionally
//! and only exported when `observability.metrics_enabled` installs the
//! Prometheus recorder.

pub mod logging;
pub mod metrics;
