use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use tokio::signal::unix::SignalKind;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Heartbeat of the ingestion worker. The worker calls `report_healthy` as it makes
/// progress. The probe fails once a report is older than the deadline.
#[derive(Clone)]
pub struct Liveness {
    healthy_until_ms: Arc<AtomicI64>,
    deadline: Duration,
}

impl Liveness {
    /// Starts out healthy for one deadline, so the probe passes while the first
    /// cycle runs.
    pub fn new(deadline: Duration) -> Self {
        let liveness = Self {
            healthy_until_ms: Arc::new(AtomicI64::new(0)),
            deadline,
        };
        liveness.report_healthy();
        liveness
    }

    pub fn report_healthy(&self) {
        let deadline_ms = i64::try_from(self.deadline.as_millis()).unwrap_or(i64::MAX);
        let until = Utc::now().timestamp_millis().saturating_add(deadline_ms);
        self.healthy_until_ms.store(until, Ordering::Relaxed);
    }

    pub fn is_healthy(&self) -> bool {
        Utc::now().timestamp_millis() < self.healthy_until_ms.load(Ordering::Relaxed)
    }

    pub fn check(&self) -> LivenessStatus {
        LivenessStatus {
            healthy: self.is_healthy(),
        }
    }
}

pub struct LivenessStatus {
    pub healthy: bool,
}

impl IntoResponse for LivenessStatus {
    fn into_response(self) -> Response {
        match self.healthy {
            true => (StatusCode::OK, "ok"),
            false => (StatusCode::SERVICE_UNAVAILABLE, "stalled"),
        }
        .into_response()
    }
}

/// Returns 200 until shutdown begins, 503 afterwards.
#[derive(Clone)]
pub struct Readiness {
    shutdown_token: CancellationToken,
}

impl Readiness {
    pub fn new(shutdown_token: CancellationToken) -> Self {
        Self { shutdown_token }
    }

    pub fn check(&self) -> StatusCode {
        if self.shutdown_token.is_cancelled() {
            StatusCode::SERVICE_UNAVAILABLE
        } else {
            StatusCode::OK
        }
    }
}

pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    let mut sigterm = tokio::signal::unix::signal(SignalKind::terminate())?;

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res?;
            info!("received SIGINT");
        }
        _ = sigterm.recv() => info!("received SIGTERM"),
    }
    Ok(())
}
