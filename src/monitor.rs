//! Backend liveness probe
//!
//! Advisory only: a failed probe marks the backend unreachable and never
//! touches the turn cycle. There is no built-in polling timer.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::backend::SystemStatus;
use crate::NetworkError;

/// Anything that can report backend status
#[async_trait]
pub trait StatusEndpoint: Send + Sync {
    async fn system_status(&self) -> Result<SystemStatus, NetworkError>;
}

/// Last known backend reachability
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStatus {
    /// Whether the last probe succeeded
    pub reachable: bool,
    /// When the last probe completed; `None` before the first probe
    pub last_checked_at: Option<DateTime<Utc>>,
}

/// Probes the backend on demand
#[derive(Clone, Default)]
pub struct ConnectionMonitor {
    endpoint: Option<Arc<dyn StatusEndpoint>>,
}

impl std::fmt::Debug for ConnectionMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionMonitor")
            .field("configured", &self.endpoint.is_some())
            .finish()
    }
}

impl ConnectionMonitor {
    #[must_use]
    pub fn new(endpoint: Arc<dyn StatusEndpoint>) -> Self {
        Self {
            endpoint: Some(endpoint),
        }
    }

    /// Monitor with nothing to probe; always reports unreachable
    #[must_use]
    pub fn disabled() -> Self {
        Self { endpoint: None }
    }

    /// Probe once; never fails
    pub async fn probe(&self) -> ConnectionStatus {
        let reachable = match &self.endpoint {
            None => false,
            Some(endpoint) => match endpoint.system_status().await {
                Ok(status) => {
                    tracing::debug!(
                        status = ?status.status,
                        emotion = ?status.current_emotion,
                        "backend reachable"
                    );
                    true
                }
                Err(e) => {
                    tracing::warn!(error = %e, "backend probe failed");
                    false
                }
            },
        };

        ConnectionStatus {
            reachable,
            last_checked_at: Some(Utc::now()),
        }
    }
}
