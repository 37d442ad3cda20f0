//! Top-level startup supervisor.
//!
//! Wraps [`Backbone::start`] with the configured startup bound and reports
//! the outcome as structured log records. Startup failures are returned to
//! the caller, never swallowed.

use crate::backbone::{Backbone, ServiceLayer};
use crate::types::{Config, Error, Result};

/// Start a backbone from `layers` under `config`.
pub async fn supervise(layers: Vec<ServiceLayer>, config: &Config) -> Result<Backbone> {
    let declared: usize = layers.iter().map(ServiceLayer::len).sum();
    tracing::debug!(layers = layers.len(), services = declared, "backbone startup");

    let startup = Backbone::start(layers);
    let outcome = match config.backbone.startup_timeout {
        Some(limit) => match tokio::time::timeout(limit, startup).await {
            Ok(result) => result,
            Err(_) => Err(Error::timeout(format!("backbone startup exceeded {limit:?}"))),
        },
        None => startup.await,
    };

    match &outcome {
        Ok(backbone) => {
            tracing::info!(services = ?backbone.names(), "backbone started");
        }
        Err(err) => {
            tracing::error!(
                code = err.code(),
                fatal = err.is_startup_fatal(),
                error = %err,
                "backbone startup failed"
            );
        }
    }
    outcome
}
