//! Express Recorder - record, review and upload clips from an embedded widget.
//!
//! This is the main library crate for the recorder. The host supplies the
//! platform boundaries (device API, media encoder and optionally the media
//! service) and drives the recorder through a [`SessionController`].

pub mod capture;
pub mod config;
pub mod controller;
pub mod events;
pub mod guard;
pub mod i18n;
pub mod recorder;
pub mod upload;
pub mod utils;

#[cfg(test)]
mod testing;

use anyhow::Context;
use capture::traits::{EncoderFactory, MediaDevices};
use config::RecorderConfig;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use upload::{HttpMediaService, MediaService};

pub use controller::SessionController;
pub use utils::error::{ErrorKind, ErrorResponse, RecorderError, RecorderResult};

/// Crate version reported to hosts
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize logging. Safe to call more than once.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "express_recorder=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

/// Platform boundaries provided by the host
pub struct Platform {
    pub devices: Arc<dyn MediaDevices>,
    pub encoders: Arc<dyn EncoderFactory>,
    /// Defaults to the HTTP client built from the configuration
    pub service: Option<Arc<dyn MediaService>>,
}

/// An embedded recorder
pub struct RecorderHandle {
    pub instance: Arc<SessionController>,
    pub version: &'static str,
    pub element_id: String,
}

impl RecorderHandle {
    /// Tear the recorder down. Idempotent.
    pub fn destroy(&self) {
        self.instance.destroy();
    }
}

/// Embed a recorder for `element_id` configured by `config_json`.
///
/// Fatal configuration and platform errors fail creation. Recoverable
/// errors (a denied device, for example) leave the recorder in its error
/// state so the host can show it and offer a reset.
pub async fn create(
    element_id: &str,
    config_json: &str,
    platform: Platform,
) -> anyhow::Result<RecorderHandle> {
    let config = RecorderConfig::from_json_str(config_json)
        .context("Failed to parse recorder configuration")?;

    let service = match platform.service {
        Some(service) => service,
        None => http_service(&config)?,
    };

    let instance = Arc::new(SessionController::new(
        config,
        platform.devices,
        platform.encoders,
        service,
    ));

    if let Err(e) = instance.initialize().await {
        if e.kind().is_fatal() {
            return Err(e).with_context(|| format!("Failed to create recorder '{}'", element_id));
        }
        tracing::warn!("Recorder '{}' starts in error state: {}", element_id, e);
    }

    tracing::info!("Express Recorder v{} created for '{}'", VERSION, element_id);
    Ok(RecorderHandle {
        instance,
        version: VERSION,
        element_id: element_id.to_string(),
    })
}

fn http_service(config: &RecorderConfig) -> anyhow::Result<Arc<dyn MediaService>> {
    config
        .validate()
        .context("Invalid recorder configuration")?;

    let (Some(service_url), Some(ks), Some(partner_id)) =
        (&config.service_url, &config.ks, config.partner_id)
    else {
        anyhow::bail!("Invalid recorder configuration: missing service credentials");
    };

    let service = HttpMediaService::new(service_url, ks, partner_id, config.request_timeout())
        .context("Failed to create media service client")?;
    Ok(Arc::new(service))
}
