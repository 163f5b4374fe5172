//! Logging capability handed to cache stores.
//!
//! Stores never reach for a global logger. Each holds a [`CacheLogger`],
//! built either explicitly or from process-wide defaults installed once at
//! startup with [`init_defaults`].
//!
//! Messages go through one of two channels. The plain channel must not carry
//! PII and is always emitted. The PII channel is emitted only when the logger
//! was built with `pii_enabled`.
//!
//! A message that exists in both a redacted and a detailed form is logged
//! with the `*_no_pii` and `*_pii` pair: exactly one of the two is emitted.

use std::fmt::Display;

use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::Level;

use crate::context::RequestContext;

static DEFAULTS: OnceCell<LoggerConfig> = OnceCell::new();

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggerConfig {
    /// Allow messages that may contain user identifiers
    #[serde(default)]
    pub pii_enabled: bool,
}

/// Install process-wide defaults. Only the first call wins; returns whether
/// this call did.
pub fn init_defaults(config: LoggerConfig) -> bool {
    DEFAULTS.set(config).is_ok()
}

/// Defaults installed by [`init_defaults`], or PII off if none were
pub fn defaults() -> LoggerConfig {
    DEFAULTS.get().copied().unwrap_or_default()
}

/// Render an optional value without revealing it
pub fn pii_presence<T>(value: Option<T>) -> &'static str {
    match value {
        Some(_) => "(not-null)",
        None => "(null)",
    }
}

/// Short non-reversible fingerprint of a token, safe for any log channel
pub fn token_fingerprint(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    hex::encode(&digest[..6])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheLogger {
    pii_enabled: bool,
}

impl CacheLogger {
    pub fn new(config: LoggerConfig) -> Self {
        Self {
            pii_enabled: config.pii_enabled,
        }
    }

    pub fn from_defaults() -> Self {
        Self::new(defaults())
    }

    pub fn pii_enabled(&self) -> bool {
        self.pii_enabled
    }

    pub fn error(&self, context: &RequestContext, message: impl Display) {
        emit(Level::ERROR, context, false, &message);
    }

    pub fn error_pii(&self, context: &RequestContext, message: impl Display) {
        if self.pii_enabled {
            emit(Level::ERROR, context, true, &message);
        }
    }

    pub fn warn(&self, context: &RequestContext, message: impl Display) {
        emit(Level::WARN, context, false, &message);
    }

    pub fn warn_pii(&self, context: &RequestContext, message: impl Display) {
        if self.pii_enabled {
            emit(Level::WARN, context, true, &message);
        }
    }

    /// Redacted counterpart of [`Self::warn_pii`]; silent when PII is enabled
    pub fn warn_no_pii(&self, context: &RequestContext, message: impl Display) {
        if !self.pii_enabled {
            emit(Level::WARN, context, false, &message);
        }
    }

    pub fn info(&self, context: &RequestContext, message: impl Display) {
        emit(Level::INFO, context, false, &message);
    }

    pub fn info_pii(&self, context: &RequestContext, message: impl Display) {
        if self.pii_enabled {
            emit(Level::INFO, context, true, &message);
        }
    }

    /// Redacted counterpart of [`Self::info_pii`]; silent when PII is enabled
    pub fn info_no_pii(&self, context: &RequestContext, message: impl Display) {
        if !self.pii_enabled {
            emit(Level::INFO, context, false, &message);
        }
    }

    pub fn verbose(&self, context: &RequestContext, message: impl Display) {
        emit(Level::DEBUG, context, false, &message);
    }

    pub fn verbose_pii(&self, context: &RequestContext, message: impl Display) {
        if self.pii_enabled {
            emit(Level::DEBUG, context, true, &message);
        }
    }

    /// Redacted counterpart of [`Self::verbose_pii`]; silent when PII is enabled
    pub fn verbose_no_pii(&self, context: &RequestContext, message: impl Display) {
        if !self.pii_enabled {
            emit(Level::DEBUG, context, false, &message);
        }
    }

    /// Log a token by fingerprint only
    pub fn token(
        &self,
        context: &RequestContext,
        token: &str,
        token_type: impl Display,
        expires_on: Option<DateTime<Utc>>,
        note: impl Display,
    ) {
        let expiry = expires_on
            .map(|at| at.to_rfc3339())
            .unwrap_or_else(|| "(none)".to_string());
        emit(
            Level::INFO,
            context,
            false,
            &format_args!(
                "{} {} (fingerprint {}) expires on {}",
                note,
                token_type,
                token_fingerprint(token),
                expiry
            ),
        );
    }
}

impl Default for CacheLogger {
    fn default() -> Self {
        Self::from_defaults()
    }
}

fn emit(level: Level, context: &RequestContext, pii: bool, message: &dyn Display) {
    let correlation_id = context.correlation_id();
    let component = context.component_name().unwrap_or("-");

    if level == Level::ERROR {
        tracing::error!(%correlation_id, component, pii, "{}", message);
    } else if level == Level::WARN {
        tracing::warn!(%correlation_id, component, pii, "{}", message);
    } else if level == Level::INFO {
        tracing::info!(%correlation_id, component, pii, "{}", message);
    } else {
        tracing::debug!(%correlation_id, component, pii, "{}", message);
    }
}
