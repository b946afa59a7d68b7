use std::env;

use serde::{Deserialize, Serialize};

use crate::Certificate;

pub const ENV_NON_INTERACTIVE: &str = "TRUST_STORE_NON_INTERACTIVE";

/// Asks an operator whether an otherwise untrusted certificate should be
/// trusted from now on.
///
/// `confirm` is synchronous and may block the calling handshake thread for
/// as long as the operator takes to answer; there is no timeout. Run
/// non-interactive deployments with [`InteractionMode::NonInteractive`] so
/// that the gateway is never consulted.
pub trait ConfirmationGateway: Send + Sync {
    fn confirm(&self, certificate: &Certificate) -> bool;
}

impl<F> ConfirmationGateway for F
where
    F: Fn(&Certificate) -> bool + Send + Sync,
{
    fn confirm(&self, certificate: &Certificate) -> bool {
        self(certificate)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionMode {
    /// Untrusted chains are put to the confirmation gateway.
    Interactive,
    /// Headless or automated runs: untrusted chains are accepted and stored
    /// without consulting the gateway.
    NonInteractive,
}

impl Default for InteractionMode {
    fn default() -> Self {
        Self::Interactive
    }
}

impl InteractionMode {
    /// Reads [`ENV_NON_INTERACTIVE`]; `1`, `true` or `yes` select
    /// `NonInteractive`.
    pub fn detect() -> Self {
        Self::from_flag(env::var(ENV_NON_INTERACTIVE).ok().as_deref())
    }

    pub fn from_flag(value: Option<&str>) -> Self {
        match value.map(|value| value.trim().to_ascii_lowercase()) {
            Some(value) if matches!(value.as_str(), "1" | "true" | "yes") => Self::NonInteractive,
            _ => Self::Interactive,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Interactive => "interactive",
            Self::NonInteractive => "non_interactive",
        }
    }
}
