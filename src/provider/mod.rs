//! Password change providers.
//!
//! Exactly one provider is built at startup and shared by every request.
//! Providers only hold immutable settings and a [`Connector`]; each call
//! opens its own directory session.

pub mod debug;
pub mod direct;
pub mod ldap;

use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::Configuration;
use crate::directory::{
    CONSTRAINT_VIOLATION, Connector, DirectoryError,
    INSUFFICIENT_ACCESS_RIGHTS, INVALID_CREDENTIALS, UNWILLING_TO_PERFORM,
};
use crate::error::PasswordError;
use crate::password::Password;

pub use self::debug::DebugPasswordChangeProvider;
pub use self::direct::DirectPasswordChangeProvider;
pub use self::ldap::LdapPasswordChangeProvider;

/// AD sub-code: the current password is wrong.
const AD_WRONG_PASSWORD: &str = "00000056";
/// AD sub-code: the new password violates the password policy.
const AD_PASSWORD_POLICY: &str = "0000052D";

/// A validated change password request.
#[derive(Debug, Clone)]
pub struct PasswordChangeRequest {
    pub username: String,
    pub current_password: Password,
    pub new_password: Password,
}

/// Changes the password of a user.
#[async_trait]
pub trait PasswordChangeProvider: Send + Sync {
    /// Short name used in logs and metrics.
    fn name(&self) -> &'static str;

    /// Longest time a call to [`Self::change_password`] may take.
    fn deadline(&self) -> Duration {
        Duration::ZERO
    }

    async fn change_password(
        &self,
        request: &PasswordChangeRequest,
    ) -> Result<(), PasswordError>;
}

/// Provider selected at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Debug,
    Direct,
    Ldap,
}

impl Default for ProviderKind {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            ProviderKind::Debug
        } else {
            ProviderKind::Ldap
        }
    }
}

impl FromStr for ProviderKind {
    type Err = PasswordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Ok(ProviderKind::Debug),
            "direct" => Ok(ProviderKind::Direct),
            "ldap" => Ok(ProviderKind::Ldap),
            other => Err(PasswordError::Configuration(format!(
                "unknown provider `{other}`, expected `debug`, `direct` or `ldap`"
            ))),
        }
    }
}

/// Build the provider selected by `config`.
pub fn build(
    config: &Configuration,
    connector: Arc<dyn Connector>,
) -> Result<Arc<dyn PasswordChangeProvider>, PasswordError> {
    let provider: Arc<dyn PasswordChangeProvider> = match config.provider {
        ProviderKind::Debug => {
            Arc::new(DebugPasswordChangeProvider::new(config.app_settings()?))
        },
        ProviderKind::Direct => Arc::new(DirectPasswordChangeProvider::new(
            config.app_settings()?,
            connector,
        )?),
        ProviderKind::Ldap => Arc::new(LdapPasswordChangeProvider::new(
            config.app_settings()?,
            connector,
        )?),
    };

    tracing::info!(provider = provider.name(), "password change provider ready");
    Ok(provider)
}

/// Time a whole provider call may take. Every host may use one `timeout`
/// for each of the `connections`, then each round trip one more.
pub(crate) fn call_deadline(
    timeout: Duration,
    hosts: usize,
    connections: u32,
    round_trips: u32,
) -> Duration {
    let hosts = u32::try_from(hosts).unwrap_or(u32::MAX);
    let steps = hosts.saturating_mul(connections).saturating_add(round_trips);
    timeout.saturating_mul(steps)
}

/// Run a provider call, giving up with
/// [`PasswordError::DirectoryUnavailable`] after `deadline`.
pub(crate) async fn bounded<F>(
    deadline: Duration,
    operation: F,
) -> Result<(), PasswordError>
where
    F: Future<Output = Result<(), PasswordError>>,
{
    tokio::time::timeout(deadline, operation)
        .await
        .unwrap_or_else(|_| {
            tracing::warn!(?deadline, "directory did not answer in time");
            Err(PasswordError::DirectoryUnavailable)
        })
}

impl From<DirectoryError> for PasswordError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::Unreachable(_) | DirectoryError::Timeout => {
                PasswordError::DirectoryUnavailable
            },
            DirectoryError::Rejected { ref text, .. }
                if text.contains(AD_PASSWORD_POLICY) =>
            {
                PasswordError::PolicyRejected
            },
            DirectoryError::Rejected { ref text, .. }
                if text.contains(AD_WRONG_PASSWORD) =>
            {
                PasswordError::InvalidCredentials
            },
            DirectoryError::Rejected { code, .. } => match code {
                INVALID_CREDENTIALS => PasswordError::InvalidCredentials,
                CONSTRAINT_VIOLATION => PasswordError::PolicyRejected,
                INSUFFICIENT_ACCESS_RIGHTS | UNWILLING_TO_PERFORM => {
                    PasswordError::ChangeNotPermitted
                },
                _ => {
                    tracing::error!(error = %err, "unexpected directory result");
                    PasswordError::Internal
                },
            },
            DirectoryError::Protocol(_) => {
                tracing::error!(error = %err, "directory protocol error");
                PasswordError::Internal
            },
        }
    }
}
