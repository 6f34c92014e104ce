//! Directory access used by the password change providers.
//!
//! Providers talk to the directory through [`Connector`] and [`Session`]
//! so the LDAP wire protocol stays in [`ldap`]. Every call opens its own
//! session; nothing is shared between concurrent requests.

pub mod ldap;
#[cfg(test)]
pub mod memory;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use ldap3::{LdapError, Scope};
use thiserror::Error;

use crate::settings::AppSettings;

pub use self::ldap::LdapConnector;

pub type Result<T> = std::result::Result<T, DirectoryError>;

/// Active Directory password attribute.
pub const UNICODE_PWD: &str = "unicodePwd";

/// `invalidCredentials` result code.
pub const INVALID_CREDENTIALS: u32 = 49;
/// `constraintViolation` result code.
pub const CONSTRAINT_VIOLATION: u32 = 19;
/// `insufficientAccessRights` result code.
pub const INSUFFICIENT_ACCESS_RIGHTS: u32 = 50;
/// `unwillingToPerform` result code.
pub const UNWILLING_TO_PERFORM: u32 = 53;

/// Errors raised while talking to a directory server.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("cannot reach directory server: {0}")]
    Unreachable(String),

    #[error("directory operation timed out")]
    Timeout,

    #[error("directory returned code {code}: {text}")]
    Rejected { code: u32, text: String },

    #[error("directory protocol error: {0}")]
    Protocol(String),
}

impl DirectoryError {
    /// Whether the server could not be used at all, in which case the
    /// next configured host may be tried.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, DirectoryError::Unreachable(_) | DirectoryError::Timeout)
    }
}

impl From<LdapError> for DirectoryError {
    fn from(err: LdapError) -> Self {
        match err {
            LdapError::LdapResult { result } => DirectoryError::Rejected {
                code: result.rc,
                text: result.text,
            },
            LdapError::Timeout { .. } => DirectoryError::Timeout,
            LdapError::Io { .. }
            | LdapError::EndOfStream { .. }
            | LdapError::OpSend { .. }
            | LdapError::ResultRecv { .. } => {
                DirectoryError::Unreachable(err.to_string())
            },
            err => DirectoryError::Protocol(err.to_string()),
        }
    }
}

/// Transport security of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tls {
    None,
    /// TLS from the first byte (`ldaps://`).
    Ldaps,
    /// Plaintext upgraded with the StartTLS extended operation.
    StartTls,
}

/// Where and how to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub tls: Tls,
    pub no_tls_verify: bool,
    pub timeout: Duration,
}

impl Endpoint {
    /// Build the endpoint of `host` from provider settings.
    pub fn new(host: &str, settings: &dyn AppSettings) -> Self {
        let tls = if settings.ldap_secure_socket_layer() {
            Tls::Ldaps
        } else if settings.ldap_start_tls() {
            Tls::StartTls
        } else {
            Tls::None
        };

        Self {
            host: host.trim().to_owned(),
            port: settings.ldap_port(),
            tls,
            no_tls_verify: settings.ldap_ignore_tls_validation(),
            timeout: settings.ldap_timeout(),
        }
    }

    pub fn url(&self) -> String {
        let scheme = match self.tls {
            Tls::Ldaps => "ldaps",
            Tls::None | Tls::StartTls => "ldap",
        };
        format!("{scheme}://{}:{}", self.host, self.port)
    }
}

/// An entry returned by a search.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Entry {
    pub dn: String,
    pub attrs: HashMap<String, Vec<String>>,
}

impl Entry {
    /// Values of `attr`, compared case-insensitively.
    pub fn values(&self, attr: &str) -> &[String] {
        self.attrs
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(attr))
            .map(|(_, values)| values.as_slice())
            .unwrap_or_default()
    }
}

/// Modification applied to the password attribute.
#[derive(Clone, PartialEq, Eq)]
pub enum PasswordChange {
    /// Delete the old value and add the new one in a single modify. The
    /// server refuses the delete when the old value is wrong.
    DeleteAdd { old: Vec<u8>, new: Vec<u8> },
    /// Overwrite the value. Requires reset rights.
    Replace { new: Vec<u8> },
}

impl PasswordChange {
    pub fn delete_add(old: &str, new: &str) -> Self {
        PasswordChange::DeleteAdd {
            old: encode_password(old),
            new: encode_password(new),
        }
    }

    pub fn replace(new: &str) -> Self {
        PasswordChange::Replace {
            new: encode_password(new),
        }
    }
}

impl std::fmt::Debug for PasswordChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PasswordChange::DeleteAdd { .. } => f
                .debug_struct("DeleteAdd")
                .field("old", &"[REDACTED]")
                .field("new", &"[REDACTED]")
                .finish(),
            PasswordChange::Replace { .. } => f
                .debug_struct("Replace")
                .field("new", &"[REDACTED]")
                .finish(),
        }
    }
}

/// Opens sessions to a directory server.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Session>>;
}

/// A single connection, owned by one request.
#[async_trait]
pub trait Session: Send {
    async fn bind(&mut self, dn: &str, password: &str) -> Result<()>;

    async fn search(
        &mut self,
        base: &str,
        scope: Scope,
        filter: &str,
        attrs: &[&str],
    ) -> Result<Vec<Entry>>;

    async fn modify_password(
        &mut self,
        dn: &str,
        change: &PasswordChange,
    ) -> Result<()>;

    async fn unbind(&mut self) -> Result<()>;
}

/// Connect to the first reachable host of `settings`, in configuration
/// order. Each host is tried once.
pub async fn connect_first(
    connector: &dyn Connector,
    settings: &dyn AppSettings,
) -> Result<Box<dyn Session>> {
    let mut last_error =
        DirectoryError::Unreachable("no directory hostname configured".into());

    for host in settings.ldap_hostnames() {
        let endpoint = Endpoint::new(host, settings);

        match connector.connect(&endpoint).await {
            Ok(session) => {
                tracing::debug!(%host, port = endpoint.port, "directory connected");
                return Ok(session);
            },
            Err(err) if err.is_unavailable() => {
                tracing::warn!(%host, error = %err, "directory unreachable");
                last_error = err;
            },
            Err(err) => return Err(err),
        }
    }

    Err(last_error)
}

/// Read `defaultNamingContext` from the root DSE.
pub async fn default_naming_context(
    session: &mut dyn Session,
) -> Result<String> {
    let entries = session
        .search("", Scope::Base, "(objectClass=*)", &["defaultNamingContext"])
        .await?;

    entries
        .first()
        .and_then(|entry| entry.values("defaultNamingContext").first())
        .cloned()
        .ok_or_else(|| {
            DirectoryError::Protocol(
                "root DSE has no defaultNamingContext".into(),
            )
        })
}

/// Encode a password for `unicodePwd`: surrounded by double quotes, then
/// UTF-16LE.
pub fn encode_password(password: &str) -> Vec<u8> {
    format!("\"{password}\"")
        .encode_utf16()
        .flat_map(u16::to_le_bytes)
        .collect()
}

/// Strip a `DOMAIN\` prefix and an `@domain` suffix from a logon name.
pub fn clean_username(username: &str) -> &str {
    let username = username.trim();
    let username = match username.rfind('\\') {
        Some(index) => &username[index + 1..],
        None => username,
    };
    match username.find('@') {
        Some(index) => &username[..index],
        None => username,
    }
}
