//! Options of the LDAP provider.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::settings::{
    AppSettings, DEFAULT_LDAP_PORT, DEFAULT_SEARCH_FILTER,
    DEFAULT_TIMEOUT_SECS,
};

/// LDAP configuration, bound from the `AppSettings` section.
///
/// Every field is stored as an [`Option`] and resolved when read, so
/// writing "nothing" and reading it back always yields the documented
/// default.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LdapPasswordChangeOptions {
    ldap_hostnames: Option<Vec<String>>,
    ldap_password: Option<String>,
    ldap_username: Option<String>,
    default_domain: Option<String>,
    ldap_port: Option<u16>,
    /// Port speaks TLS from the first byte. Usually `true` with 636.
    ldap_secure_socket_layer: Option<bool>,
    /// Port is plaintext and must be upgraded with StartTLS.
    ldap_start_tls: Option<bool>,
    /// Ignore expired certificates and name mismatches. Superset of
    /// `ldap_ignore_tls_validation`.
    ldap_ignore_tls_errors: Option<bool>,
    /// Accept certificates not signed by a trusted CA (self-signed).
    ldap_ignore_tls_validation: Option<bool>,
    /// Base OU from which users are searched by username.
    ldap_search_base: Option<String>,
    /// Do not disclose whether a username exists.
    hide_user_not_found: Option<bool>,
    ldap_change_password_with_del_add: Option<bool>,
    ldap_search_filter: Option<String>,
    ldap_timeout: Option<u64>,
}

impl LdapPasswordChangeOptions {
    pub fn set_ldap_hostnames(&mut self, hostnames: Option<Vec<String>>) {
        self.ldap_hostnames = hostnames;
    }

    pub fn set_ldap_password(&mut self, password: Option<String>) {
        self.ldap_password = password;
    }

    pub fn set_ldap_username(&mut self, username: Option<String>) {
        self.ldap_username = username;
    }

    pub fn set_default_domain(&mut self, domain: Option<String>) {
        self.default_domain = domain;
    }

    pub fn set_ldap_port(&mut self, port: Option<u16>) {
        self.ldap_port = port;
    }

    pub fn set_ldap_secure_socket_layer(&mut self, enabled: Option<bool>) {
        self.ldap_secure_socket_layer = enabled;
    }

    pub fn set_ldap_start_tls(&mut self, enabled: Option<bool>) {
        self.ldap_start_tls = enabled;
    }

    pub fn set_ldap_ignore_tls_errors(&mut self, ignore: Option<bool>) {
        self.ldap_ignore_tls_errors = ignore;
    }

    pub fn set_ldap_ignore_tls_validation(&mut self, ignore: Option<bool>) {
        self.ldap_ignore_tls_validation = ignore;
    }

    pub fn set_ldap_search_base(&mut self, base: Option<String>) {
        self.ldap_search_base = base;
    }

    pub fn set_hide_user_not_found(&mut self, hide: Option<bool>) {
        self.hide_user_not_found = hide;
    }

    pub fn set_ldap_change_password_with_del_add(
        &mut self,
        enabled: Option<bool>,
    ) {
        self.ldap_change_password_with_del_add = enabled;
    }

    pub fn set_ldap_search_filter(&mut self, filter: Option<String>) {
        self.ldap_search_filter = filter;
    }

    pub fn set_ldap_timeout(&mut self, seconds: Option<u64>) {
        self.ldap_timeout = seconds;
    }
}

impl AppSettings for LdapPasswordChangeOptions {
    fn ldap_hostnames(&self) -> &[String] {
        self.ldap_hostnames.as_deref().unwrap_or_default()
    }

    fn ldap_username(&self) -> &str {
        self.ldap_username.as_deref().unwrap_or_default()
    }

    fn ldap_password(&self) -> &str {
        self.ldap_password.as_deref().unwrap_or_default()
    }

    fn default_domain(&self) -> &str {
        self.default_domain.as_deref().unwrap_or_default()
    }

    fn ldap_port(&self) -> u16 {
        self.ldap_port.unwrap_or(DEFAULT_LDAP_PORT)
    }

    fn ldap_secure_socket_layer(&self) -> bool {
        self.ldap_secure_socket_layer.unwrap_or(false)
    }

    fn ldap_start_tls(&self) -> bool {
        self.ldap_start_tls.unwrap_or(false)
    }

    fn ldap_ignore_tls_errors(&self) -> bool {
        self.ldap_ignore_tls_errors.unwrap_or(false)
    }

    fn ldap_ignore_tls_validation(&self) -> bool {
        self.ldap_ignore_tls_errors()
            || self.ldap_ignore_tls_validation.unwrap_or(false)
    }

    fn ldap_search_base(&self) -> &str {
        self.ldap_search_base.as_deref().unwrap_or_default()
    }

    fn ldap_search_filter(&self) -> &str {
        match self.ldap_search_filter.as_deref() {
            Some(filter) if !filter.trim().is_empty() => filter,
            _ => DEFAULT_SEARCH_FILTER,
        }
    }

    fn hide_user_not_found(&self) -> bool {
        self.hide_user_not_found.unwrap_or(true)
    }

    fn ldap_change_password_with_del_add(&self) -> bool {
        self.ldap_change_password_with_del_add.unwrap_or(true)
    }

    fn ldap_timeout(&self) -> Duration {
        Duration::from_secs(self.ldap_timeout.unwrap_or(DEFAULT_TIMEOUT_SECS))
    }
}
