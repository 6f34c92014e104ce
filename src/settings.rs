//! Settings shared by every password change provider.
//!
//! Providers never see the configuration file. They receive a type
//! implementing [`AppSettings`], bound from the `AppSettings` section of
//! `config.yaml`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Standard LDAPS port.
pub const DEFAULT_LDAP_PORT: u16 = 636;
/// Search filter used when none is configured.
pub const DEFAULT_SEARCH_FILTER: &str = "(sAMAccountName={Username})";
/// Placeholder substituted by the cleaned username in search filters.
pub const USERNAME_PLACEHOLDER: &str = "{Username}";
/// Bound on a single directory round trip, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Capability describing what a provider needs to reach the directory.
///
/// Accessors never return an absent value: unset strings read as `""`
/// and unset lists as an empty slice. Methods with a default body return
/// the documented defaults for option types which do not carry the
/// field at all.
pub trait AppSettings: Send + Sync {
    /// Directory servers, tried in order.
    fn ldap_hostnames(&self) -> &[String];

    /// Service account used for the initial bind.
    fn ldap_username(&self) -> &str;

    fn ldap_password(&self) -> &str;

    /// Domain appended to bare usernames.
    fn default_domain(&self) -> &str;

    fn ldap_port(&self) -> u16 {
        DEFAULT_LDAP_PORT
    }

    /// Whether the initial connection is TLS-wrapped (`ldaps://`).
    fn ldap_secure_socket_layer(&self) -> bool {
        false
    }

    /// Whether a plaintext connection is upgraded with StartTLS.
    fn ldap_start_tls(&self) -> bool {
        false
    }

    /// Ignore every certificate error. Implies
    /// [`AppSettings::ldap_ignore_tls_validation`].
    fn ldap_ignore_tls_errors(&self) -> bool {
        false
    }

    /// Accept certificates which do not chain to a trusted CA.
    fn ldap_ignore_tls_validation(&self) -> bool {
        self.ldap_ignore_tls_errors()
    }

    /// DN under which users are searched. Empty means the root DSE
    /// `defaultNamingContext`.
    fn ldap_search_base(&self) -> &str {
        ""
    }

    fn ldap_search_filter(&self) -> &str {
        DEFAULT_SEARCH_FILTER
    }

    /// Report a missing user exactly like bad credentials.
    fn hide_user_not_found(&self) -> bool {
        true
    }

    /// Change the password with delete(old) + add(new) instead of a
    /// single replace.
    fn ldap_change_password_with_del_add(&self) -> bool {
        true
    }

    fn ldap_timeout(&self) -> Duration {
        Duration::from_secs(DEFAULT_TIMEOUT_SECS)
    }
}

/// Attribute used to identify the user in the directory.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdType {
    #[default]
    #[serde(rename = "userPrincipalName")]
    UserPrincipalName,
    #[serde(rename = "sAMAccountName")]
    SamAccountName,
}

impl IdType {
    /// LDAP attribute name.
    pub fn attribute(&self) -> &'static str {
        match self {
            IdType::UserPrincipalName => "userPrincipalName",
            IdType::SamAccountName => "sAMAccountName",
        }
    }
}

/// Generic options, bound for the debug and direct providers.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordChangeOptions {
    ldap_hostnames: Option<Vec<String>>,
    ldap_port: Option<u16>,
    ldap_username: Option<String>,
    ldap_password: Option<String>,
    default_domain: Option<String>,
    #[serde(default)]
    ldap_secure_socket_layer: bool,
    #[serde(default)]
    ldap_start_tls: bool,
    #[serde(default)]
    ldap_ignore_tls_errors: bool,
    #[serde(default)]
    ldap_ignore_tls_validation: bool,
    hide_user_not_found: Option<bool>,
    ldap_timeout: Option<u64>,
    #[serde(default)]
    id_type_for_user: IdType,
    restricted_ad_groups: Option<Vec<String>>,
    allowed_ad_groups: Option<Vec<String>>,
}

impl PasswordChangeOptions {
    pub fn id_type_for_user(&self) -> IdType {
        self.id_type_for_user
    }

    /// Groups whose members may not change their password here.
    pub fn restricted_ad_groups(&self) -> &[String] {
        self.restricted_ad_groups.as_deref().unwrap_or_default()
    }

    /// When not empty, only members of these groups may change their
    /// password.
    pub fn allowed_ad_groups(&self) -> &[String] {
        self.allowed_ad_groups.as_deref().unwrap_or_default()
    }

    pub fn set_ldap_hostnames(&mut self, hostnames: Option<Vec<String>>) {
        self.ldap_hostnames = hostnames;
    }

    pub fn set_default_domain(&mut self, domain: Option<String>) {
        self.default_domain = domain;
    }

    pub fn set_hide_user_not_found(&mut self, hide: Option<bool>) {
        self.hide_user_not_found = hide;
    }

    pub fn set_id_type_for_user(&mut self, id_type: IdType) {
        self.id_type_for_user = id_type;
    }

    pub fn set_restricted_ad_groups(&mut self, groups: Option<Vec<String>>) {
        self.restricted_ad_groups = groups;
    }

    pub fn set_allowed_ad_groups(&mut self, groups: Option<Vec<String>>) {
        self.allowed_ad_groups = groups;
    }
}

impl AppSettings for PasswordChangeOptions {
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
        self.ldap_secure_socket_layer
    }

    fn ldap_start_tls(&self) -> bool {
        self.ldap_start_tls
    }

    fn ldap_ignore_tls_errors(&self) -> bool {
        self.ldap_ignore_tls_errors
    }

    fn ldap_ignore_tls_validation(&self) -> bool {
        self.ldap_ignore_tls_validation || self.ldap_ignore_tls_errors
    }

    fn hide_user_not_found(&self) -> bool {
        self.hide_user_not_found.unwrap_or(true)
    }

    fn ldap_timeout(&self) -> Duration {
        Duration::from_secs(self.ldap_timeout.unwrap_or(DEFAULT_TIMEOUT_SECS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generic_defaults() {
        let options: PasswordChangeOptions =
            serde_yaml::from_str("{}").unwrap();

        assert!(options.ldap_hostnames().is_empty());
        assert_eq!(options.ldap_username(), "");
        assert_eq!(options.ldap_password(), "");
        assert_eq!(options.default_domain(), "");
        assert_eq!(options.ldap_port(), DEFAULT_LDAP_PORT);
        assert_eq!(options.ldap_search_base(), "");
        assert_eq!(options.ldap_search_filter(), DEFAULT_SEARCH_FILTER);
        assert!(options.hide_user_not_found());
        assert!(options.ldap_change_password_with_del_add());
        assert_eq!(options.id_type_for_user(), IdType::UserPrincipalName);
        assert!(options.restricted_ad_groups().is_empty());
        assert!(options.allowed_ad_groups().is_empty());
        assert_eq!(
            options.ldap_timeout(),
            Duration::from_secs(DEFAULT_TIMEOUT_SECS)
        );
    }

    #[test]
    fn test_generic_binding() {
        let options: PasswordChangeOptions = serde_yaml::from_str(
            r#"
ldapHostnames: ["dc1.example.com", "dc2.example.com"]
ldapPort: 389
defaultDomain: example.com
idTypeForUser: sAMAccountName
restrictedAdGroups: ["Domain Admins"]
"#,
        )
        .unwrap();

        assert_eq!(options.ldap_hostnames().len(), 2);
        assert_eq!(options.ldap_port(), 389);
        assert_eq!(options.default_domain(), "example.com");
        assert_eq!(options.id_type_for_user(), IdType::SamAccountName);
        assert_eq!(options.restricted_ad_groups(), ["Domain Admins"]);
    }

    #[test]
    fn test_ignore_tls_errors_implies_validation() {
        let mut options = PasswordChangeOptions::default();
        assert!(!options.ldap_ignore_tls_validation());

        options.ldap_ignore_tls_errors = true;
        assert!(options.ldap_ignore_tls_validation());
    }
}
