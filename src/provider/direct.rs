//! Password change performed with the user's own identity.
//!
//! The user binds with their current password, their entry is checked
//! against the group restrictions and the password is changed from that
//! same session. No service account is involved.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ldap3::{Scope, ldap_escape};

use super::{
    PasswordChangeProvider, PasswordChangeRequest, bounded, call_deadline,
};
use crate::directory::{
    self, Connector, Entry, PasswordChange, clean_username,
};
use crate::error::PasswordError;
use crate::settings::{AppSettings, IdType, PasswordChangeOptions};

const MEMBER_OF: &str = "memberOf";
/// Bind, root DSE, search, modify and unbind.
const ROUND_TRIPS: u32 = 5;

/// Direct provider.
pub struct DirectPasswordChangeProvider {
    options: PasswordChangeOptions,
    connector: Arc<dyn Connector>,
}

impl DirectPasswordChangeProvider {
    /// Create a new [`DirectPasswordChangeProvider`].
    pub fn new(
        options: PasswordChangeOptions,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, PasswordError> {
        if options.ldap_hostnames().is_empty() {
            return Err(PasswordError::Configuration(
                "`ldapHostnames` must list at least one directory server".into(),
            ));
        }

        Ok(Self { options, connector })
    }

    /// Name the user binds with. Bare usernames get the default domain
    /// appended whatever the id type: Active Directory only takes a DN,
    /// a UPN or `DOMAIN\user` as a simple bind name.
    fn logon_name(&self, username: &str) -> String {
        let username = username.trim();
        let domain = self.options.default_domain();

        if domain.is_empty() || username.contains(['@', '\\']) {
            username.to_owned()
        } else {
            format!("{username}@{domain}")
        }
    }

    /// Search filter locating the entry of the bound user.
    fn filter(&self, username: &str) -> String {
        let id_type = self.options.id_type_for_user();
        let value = match id_type {
            IdType::UserPrincipalName => self.logon_name(username),
            IdType::SamAccountName => clean_username(username).to_owned(),
        };

        format!("({}={})", id_type.attribute(), ldap_escape(value))
    }

    fn check_groups(&self, entry: &Entry) -> Result<(), PasswordError> {
        let groups = entry.values(MEMBER_OF);
        let is_member = |configured: &String| {
            groups.iter().any(|dn| {
                dn.eq_ignore_ascii_case(configured)
                    || common_name(dn)
                        .is_some_and(|cn| cn.eq_ignore_ascii_case(configured))
            })
        };

        if let Some(group) =
            self.options.restricted_ad_groups().iter().find(|g| is_member(g))
        {
            tracing::info!(dn = %entry.dn, %group, "member of a restricted group");
            return Err(PasswordError::ChangeNotPermitted);
        }

        let allowed = self.options.allowed_ad_groups();
        if !allowed.is_empty() && !allowed.iter().any(is_member) {
            tracing::info!(dn = %entry.dn, "not a member of any allowed group");
            return Err(PasswordError::ChangeNotPermitted);
        }

        Ok(())
    }

    async fn perform(
        &self,
        request: &PasswordChangeRequest,
    ) -> Result<(), PasswordError> {
        // An empty password would be an unauthenticated bind.
        if request.current_password.is_empty() {
            return Err(PasswordError::InvalidCredentials);
        }

        let mut session =
            directory::connect_first(&*self.connector, &self.options).await?;
        session
            .bind(
                &self.logon_name(&request.username),
                request.current_password.as_str(),
            )
            .await?;

        let base = directory::default_naming_context(&mut *session).await?;
        let entry = session
            .search(
                &base,
                Scope::Subtree,
                &self.filter(&request.username),
                &[MEMBER_OF],
            )
            .await?
            .into_iter()
            .next()
            .ok_or(PasswordError::UserNotFound)?;

        self.check_groups(&entry)?;

        session
            .modify_password(
                &entry.dn,
                &PasswordChange::delete_add(
                    request.current_password.as_str(),
                    request.new_password.as_str(),
                ),
            )
            .await?;

        if let Err(err) = session.unbind().await {
            tracing::debug!(error = %err, "unbind failed");
        }

        tracing::info!(dn = %entry.dn, "password changed");
        Ok(())
    }
}

#[async_trait]
impl PasswordChangeProvider for DirectPasswordChangeProvider {
    fn name(&self) -> &'static str {
        "direct"
    }

    fn deadline(&self) -> Duration {
        call_deadline(
            self.options.ldap_timeout(),
            self.options.ldap_hostnames().len(),
            1,
            ROUND_TRIPS,
        )
    }

    async fn change_password(
        &self,
        request: &PasswordChangeRequest,
    ) -> Result<(), PasswordError> {
        bounded(self.deadline(), self.perform(request))
            .await
            .map_err(|err| {
                tracing::info!(username = %request.username, kind = err.kind(), "password change refused");
                err.hide_user_not_found(self.options.hide_user_not_found())
            })
    }
}

/// Value of the leading `CN=` of a DN.
fn common_name(dn: &str) -> Option<&str> {
    let (rdn, _) = dn.split_once(',').unwrap_or((dn, ""));
    let (attr, value) = rdn.split_once('=')?;
    attr.trim().eq_ignore_ascii_case("cn").then(|| value.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::memory::MemoryDirectory;
    use crate::password::Password;

    fn options(hosts: &[&str]) -> PasswordChangeOptions {
        let mut options = PasswordChangeOptions::default();
        options.set_ldap_hostnames(Some(
            hosts.iter().map(|host| host.to_string()).collect(),
        ));
        options.set_default_domain(Some("example.com".into()));
        options
    }

    fn provider(
        options: PasswordChangeOptions,
        directory: &MemoryDirectory,
    ) -> DirectPasswordChangeProvider {
        DirectPasswordChangeProvider::new(options, Arc::new(directory.clone()))
            .unwrap()
    }

    fn request(username: &str, current: &str, new: &str) -> PasswordChangeRequest {
        PasswordChangeRequest {
            username: username.into(),
            current_password: Password::new(current),
            new_password: Password::new(new),
        }
    }

    #[test]
    fn test_common_name() {
        assert_eq!(
            common_name("CN=Domain Admins,CN=Users,DC=example,DC=com"),
            Some("Domain Admins")
        );
        assert_eq!(common_name("OU=Staff,DC=example,DC=com"), None);
        assert_eq!(common_name("cn=solo"), Some("solo"));
    }

    #[test]
    fn test_logon_name() {
        let directory = MemoryDirectory::default();
        let provider = provider(options(&["dc1"]), &directory);

        assert_eq!(provider.logon_name("jdoe"), "jdoe@example.com");
        assert_eq!(provider.logon_name("jdoe@corp.example"), "jdoe@corp.example");
        assert_eq!(provider.logon_name("EXAMPLE\\jdoe"), "EXAMPLE\\jdoe");
    }

    #[test]
    fn test_filter_by_id_type() {
        let directory = MemoryDirectory::default();
        let mut options = options(&["dc1"]);
        assert_eq!(
            provider(options.clone(), &directory).filter("jdoe"),
            "(userPrincipalName=jdoe@example.com)"
        );

        options.set_id_type_for_user(IdType::SamAccountName);
        let provider = provider(options, &directory);
        assert_eq!(provider.filter("EXAMPLE\\jdoe"), "(sAMAccountName=jdoe)");
        assert_eq!(provider.logon_name("jdoe"), "jdoe@example.com");
        assert_eq!(
            provider.filter("j*doe)").to_ascii_lowercase(),
            r"(samaccountname=j\2adoe\29)"
        );
    }

    #[tokio::test]
    async fn test_change_own_password() {
        let directory =
            MemoryDirectory::default().with_user("jdoe", "Winter2024!", &["Staff"]);
        let provider = provider(options(&["dc1"]), &directory);

        provider
            .change_password(&request("jdoe", "Winter2024!", "Spring2025!"))
            .await
            .unwrap();

        assert_eq!(directory.password_of("jdoe").as_deref(), Some("Spring2025!"));
        assert!(matches!(
            directory.modifications()[0].1,
            PasswordChange::DeleteAdd { .. }
        ));
    }

    #[tokio::test]
    async fn test_change_with_sam_account_name() {
        let directory =
            MemoryDirectory::default().with_user("jdoe", "Winter2024!", &[]);
        let mut options = options(&["dc1"]);
        options.set_id_type_for_user(IdType::SamAccountName);
        let provider = provider(options, &directory);

        let result = provider
            .change_password(&request("jdoe", "Winter2024!", "Spring2025!"))
            .await;

        assert_eq!(result, Ok(()));
        assert_eq!(directory.password_of("jdoe").as_deref(), Some("Spring2025!"));
    }

    #[tokio::test]
    async fn test_bad_credentials() {
        let directory =
            MemoryDirectory::default().with_user("jdoe", "Winter2024!", &[]);
        let provider = provider(options(&["dc1"]), &directory);

        let result = provider
            .change_password(&request("jdoe", "nope", "Spring2025!"))
            .await;
        assert_eq!(result, Err(PasswordError::InvalidCredentials));

        let result = provider
            .change_password(&request("nobody", "Winter2024!", "Spring2025!"))
            .await;
        assert_eq!(result, Err(PasswordError::InvalidCredentials));
    }

    #[tokio::test]
    async fn test_restricted_group() {
        let directory = MemoryDirectory::default()
            .with_user("admin", "Winter2024!", &["Domain Admins"]);
        let mut options = options(&["dc1"]);
        options.set_restricted_ad_groups(Some(vec!["domain admins".into()]));
        let provider = provider(options, &directory);

        let result = provider
            .change_password(&request("admin", "Winter2024!", "Spring2025!"))
            .await;

        assert_eq!(result, Err(PasswordError::ChangeNotPermitted));
        assert!(directory.modifications().is_empty());
    }

    #[tokio::test]
    async fn test_allowed_groups() {
        let directory = MemoryDirectory::default()
            .with_user("jdoe", "Winter2024!", &["Staff"])
            .with_user("guest", "Winter2024!", &["Guests"]);
        let mut options = options(&["dc1"]);
        options.set_allowed_ad_groups(Some(vec![
            "CN=Staff,OU=Groups,DC=example,DC=com".into(),
        ]));
        let provider = provider(options, &directory);

        let result = provider
            .change_password(&request("guest", "Winter2024!", "Spring2025!"))
            .await;
        assert_eq!(result, Err(PasswordError::ChangeNotPermitted));

        let result = provider
            .change_password(&request("jdoe", "Winter2024!", "Spring2025!"))
            .await;
        assert_eq!(result, Ok(()));
    }

    #[tokio::test]
    async fn test_failover() {
        let directory = MemoryDirectory::default()
            .with_user("jdoe", "Winter2024!", &[])
            .with_unreachable("dc1");
        let provider = provider(options(&["dc1", "dc2"]), &directory);

        provider
            .change_password(&request("jdoe", "Winter2024!", "Spring2025!"))
            .await
            .unwrap();

        assert_eq!(directory.attempts(), ["dc1", "dc2"]);
    }

    #[tokio::test]
    async fn test_entry_not_found() {
        let directory =
            MemoryDirectory::default().with_user("jdoe", "Winter2024!", &[]);
        let mut options = options(&["dc1"]);
        options.set_default_domain(None);
        // Binding with the DN succeeds but no entry has it as UPN.
        let request = request(
            "CN=jdoe,OU=Users,DC=example,DC=com",
            "Winter2024!",
            "Spring2025!",
        );

        let result = provider(options.clone(), &directory)
            .change_password(&request)
            .await;
        assert_eq!(result, Err(PasswordError::InvalidCredentials));

        options.set_hide_user_not_found(Some(false));
        let result = provider(options, &directory).change_password(&request).await;
        assert_eq!(result, Err(PasswordError::UserNotFound));
    }
}
