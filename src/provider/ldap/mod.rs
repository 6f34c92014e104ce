//! Password change through a service account.
//!
//! The service account locates the user with the configured search
//! filter, then changes the password on the user entry.

mod options;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ldap3::{Scope, ldap_escape};

use super::{
    PasswordChangeProvider, PasswordChangeRequest, bounded, call_deadline,
};
use crate::directory::{
    self, Connector, PasswordChange, Session, clean_username,
};
use crate::error::PasswordError;
use crate::settings::{AppSettings, USERNAME_PLACEHOLDER};

pub use self::options::LdapPasswordChangeOptions;

const DISTINGUISHED_NAME: &str = "distinguishedName";
/// Service connection: bind, root DSE, search, modify and unbind.
const SERVICE_ROUND_TRIPS: u32 = 5;
/// Verification connection: bind and unbind.
const VERIFY_ROUND_TRIPS: u32 = 2;

/// LDAP provider.
pub struct LdapPasswordChangeProvider {
    options: LdapPasswordChangeOptions,
    connector: Arc<dyn Connector>,
}

impl LdapPasswordChangeProvider {
    /// Create a new [`LdapPasswordChangeProvider`].
    pub fn new(
        options: LdapPasswordChangeOptions,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, PasswordError> {
        if options.ldap_hostnames().is_empty() {
            return Err(PasswordError::Configuration(
                "`ldapHostnames` must list at least one directory server".into(),
            ));
        }

        if !options.ldap_search_filter().contains(USERNAME_PLACEHOLDER) {
            return Err(PasswordError::Configuration(format!(
                "`ldapSearchFilter` must contain {USERNAME_PLACEHOLDER}"
            )));
        }

        if options.ldap_secure_socket_layer() && options.ldap_start_tls() {
            tracing::warn!(
                "`ldapStartTls` is ignored when `ldapSecureSocketLayer` is set"
            );
        }

        if options.ldap_ignore_tls_validation() {
            tracing::warn!("directory certificates are not verified");
        }

        Ok(Self { options, connector })
    }

    /// Connect to the first reachable host and bind as the service
    /// account (anonymously when none is configured).
    async fn service_session(
        &self,
    ) -> Result<Box<dyn Session>, PasswordError> {
        let mut session =
            directory::connect_first(&*self.connector, &self.options).await?;

        if !self.options.ldap_username().is_empty() {
            session
                .bind(self.options.ldap_username(), self.options.ldap_password())
                .await
                .map_err(|err| {
                    if err.is_unavailable() {
                        return PasswordError::DirectoryUnavailable;
                    }
                    // Must not surface as the user's bad credentials.
                    tracing::error!(error = %err, "service account bind failed");
                    PasswordError::Internal
                })?;
        }

        Ok(session)
    }

    async fn find_user(
        &self,
        session: &mut dyn Session,
        username: &str,
    ) -> Result<String, PasswordError> {
        let base = match self.options.ldap_search_base() {
            "" => directory::default_naming_context(session).await?,
            base => base.to_owned(),
        };
        let filter = self
            .options
            .ldap_search_filter()
            .replace(USERNAME_PLACEHOLDER, &ldap_escape(username));

        let mut entries = session
            .search(&base, Scope::Subtree, &filter, &[DISTINGUISHED_NAME])
            .await?;

        match entries.len() {
            0 => Err(PasswordError::UserNotFound),
            1 => Ok(entries.remove(0).dn),
            count => {
                tracing::error!(%filter, count, "search filter matched several entries");
                Err(PasswordError::Internal)
            },
        }
    }

    /// Check the current password with a bind as the user on a fresh
    /// connection.
    async fn verify_current_password(
        &self,
        dn: &str,
        request: &PasswordChangeRequest,
    ) -> Result<(), PasswordError> {
        let mut session =
            directory::connect_first(&*self.connector, &self.options).await?;
        session.bind(dn, request.current_password.as_str()).await?;
        close(session).await;
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

        let username = clean_username(&request.username);
        let mut session = self.service_session().await?;
        let dn = self.find_user(&mut *session, username).await?;

        let change = if self.options.ldap_change_password_with_del_add() {
            PasswordChange::delete_add(
                request.current_password.as_str(),
                request.new_password.as_str(),
            )
        } else {
            self.verify_current_password(&dn, request).await?;
            PasswordChange::replace(request.new_password.as_str())
        };

        session.modify_password(&dn, &change).await?;
        close(session).await;

        tracing::info!(%username, %dn, "password changed");
        Ok(())
    }
}

#[async_trait]
impl PasswordChangeProvider for LdapPasswordChangeProvider {
    fn name(&self) -> &'static str {
        "ldap"
    }

    fn deadline(&self) -> Duration {
        let (connections, round_trips) =
            if self.options.ldap_change_password_with_del_add() {
                (1, SERVICE_ROUND_TRIPS)
            } else {
                (2, SERVICE_ROUND_TRIPS + VERIFY_ROUND_TRIPS)
            };

        call_deadline(
            self.options.ldap_timeout(),
            self.options.ldap_hostnames().len(),
            connections,
            round_trips,
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

async fn close(mut session: Box<dyn Session>) {
    if let Err(err) = session.unbind().await {
        tracing::debug!(error = %err, "unbind failed");
    }
}
