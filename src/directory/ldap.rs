//! LDAP support.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, Mod, Scope, SearchEntry};

use super::{
    Connector, DirectoryError, Endpoint, Entry, PasswordChange, Result,
    Session, Tls, UNICODE_PWD,
};

/// [`Connector`] backed by [`ldap3`].
#[derive(Debug, Default, Clone, Copy)]
pub struct LdapConnector;

#[async_trait]
impl Connector for LdapConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Session>> {
        let settings = LdapConnSettings::new()
            .set_conn_timeout(endpoint.timeout)
            .set_starttls(endpoint.tls == Tls::StartTls)
            .set_no_tls_verify(endpoint.no_tls_verify);

        let (conn, ldap) =
            LdapConnAsync::with_settings(settings, &endpoint.url())
                .await
                .map_err(|err| match DirectoryError::from(err) {
                    DirectoryError::Timeout => DirectoryError::Timeout,
                    // TLS handshake and StartTLS failures end up here too.
                    err => DirectoryError::Unreachable(err.to_string()),
                })?;
        ldap3::drive!(conn);

        Ok(Box::new(LdapSession {
            ldap,
            timeout: endpoint.timeout,
        }))
    }
}

/// One [`ldap3`] connection.
struct LdapSession {
    ldap: Ldap,
    timeout: Duration,
}

#[async_trait]
impl Session for LdapSession {
    async fn bind(&mut self, dn: &str, password: &str) -> Result<()> {
        self.ldap
            .with_timeout(self.timeout)
            .simple_bind(dn, password)
            .await?
            .success()?;
        Ok(())
    }

    async fn search(
        &mut self,
        base: &str,
        scope: Scope,
        filter: &str,
        attrs: &[&str],
    ) -> Result<Vec<Entry>> {
        let (entries, _) = self
            .ldap
            .with_timeout(self.timeout)
            .search(base, scope, filter, attrs.to_vec())
            .await?
            .success()?;

        Ok(entries
            .into_iter()
            .map(|entry| {
                let entry = SearchEntry::construct(entry);
                Entry {
                    dn: entry.dn,
                    attrs: entry.attrs,
                }
            })
            .collect())
    }

    async fn modify_password(
        &mut self,
        dn: &str,
        change: &PasswordChange,
    ) -> Result<()> {
        let attr = UNICODE_PWD.as_bytes().to_vec();
        let mods = match change {
            PasswordChange::DeleteAdd { old, new } => vec![
                Mod::Delete(attr.clone(), HashSet::from([old.clone()])),
                Mod::Add(attr, HashSet::from([new.clone()])),
            ],
            PasswordChange::Replace { new } => {
                vec![Mod::Replace(attr, HashSet::from([new.clone()]))]
            },
        };

        self.ldap
            .with_timeout(self.timeout)
            .modify(dn, mods)
            .await?
            .success()?;
        Ok(())
    }

    async fn unbind(&mut self) -> Result<()> {
        self.ldap.unbind().await?;
        Ok(())
    }
}
