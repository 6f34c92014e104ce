//! In-memory directory for tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ldap3::Scope;

use super::{
    CONSTRAINT_VIOLATION, Connector, DirectoryError, Endpoint, Entry,
    INSUFFICIENT_ACCESS_RIGHTS, INVALID_CREDENTIALS, PasswordChange, Result,
    Session,
};

pub const NAMING_CONTEXT: &str = "DC=example,DC=com";
pub const SERVICE_DN: &str = "CN=svc-passcore,OU=Services,DC=example,DC=com";
pub const SERVICE_PASSWORD: &str = "service-secret";
const MIN_PASSWORD_LENGTH: usize = 8;

#[derive(Debug, Clone)]
struct User {
    entry: Entry,
    password: String,
}

#[derive(Debug, Default)]
struct State {
    users: Vec<User>,
    unreachable: HashSet<String>,
    stalled: HashSet<String>,
    latency: Duration,
    attempts: Vec<String>,
    modifications: Vec<(String, PasswordChange)>,
}

/// Shared fake directory. Clones observe the same state.
#[derive(Debug, Default, Clone)]
pub struct MemoryDirectory {
    state: Arc<Mutex<State>>,
}

impl MemoryDirectory {
    /// Add a user `CN=<sam>,OU=Users,DC=example,DC=com`.
    pub fn with_user(self, sam: &str, password: &str, groups: &[&str]) -> Self {
        let dn = format!("CN={sam},OU=Users,{NAMING_CONTEXT}");
        let attrs = HashMap::from([
            ("sAMAccountName".to_owned(), vec![sam.to_owned()]),
            (
                "userPrincipalName".to_owned(),
                vec![format!("{sam}@example.com")],
            ),
            (
                "memberOf".to_owned(),
                groups
                    .iter()
                    .map(|group| format!("CN={group},OU=Groups,{NAMING_CONTEXT}"))
                    .collect(),
            ),
        ]);

        self.state.lock().unwrap().users.push(User {
            entry: Entry { dn, attrs },
            password: password.to_owned(),
        });
        self
    }

    /// Connections to `host` fail immediately.
    pub fn with_unreachable(self, host: &str) -> Self {
        self.state.lock().unwrap().unreachable.insert(host.to_owned());
        self
    }

    /// Connections to `host` never complete.
    pub fn with_stalled(self, host: &str) -> Self {
        self.state.lock().unwrap().stalled.insert(host.to_owned());
        self
    }

    /// Every connection and operation takes `latency`.
    pub fn with_latency(self, latency: Duration) -> Self {
        self.state.lock().unwrap().latency = latency;
        self
    }

    async fn pause(&self) {
        let latency = self.state.lock().unwrap().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    /// Hosts a connection was attempted to, in order.
    pub fn attempts(&self) -> Vec<String> {
        self.state.lock().unwrap().attempts.clone()
    }

    /// Applied password modifications as `(dn, change)`.
    pub fn modifications(&self) -> Vec<(String, PasswordChange)> {
        self.state.lock().unwrap().modifications.clone()
    }

    pub fn password_of(&self, sam: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .users
            .iter()
            .find(|user| user.entry.values("sAMAccountName")[0] == sam)
            .map(|user| user.password.clone())
    }
}

#[async_trait]
impl Connector for MemoryDirectory {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Session>> {
        let stalled = {
            let mut state = self.state.lock().unwrap();
            state.attempts.push(endpoint.host.clone());

            if state.unreachable.contains(&endpoint.host) {
                return Err(DirectoryError::Unreachable(format!(
                    "connection refused by {}",
                    endpoint.host
                )));
            }
            state.stalled.contains(&endpoint.host)
        };

        if stalled {
            std::future::pending::<()>().await;
        }
        self.pause().await;

        Ok(Box::new(MemorySession {
            directory: self.clone(),
            bound: None,
        }))
    }
}

struct MemorySession {
    directory: MemoryDirectory,
    bound: Option<String>,
}

fn rejected(code: u32, text: &str) -> DirectoryError {
    DirectoryError::Rejected {
        code,
        text: text.to_owned(),
    }
}

fn decode_password(bytes: &[u8]) -> String {
    let units = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect::<Vec<_>>();
    String::from_utf16_lossy(&units).trim_matches('"').to_owned()
}

/// Parse `(attr=value)`, the only filter shape the providers send.
fn parse_equality(filter: &str) -> Option<(&str, String)> {
    let inner = filter.strip_prefix('(')?.strip_suffix(')')?;
    let (attr, value) = inner.split_once('=')?;
    let value = value
        .replace(r"\2a", "*")
        .replace(r"\28", "(")
        .replace(r"\29", ")")
        .replace(r"\5c", "\\");
    Some((attr, value))
}

#[async_trait]
impl Session for MemorySession {
    async fn bind(&mut self, dn: &str, password: &str) -> Result<()> {
        self.directory.pause().await;

        if dn == SERVICE_DN && password == SERVICE_PASSWORD {
            self.bound = Some(dn.to_owned());
            return Ok(());
        }

        let state = self.directory.state.lock().unwrap();
        let user = state.users.iter().find(|user| {
            user.entry.dn.eq_ignore_ascii_case(dn)
                || user
                    .entry
                    .values("userPrincipalName")
                    .iter()
                    .any(|upn| upn.eq_ignore_ascii_case(dn))
        });

        match user {
            Some(user) if user.password == password => {
                self.bound = Some(user.entry.dn.clone());
                Ok(())
            },
            _ => Err(rejected(
                INVALID_CREDENTIALS,
                "80090308: LdapErr: DSID-0C09044E, comment: AcceptSecurityContext error, data 52e",
            )),
        }
    }

    async fn search(
        &mut self,
        base: &str,
        scope: Scope,
        filter: &str,
        _attrs: &[&str],
    ) -> Result<Vec<Entry>> {
        self.directory.pause().await;

        if base.is_empty() && matches!(scope, Scope::Base) {
            return Ok(vec![Entry {
                dn: String::new(),
                attrs: HashMap::from([(
                    "defaultNamingContext".to_owned(),
                    vec![NAMING_CONTEXT.to_owned()],
                )]),
            }]);
        }

        if self.bound.is_none() {
            return Err(rejected(
                1,
                "000004DC: LdapErr: DSID-0C090A5C, comment: In order to perform this operation a successful bind must be completed on the connection",
            ));
        }

        let (attr, value) = parse_equality(filter)
            .ok_or_else(|| DirectoryError::Protocol("bad search filter".into()))?;
        let base = base.to_ascii_lowercase();

        let state = self.directory.state.lock().unwrap();
        Ok(state
            .users
            .iter()
            .filter(|user| user.entry.dn.to_ascii_lowercase().ends_with(&base))
            .filter(|user| {
                user.entry
                    .values(attr)
                    .iter()
                    .any(|candidate| candidate.eq_ignore_ascii_case(&value))
            })
            .map(|user| user.entry.clone())
            .collect())
    }

    async fn modify_password(
        &mut self,
        dn: &str,
        change: &PasswordChange,
    ) -> Result<()> {
        self.directory.pause().await;

        let bound = self.bound.clone().ok_or_else(|| {
            rejected(INSUFFICIENT_ACCESS_RIGHTS, "no bind on connection")
        })?;

        let mut state = self.directory.state.lock().unwrap();
        let user = state
            .users
            .iter_mut()
            .find(|user| user.entry.dn == dn)
            .ok_or_else(|| rejected(32, "0000208D: NameErr: DSID-03100241"))?;

        let new = match change {
            PasswordChange::DeleteAdd { old, new } => {
                if decode_password(old) != user.password {
                    return Err(rejected(
                        CONSTRAINT_VIOLATION,
                        "00000056: AtrErr: DSID-03190F80, #1:\n\t0: 00000056: DSID-03190F80, problem 1005 (CONSTRAINT_ATT_TYPE), data 0, Att 9005a (unicodePwd)",
                    ));
                }
                decode_password(new)
            },
            PasswordChange::Replace { new } => {
                if bound != SERVICE_DN {
                    return Err(rejected(
                        INSUFFICIENT_ACCESS_RIGHTS,
                        "00000005: SecErr: DSID-031A11E1, problem 4003 (INSUFF_ACCESS_RIGHTS)",
                    ));
                }
                decode_password(new)
            },
        };

        if new.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(rejected(
                CONSTRAINT_VIOLATION,
                "0000052D: Constraint violation - check_password_restrictions: the password is too short",
            ));
        }

        user.password = new;
        state.modifications.push((dn.to_owned(), change.clone()));
        Ok(())
    }

    async fn unbind(&mut self) -> Result<()> {
        self.directory.pause().await;

        self.bound = None;
        Ok(())
    }
}
