use async_trait::async_trait;

use super::{PasswordChangeProvider, PasswordChangeRequest};
use crate::error::PasswordError;
use crate::settings::{AppSettings, PasswordChangeOptions};

/// Provider accepting every request without touching a directory.
/// Used for local development of the web front.
#[derive(Debug, Default)]
pub struct DebugPasswordChangeProvider {
    options: PasswordChangeOptions,
}

impl DebugPasswordChangeProvider {
    pub fn new(options: PasswordChangeOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl PasswordChangeProvider for DebugPasswordChangeProvider {
    fn name(&self) -> &'static str {
        "debug"
    }

    async fn change_password(
        &self,
        request: &PasswordChangeRequest,
    ) -> Result<(), PasswordError> {
        tracing::info!(
            username = %request.username,
            domain = self.options.default_domain(),
            ?request,
            "debug provider accepted password change"
        );
        Ok(())
    }
}
