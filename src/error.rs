//! Error handler for passcore.

use axum::extract::rejection::JsonRejection;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;
use validator::ValidationErrors;

pub type Result<T> = std::result::Result<T, ServerError>;

/// Outcome of a failed password change, as returned by providers.
///
/// Directory specific failures are translated into one of these kinds
/// before leaving a provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PasswordError {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("user not found")]
    UserNotFound,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("new password does not satisfy the password policy")]
    PolicyRejected,

    #[error("password change is not permitted for this account")]
    ChangeNotPermitted,

    #[error("directory server unavailable")]
    DirectoryUnavailable,

    #[error("unexpected error")]
    Internal,
}

impl PasswordError {
    /// Machine readable kind, sent as the problem `type`.
    pub fn kind(&self) -> &'static str {
        match self {
            PasswordError::Configuration(_) => "configurationError",
            PasswordError::UserNotFound => "userNotFound",
            PasswordError::InvalidCredentials => "invalidCredentials",
            PasswordError::PolicyRejected => "policyRejected",
            PasswordError::ChangeNotPermitted => "changeNotPermitted",
            PasswordError::DirectoryUnavailable => "directoryUnavailable",
            PasswordError::Internal => "internalError",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            PasswordError::UserNotFound => StatusCode::NOT_FOUND,
            PasswordError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            PasswordError::PolicyRejected => StatusCode::UNPROCESSABLE_ENTITY,
            PasswordError::ChangeNotPermitted => StatusCode::FORBIDDEN,
            PasswordError::DirectoryUnavailable => {
                StatusCode::SERVICE_UNAVAILABLE
            },
            PasswordError::Configuration(_) | PasswordError::Internal => {
                StatusCode::INTERNAL_SERVER_ERROR
            },
        }
    }

    /// Report [`PasswordError::UserNotFound`] as bad credentials so
    /// usernames cannot be enumerated.
    pub fn hide_user_not_found(self, hide: bool) -> Self {
        match self {
            PasswordError::UserNotFound if hide => {
                PasswordError::InvalidCredentials
            },
            err => err,
        }
    }
}

/// Enum representing server-side errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("validation error occurred")]
    Validation(#[from] ValidationErrors),

    #[error(transparent)]
    Axum(#[from] JsonRejection),

    #[error(transparent)]
    Password(#[from] PasswordError),

    #[error("resource not found")]
    NotFound,
}

/// Structure for detailed error responses.
#[derive(Debug, Serialize)]
pub struct ResponseError {
    r#type: Option<String>,
    title: String,
    status: u16,
    detail: String,
    instance: Option<String>,
    errors: Option<Vec<FieldError>>,
}

impl ResponseError {
    /// Update error status code.
    pub fn status(mut self, code: StatusCode) -> Self {
        self.status = code.as_u16();
        self
    }

    /// Update `type` field.
    pub fn kind(mut self, kind: &str) -> Self {
        self.r#type = Some(kind.into());
        self
    }

    /// Update `title` field.
    pub fn title(mut self, title: &str) -> Self {
        self.title = title.into();
        self
    }

    /// Add detailed error.
    pub fn details(mut self, description: &str) -> Self {
        self.detail = description.into();
        self
    }

    /// Automatically add errors field.
    pub fn errors(mut self, errors: &ValidationErrors) -> Self {
        self.errors = Some(parse_validation_errors(errors));
        self
    }

    /// Transform [`ResponseError`] into axum [`Response`].
    pub fn into_response(
        self,
    ) -> std::result::Result<Response, axum::http::Error> {
        if let Ok(body) = serde_json::to_string(&self) {
            Response::builder()
                .status(self.status)
                .header(header::CONTENT_TYPE, "application/problem+json")
                .body(body.into())
        } else {
            Ok(internal_server_error())
        }
    }
}

impl Default for ResponseError {
    fn default() -> Self {
        Self {
            r#type: None,
            title: "Internal server error.".to_owned(),
            status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
            detail: String::default(),
            instance: None,
            errors: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct FieldError {
    field: String,
    message: String,
}

fn parse_validation_errors(errors: &ValidationErrors) -> Vec<FieldError> {
    let mut fields = errors
        .field_errors()
        .into_iter()
        .flat_map(|(field, issues)| {
            issues.iter().map(move |issue| FieldError {
                field: field.to_string(),
                message: issue
                    .message
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| issue.code.to_string()),
            })
        })
        .collect::<Vec<_>>();
    fields.sort_by(|a, b| a.field.cmp(&b.field));
    fields
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let response = ResponseError::default()
            .title("There were validation errors with your request.")
            .details(&self.to_string())
            .status(StatusCode::BAD_REQUEST);

        let response = match &self {
            ServerError::Validation(validation_errors) => response
                .kind("validation")
                .errors(validation_errors),

            ServerError::Axum(rejection) => response
                .title("Server error during data parsing.")
                .details(&rejection.body_text())
                .status(rejection.status()),

            ServerError::Password(err) => {
                if err.status().is_server_error() {
                    tracing::warn!(kind = err.kind(), "password change failed");
                }

                response
                    .kind(err.kind())
                    .title("Password could not be changed.")
                    .status(err.status())
            },

            ServerError::NotFound => response
                .title("Not found.")
                .status(StatusCode::NOT_FOUND),
        };

        response
            .into_response()
            .unwrap_or_else(|_| internal_server_error())
    }
}

fn internal_server_error() -> Response {
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .header(header::CONTENT_TYPE, "application/problem+json")
        .body(
            serde_json::json!({
                "type": null,
                "title": "Internal server error.",
                "status": StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
                "detail": null,
                "instance": null,
                "errors": null,
            })
            .to_string()
            .into(),
        )
        .unwrap_or_else(|_| Response::new("Internal server error".into()))
}
