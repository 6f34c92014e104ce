use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError, ValidationErrors};

use crate::AppState;
use crate::config::{ClientSettings, Configuration};
use crate::error::{Result, ServerError};
use crate::password::{self, Password};
use crate::provider::PasswordChangeRequest;
use crate::router::Valid;
use crate::telemetry;

pub const CHANGED: &str = "You have changed your password successfully.";

/// Change password form.
#[derive(Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Body {
    #[validate(length(min = 1, max = 255, message = "Username is required."))]
    username: String,
    #[validate(length(min = 1, message = "Current password is required."))]
    current_password: String,
    #[validate(length(
        min = 1,
        max = 255,
        message = "New password is required."
    ))]
    new_password: String,
    #[validate(must_match(
        other = "new_password",
        message = "Passwords do not match."
    ))]
    new_password_verify: String,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct Payload<T> {
    pub payload: T,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Generated {
    pub password: Password,
}

/// Handler returning the web client settings.
pub async fn settings(
    State(config): State<Arc<Configuration>>,
) -> Json<ClientSettings> {
    Json(config.client_settings.clone())
}

/// Handler to change the password of a user.
pub async fn handler(
    State(state): State<AppState>,
    Valid(body): Valid<Body>,
) -> Result<Json<Payload<String>>> {
    check_policy(&body, &state.config.client_settings)?;

    let request = PasswordChangeRequest {
        username: body.username.trim().to_owned(),
        current_password: Password::new(body.current_password),
        new_password: Password::new(body.new_password),
    };

    let outcome = state.provider.change_password(&request).await;
    telemetry::record_password_change(
        state.provider.name(),
        outcome.as_ref().map(|_| ()),
    );
    outcome?;

    Ok(Json(Payload {
        payload: CHANGED.to_owned(),
    }))
}

/// Handler returning a random password.
pub async fn generated(
    State(config): State<Arc<Configuration>>,
) -> Result<Json<Payload<Generated>>> {
    let settings = &config.client_settings;
    if !settings.use_password_generation {
        return Err(ServerError::NotFound);
    }

    Ok(Json(Payload {
        payload: Generated {
            password: password::generate(settings.password_entropy),
        },
    }))
}

fn invalid(code: &'static str, message: &'static str) -> ValidationError {
    ValidationError::new(code).with_message(message.into())
}

/// Rules depending on [`ClientSettings`].
fn check_policy(
    body: &Body,
    settings: &ClientSettings,
) -> std::result::Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::new();

    if body.new_password == body.current_password {
        errors.add(
            "new_password",
            invalid("unchanged", "New password must differ from the current one."),
        );
    }

    let pattern = if settings.use_email {
        &settings.validation_regex.email_regex
    } else {
        &settings.validation_regex.username_regex
    };
    if !pattern.is_empty()
        && Regex::new(pattern).is_ok_and(|re| !re.is_match(body.username.trim()))
    {
        errors.add("username", invalid("pattern", "Username is not valid."));
    }

    if settings.minimum_distance > 0
        && password::distance(&body.current_password, &body.new_password)
            < settings.minimum_distance
    {
        errors.add(
            "new_password",
            invalid("distance", "New password is too similar to the current one."),
        );
    }

    if settings.minimum_score > 0
        && password::score(&body.new_password, &[body.username.as_str()])
            < settings.minimum_score
    {
        errors.add("new_password", invalid("score", "Password is too weak."));
    }

    if errors.errors().is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
