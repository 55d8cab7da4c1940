use lazy_static::lazy_static;
use regex::Regex;
use tracing::{error, info, warn};

use crate::{
    auth::{
        dto::RegisterRequest,
        password::{hash_password, verify_password},
    },
    db::{CredentialStore, NewUser, StoreError, User},
    error::{AppError, AppResult},
};

pub const NAME_MAX_CHARS: usize = 100;
pub const PASSWORD_MIN_CHARS: usize = 8;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Trims a display name; blank becomes absent.
pub(crate) fn normalize_name(name: Option<&str>) -> AppResult<Option<String>> {
    let Some(name) = name.map(str::trim).filter(|n| !n.is_empty()) else {
        return Ok(None);
    };
    if name.chars().count() > NAME_MAX_CHARS {
        return Err(AppError::Validation(
            "Name must be less than 100 characters".into(),
        ));
    }
    Ok(Some(name.to_string()))
}

/// Creates a credential account. The email is matched exactly, case included.
pub async fn register(store: &dyn CredentialStore, req: RegisterRequest) -> AppResult<User> {
    let email = req.email.as_deref().map(str::trim).unwrap_or_default();
    let password = req.password.unwrap_or_default();

    if !is_valid_email(email) {
        warn!("register with invalid email");
        return Err(AppError::Validation("Invalid email".into()));
    }
    if password.chars().count() < PASSWORD_MIN_CHARS {
        warn!("register with short password");
        return Err(AppError::Validation("Password too short".into()));
    }
    let name = normalize_name(req.name.as_deref())?;

    let taken = store
        .find_user_by_email(email)
        .await
        .map_err(AppError::upstream("Registration failed"))?;
    if taken.is_some() {
        warn!(email = %email, "email already registered");
        return Err(AppError::Conflict("User already exists".into()));
    }

    let password_hash = hash_password(&password).map_err(AppError::upstream("Registration failed"))?;

    let user = store
        .insert_user(NewUser {
            email: email.to_string(),
            password_hash: Some(password_hash),
            name,
            avatar_url: None,
        })
        .await
        .map_err(|e| match e {
            // lost a race with a concurrent registration
            StoreError::DuplicateEmail => AppError::Conflict("User already exists".into()),
            other => AppError::upstream("Registration failed")(other),
        })?;

    info!(user_id = %user.id, "user registered");
    Ok(user)
}

/// Credential sign-in. `Ok(None)` covers unknown email, OAuth-only accounts
/// and wrong passwords alike.
pub async fn authenticate(
    store: &dyn CredentialStore,
    email: &str,
    password: &str,
) -> Result<Option<User>, StoreError> {
    if email.is_empty() || password.is_empty() {
        return Ok(None);
    }

    let Some(user) = store.find_user_by_email(email).await? else {
        warn!("login unknown email");
        return Ok(None);
    };
    let Some(hash) = user.password_hash.as_deref() else {
        warn!(user_id = %user.id, "login against account without password");
        return Ok(None);
    };

    match verify_password(password, hash) {
        Ok(true) => {
            info!(user_id = %user.id, "user logged in");
            Ok(Some(user))
        }
        Ok(false) => {
            warn!(user_id = %user.id, "login invalid password");
            Ok(None)
        }
        Err(e) => {
            error!(error = %e, user_id = %user.id, "stored password hash unreadable");
            Ok(None)
        }
    }
}
