use lazy_static::lazy_static;
use regex::Regex;
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

use super::{
    dto::{LoginRequest, RefreshRequest, RegisterRequest},
    jwt::{JwtKeys, TokenPair},
    password::{hash_password, verify_dummy, verify_password},
    repo::UserRepository,
    repo_types::{NewUser, User},
};
use crate::{
    config::AdminSeed,
    error::{AppError, AppResult, FieldErrors},
};

lazy_static! {
    static ref USERNAME_RE: Regex = Regex::new(r"^[\w.@+-]+$").unwrap();
}

/// How a login identifier is looked up.
#[derive(Debug, PartialEq, Eq)]
pub enum Identifier {
    Email(String),
    Username(String),
}

/// Anything containing `@` is an email, everything else a username.
pub fn classify_identifier(raw: &str) -> Identifier {
    let raw = raw.trim();
    if raw.contains('@') {
        Identifier::Email(raw.to_lowercase())
    } else {
        Identifier::Username(raw.to_string())
    }
}

/// Username taken from the email's local part, restricted to username characters.
pub fn derive_username(email: &str) -> String {
    let local = email.split('@').next().unwrap_or_default();
    let cleaned: String = local
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '.' | '+' | '-' | '_'))
        .take(150)
        .collect::<String>()
        .to_lowercase();
    if cleaned.is_empty() {
        "user".to_string()
    } else {
        cleaned
    }
}

pub async fn register(
    users: &dyn UserRepository,
    keys: &JwtKeys,
    mut req: RegisterRequest,
) -> AppResult<(User, TokenPair)> {
    req.email = req.email.trim().to_lowercase();
    req.first_name = req.first_name.trim().to_string();
    req.last_name = req.last_name.trim().to_string();
    req.username = req
        .username
        .take()
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty());

    let mut errors = match req.validate() {
        Ok(()) => FieldErrors::new(),
        Err(e) => e.into(),
    };
    let username = match &req.username {
        Some(explicit) => {
            if !USERNAME_RE.is_match(explicit) {
                errors.add(
                    "username",
                    "Enter a valid username. This value may contain only letters, numbers, and @/./+/-/_ characters.",
                );
            }
            explicit.clone()
        }
        None => derive_username(&req.email),
    };
    errors.into_result()?;

    let mut taken = FieldErrors::new();
    if users.find_by_email(&req.email).await?.is_some() {
        taken.add("email", "A user with this email already exists.");
    }
    if users.find_by_username(&username).await?.is_some() {
        taken.add("username", "A user with that username already exists.");
    }
    if !taken.is_empty() {
        warn!(email = %req.email, %username, "registration rejected: duplicate");
        return Err(AppError::Validation(taken));
    }

    let password_hash = hash_password(&req.password)?;
    let user = users
        .create(NewUser {
            username,
            email: req.email,
            password_hash,
            first_name: req.first_name,
            last_name: req.last_name,
            is_staff: false,
        })
        .await?;

    let tokens = keys.issue_pair(user.id)?;
    info!(user_id = %user.id, username = %user.username, "user registered");
    Ok((user, tokens))
}

pub async fn login(
    users: &dyn UserRepository,
    keys: &JwtKeys,
    req: LoginRequest,
) -> AppResult<(User, TokenPair)> {
    let mut errors = match req.validate() {
        Ok(()) => FieldErrors::new(),
        Err(e) => e.into(),
    };
    let identifier = req.identifier().map(classify_identifier);
    if identifier.is_none() {
        errors.add("identifier", "This field is required.");
    }
    let (Some(identifier), true) = (identifier, errors.is_empty()) else {
        return Err(AppError::Validation(errors));
    };

    let found = match &identifier {
        Identifier::Email(email) => users.find_by_email(email).await?,
        Identifier::Username(username) => users.find_by_username(username).await?,
    };
    let Some(user) = found else {
        verify_dummy(&req.password);
        warn!(?identifier, "login for unknown account");
        return Err(AppError::InvalidCredentials);
    };

    if !verify_password(&req.password, &user.password_hash)? {
        warn!(user_id = %user.id, "login with invalid password");
        return Err(AppError::InvalidCredentials);
    }
    if !user.is_active {
        warn!(user_id = %user.id, "login to inactive account");
        return Err(AppError::InvalidCredentials);
    }

    let tokens = keys.issue_pair(user.id)?;
    info!(user_id = %user.id, "user logged in");
    Ok((user, tokens))
}

pub async fn refresh(
    users: &dyn UserRepository,
    keys: &JwtKeys,
    req: RefreshRequest,
) -> AppResult<(User, TokenPair)> {
    req.validate()?;
    let claims = keys.verify_refresh(req.refresh.trim()).map_err(|e| {
        warn!(error = %e, "refresh rejected");
        AppError::Unauthorized("Token is invalid or expired".into())
    })?;
    let user = active_user(users, claims.sub).await?;
    let tokens = keys.issue_pair(user.id)?;
    Ok((user, tokens))
}

/// Loads the account behind a token; gone or deactivated accounts are a 401.
pub async fn active_user(users: &dyn UserRepository, id: Uuid) -> AppResult<User> {
    users
        .find_by_id(id)
        .await?
        .filter(|u| u.is_active)
        .ok_or_else(|| AppError::Unauthorized("User not found".into()))
}

/// Creates the configured administrator unless an account with that email exists.
pub async fn ensure_admin(users: &dyn UserRepository, seed: &AdminSeed) -> anyhow::Result<()> {
    let email = seed.email.trim().to_lowercase();
    if users.find_by_email(&email).await?.is_some() {
        return Ok(());
    }
    let mut username = derive_username(&email);
    if users.find_by_username(&username).await?.is_some() {
        username = format!("{username}-admin");
    }
    let user = users
        .create(NewUser {
            username,
            email,
            password_hash: hash_password(&seed.password)?,
            first_name: String::new(),
            last_name: String::new(),
            is_staff: true,
        })
        .await?;
    info!(user_id = %user.id, username = %user.username, "administrator created");
    Ok(())
}
