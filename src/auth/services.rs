use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use time::OffsetDateTime;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::auth::{
    jwt::JwtKeys,
    password::{hash_password, verify_dummy, verify_password},
    repo::UserRepo,
    repo_types::{NewUser, User},
};
use crate::error::AppError;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// The authenticated user attached to a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub phone: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<User> for Identity {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            username: u.username,
            email: u.email,
            phone: u.phone,
            created_at: u.created_at,
        }
    }
}

/// Users plus password hashing. Plaintext passwords go in, only hashes are
/// handed to the repository.
#[derive(Clone)]
pub struct CredentialStore {
    repo: Arc<dyn UserRepo>,
}

impl CredentialStore {
    pub fn new(repo: Arc<dyn UserRepo>) -> Self {
        Self { repo }
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        Ok(self.repo.find_by_email(&normalize_email(email)).await?)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AppError> {
        Ok(self.repo.find_by_id(id).await?)
    }

    pub async fn create(
        &self,
        username: &str,
        email: &str,
        phone: Option<&str>,
        password: &str,
    ) -> Result<User, AppError> {
        let email = normalize_email(email);

        // Fast path only; the repository's uniqueness guard is what counts.
        if self.repo.find_by_email(&email).await?.is_some() {
            return Err(AppError::DuplicateEmail);
        }

        let password_hash = hash_password(password)?;
        self.repo
            .insert(NewUser {
                username: username.trim().to_string(),
                email,
                phone: phone.map(str::trim).filter(|p| !p.is_empty()).map(String::from),
                password_hash,
            })
            .await
    }
}

/// Credential verification, token issuance and request authorization.
pub struct AuthService {
    credentials: CredentialStore,
    keys: JwtKeys,
}

impl AuthService {
    pub fn new(credentials: CredentialStore, keys: JwtKeys) -> Self {
        Self { credentials, keys }
    }

    #[instrument(skip(self, phone, password))]
    pub async fn register(
        &self,
        username: &str,
        email: &str,
        phone: Option<&str>,
        password: &str,
    ) -> Result<(String, Uuid), AppError> {
        let user = match self.credentials.create(username, email, phone, password).await {
            Ok(u) => u,
            Err(AppError::DuplicateEmail) => {
                warn!("email already registered");
                return Err(AppError::DuplicateEmail);
            }
            Err(e) => return Err(e),
        };
        let token = self.issue_token(user.id)?;
        info!(user_id = %user.id, "user registered");
        Ok((token, user.id))
    }

    /// Unknown email and wrong password produce the same error.
    #[instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: &str) -> Result<(String, Uuid), AppError> {
        let Some(user) = self.credentials.find_by_email(email).await? else {
            verify_dummy(password);
            warn!("login unknown email");
            return Err(AppError::InvalidCredentials);
        };

        if !verify_password(password, &user.password_hash)? {
            warn!(user_id = %user.id, "login invalid password");
            return Err(AppError::InvalidCredentials);
        }

        let token = self.issue_token(user.id)?;
        info!(user_id = %user.id, "user logged in");
        Ok((token, user.id))
    }

    pub fn issue_token(&self, user_id: Uuid) -> Result<String, AppError> {
        Ok(self.keys.sign(user_id)?)
    }

    /// Resolves the raw `Authorization` header value into an identity.
    pub async fn authorize(&self, header: Option<&str>) -> Result<Identity, AppError> {
        let header = header.ok_or(AppError::MissingToken)?;
        let token = header
            .strip_prefix("Bearer ")
            .or_else(|| header.strip_prefix("bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AppError::InvalidToken)?;

        let (user_id, _claims) = self.keys.verify(token)?;

        match self.credentials.find_by_id(user_id).await? {
            Some(user) => Ok(user.into()),
            None => {
                warn!(user_id = %user_id, "token for unknown user");
                Err(AppError::UserNotFound)
            }
        }
    }
}
