use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Router,
};
use tracing::{instrument, warn};

use crate::{
    auth::{
        dto::{AuthResponse, LoginRequest, RegisterRequest, UserDataResponse},
        extractors::AuthUser,
        services::{is_valid_email, normalize_email},
    },
    error::AppError,
    extract::Json,
    state::AppState,
};

const MIN_PASSWORD_LEN: usize = 8;

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(home))
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/user", get(current_user))
}

async fn home() -> &'static str {
    "Welcome to our home page"
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), AppError> {
    let email = normalize_email(&payload.email);

    if payload.username.trim().is_empty() {
        warn!("empty username");
        return Err(AppError::validation("Username is required"));
    }
    if !is_valid_email(&email) {
        warn!(email = %email, "invalid email");
        return Err(AppError::validation("Invalid email"));
    }
    if payload.password.chars().count() < MIN_PASSWORD_LEN {
        warn!("password too short");
        return Err(AppError::validation("Password too short"));
    }

    let (token, user_id) = state
        .auth
        .register(
            &payload.username,
            &email,
            payload.phone.as_deref(),
            &payload.password,
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            message: "registration successful",
            token,
            user_id,
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), AppError> {
    let email = normalize_email(&payload.email);

    // no account can have a malformed address
    if !is_valid_email(&email) {
        warn!(email = %email, "login with malformed email");
        return Err(AppError::InvalidCredentials);
    }

    let (token, user_id) = state.auth.login(&email, &payload.password).await?;

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            message: "login successful",
            token,
            user_id,
        }),
    ))
}

#[instrument(skip_all)]
pub async fn current_user(AuthUser(identity): AuthUser) -> Json<UserDataResponse> {
    Json(UserDataResponse {
        user_data: identity,
    })
}
