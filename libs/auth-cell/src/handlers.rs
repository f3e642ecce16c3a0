use std::sync::Arc;

use axum::{
    extract::{Json, State},
    http::HeaderMap,
};
use chrono::Utc;
use serde_json::{json, Value};
use tracing::debug;

use shared_config::AppConfig;
use shared_models::auth::TokenResponse;
use shared_models::error::AppError;
use shared_utils::jwt::validate_token;

use crate::models::{
    AuthError, LoginRequest, LoginResponse, ResendOtpRequest, SignupRequest, VerifyOtpRequest,
};
use crate::services::login::LoginService;
use crate::services::otp::OtpService;

fn map_auth_error(e: AuthError) -> AppError {
    match e {
        AuthError::AccountLocked { remaining_seconds } => {
            AppError::locked_for_seconds(remaining_seconds)
        }
        AuthError::OtpExpired => {
            AppError::BadRequest("Verification code has expired, request a new one".to_string())
        }
        AuthError::OtpMismatch { attempts_left } => AppError::BadRequest(format!(
            "Incorrect verification code, {} attempt(s) left",
            attempts_left
        )),
        AuthError::CredentialMismatch => AppError::Auth("Invalid email or password".to_string()),
        AuthError::AccountNotFound => AppError::NotFound("Account not found".to_string()),
        AuthError::EmailTaken => AppError::Conflict("Email is already registered".to_string()),
        AuthError::WeakPassword(msg) => AppError::ValidationError(format!("Password {}", msg)),
        AuthError::Database(msg) => AppError::Database(msg),
    }
}

#[axum::debug_handler]
pub async fn signup(
    State(state): State<Arc<AppConfig>>,
    Json(request): Json<SignupRequest>,
) -> Result<Json<Value>, AppError> {
    debug!("Signup requested for {}", request.email);

    let service = OtpService::new(&state);
    let account = service
        .signup(request, Utc::now())
        .await
        .map_err(map_auth_error)?;

    Ok(Json(json!({
        "success": true,
        "account_id": account.id,
        "message": "Account created, check your email for the verification code"
    })))
}

#[axum::debug_handler]
pub async fn verify_otp(
    State(state): State<Arc<AppConfig>>,
    Json(request): Json<VerifyOtpRequest>,
) -> Result<Json<Value>, AppError> {
    debug!("OTP verification requested for {}", request.email);

    let service = OtpService::new(&state);
    let account = service
        .verify(&request.email, &request.otp, Utc::now())
        .await
        .map_err(map_auth_error)?;

    Ok(Json(json!({
        "success": true,
        "account_id": account.id,
        "verified": account.is_verified
    })))
}

#[axum::debug_handler]
pub async fn resend_otp(
    State(state): State<Arc<AppConfig>>,
    Json(request): Json<ResendOtpRequest>,
) -> Result<Json<Value>, AppError> {
    debug!("OTP resend requested for {}", request.email);

    let service = OtpService::new(&state);
    service
        .issue(&request.email, Utc::now())
        .await
        .map_err(map_auth_error)?;

    Ok(Json(json!({
        "success": true,
        "message": "A new verification code has been sent"
    })))
}

#[axum::debug_handler]
pub async fn login(
    State(state): State<Arc<AppConfig>>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    debug!("Login requested for {}", request.email);

    let service = LoginService::new(&state);
    let account = service
        .login(&request.email, &request.password, Utc::now())
        .await
        .map_err(map_auth_error)?;

    Ok(Json(LoginResponse {
        account_id: account.id,
        email: account.email,
        role: account.role,
        is_verified: account.is_verified,
    }))
}

fn extract_bearer_token(headers: &HeaderMap) -> Result<String, AppError> {
    let auth_header = headers
        .get("Authorization")
        .ok_or_else(|| AppError::Auth("Missing authorization header".to_string()))?;

    let auth_value = auth_header
        .to_str()
        .map_err(|_| AppError::Auth("Invalid authorization header format".to_string()))?;

    if !auth_value.starts_with("Bearer ") {
        return Err(AppError::Auth("Invalid authorization header format".to_string()));
    }

    Ok(auth_value[7..].to_string())
}

#[axum::debug_handler]
pub async fn validate(
    State(config): State<Arc<AppConfig>>,
    headers: HeaderMap,
) -> Result<Json<TokenResponse>, AppError> {
    debug!("Validating token");

    let token = extract_bearer_token(&headers)?;

    match validate_token(&token, &config.supabase_jwt_secret) {
        Ok(user) => Ok(Json(TokenResponse {
            valid: true,
            user_id: user.id,
            email: user.email,
            role: user.role,
        })),
        Err(err) => Err(AppError::Auth(err)),
    }
}
