// libs/auth-cell/src/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shared_models::auth::Role;

use crate::services::guard::AttemptGuardState;

// ==============================================================================
// ACCOUNT MODEL
// ==============================================================================

/// Account row as stored in `accounts`. Carries both attempt-guard states:
/// one for OTP verification, one for password login. At most one OTP is
/// active per account (`otp_code`/`otp_created_at` are cleared on success).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub is_verified: bool,
    pub otp_code: Option<String>,
    pub otp_created_at: Option<DateTime<Utc>>,
    pub otp_attempts: i32,
    pub otp_locked_until: Option<DateTime<Utc>>,
    pub login_attempts: i32,
    pub login_locked_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn otp_guard(&self) -> AttemptGuardState {
        AttemptGuardState::new(self.otp_attempts, self.otp_locked_until)
    }

    pub fn login_guard(&self) -> AttemptGuardState {
        AttemptGuardState::new(self.login_attempts, self.login_locked_until)
    }
}

// ==============================================================================
// REQUEST/RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    pub role: Option<Role>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VerifyOtpRequest {
    pub email: String,
    pub otp: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResendOtpRequest {
    pub email: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub account_id: Uuid,
    pub email: String,
    pub role: Role,
    pub is_verified: bool,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthError {
    #[error("account is locked for another {remaining_seconds}s")]
    AccountLocked { remaining_seconds: i64 },

    #[error("verification code has expired")]
    OtpExpired,

    #[error("incorrect verification code ({attempts_left} attempts left)")]
    OtpMismatch { attempts_left: i32 },

    #[error("invalid email or password")]
    CredentialMismatch,

    #[error("account not found")]
    AccountNotFound,

    #[error("email is already registered")]
    EmailTaken,

    #[error("password rejected: {0}")]
    WeakPassword(String),

    #[error("database error: {0}")]
    Database(String),
}
