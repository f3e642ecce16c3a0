// libs/auth-cell/src/services/otp.rs
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::Rng;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::{SupabaseClient, SupabaseError};
use shared_models::auth::Role;

use crate::models::{Account, AuthError, SignupRequest};
use crate::services::guard::{otp_expired, AttemptGuardState, GuardPolicy, LockStatus};
use crate::services::password;

/// OTP-gated signup and verification.
///
/// Guard state lives on the account row; every mutation of the attempt
/// counter is a conditional PATCH keyed on the previously observed value,
/// retried once, so two concurrent failures cannot under-count.
pub struct OtpService {
    supabase: Arc<SupabaseClient>,
}

impl OtpService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
        }
    }

    /// Register a new account and issue its first OTP.
    pub async fn signup(
        &self,
        request: SignupRequest,
        now: DateTime<Utc>,
    ) -> Result<Account, AuthError> {
        password::validate_password_strength(&request.password)?;
        let password_hash = password::hash_password(&request.password)?;

        let code = generate_otp_code();
        let account_data = json!({
            "email": request.email,
            "password_hash": password_hash,
            "role": request.role.unwrap_or(Role::Patient),
            "is_verified": false,
            "otp_code": code,
            "otp_created_at": now.to_rfc3339(),
            "otp_attempts": 0,
            "otp_locked_until": null,
            "login_attempts": 0,
            "login_locked_until": null,
            "created_at": now.to_rfc3339()
        });

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "Prefer",
            reqwest::header::HeaderValue::from_static("return=representation"),
        );

        let result: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/accounts",
                None,
                Some(account_data),
                Some(headers),
            )
            .await
            .map_err(|e| match e {
                SupabaseError::Conflict(_) => AuthError::EmailTaken,
                other => AuthError::Database(other.to_string()),
            })?;

        let account: Account = parse_single(result)?;

        self.queue_otp_email(&account.email, &code);
        info!("Account {} registered, OTP issued", account.id);

        Ok(account)
    }

    /// Generate a fresh OTP for an existing account.
    ///
    /// Issuing resets the attempt counter; a still-active verification lock
    /// blocks reissue so resending cannot be used to sidestep the lockout.
    pub async fn issue(&self, email: &str, now: DateTime<Utc>) -> Result<(), AuthError> {
        let account = self.find_account(email).await?;

        let mut guard = account.otp_guard();
        if let LockStatus::Locked { remaining_seconds } = guard.check_lock(now) {
            return Err(AuthError::AccountLocked { remaining_seconds });
        }

        let code = generate_otp_code();
        let update = json!({
            "otp_code": code,
            "otp_created_at": now.to_rfc3339(),
            "otp_attempts": 0,
            "otp_locked_until": null
        });
        self.patch_account(account.id, update).await?;

        self.queue_otp_email(&account.email, &code);
        debug!("OTP reissued for account {}", account.id);

        Ok(())
    }

    /// Verify a submitted OTP.
    ///
    /// Order matters: lock check, then TTL, then comparison. A locked state
    /// or an expired code short-circuits without touching the attempt
    /// counter.
    pub async fn verify(
        &self,
        email: &str,
        submitted: &str,
        now: DateTime<Utc>,
    ) -> Result<Account, AuthError> {
        let account = self.find_account(email).await?;

        let mut guard = account.otp_guard();
        if let LockStatus::Locked { remaining_seconds } = guard.check_lock(now) {
            return Err(AuthError::AccountLocked { remaining_seconds });
        }
        if guard != account.otp_guard() {
            // A lock expired between failures: persist the lazy reset so the
            // stored counter matches what we are about to build on.
            self.patch_account(
                account.id,
                json!({ "otp_attempts": 0, "otp_locked_until": null }),
            )
            .await?;
        }

        // An absent OTP is reported the same way as a stale one: there is
        // nothing valid to compare against.
        let (code, created_at) = match (account.otp_code.as_deref(), account.otp_created_at) {
            (Some(code), Some(created_at)) => (code, created_at),
            _ => return Err(AuthError::OtpExpired),
        };
        if otp_expired(created_at, now) {
            return Err(AuthError::OtpExpired);
        }

        if submitted == code {
            self.mark_verified(account.id).await?;
            info!("Account {} verified", account.id);
            return Ok(Account {
                is_verified: true,
                otp_code: None,
                otp_created_at: None,
                otp_attempts: 0,
                otp_locked_until: None,
                ..account
            });
        }

        let observed = guard.attempts;
        guard.record_failure(&GuardPolicy::OTP_VERIFY, now);

        if !self.persist_otp_guard(account.id, observed, &guard).await? {
            // A concurrent failure won the conditional write; re-read once
            // and count this attempt on top of the fresh state.
            let fresh = self.find_account(email).await?;
            let mut retry_guard = fresh.otp_guard();
            if let LockStatus::Locked { remaining_seconds } = retry_guard.check_lock(now) {
                return Err(AuthError::AccountLocked { remaining_seconds });
            }
            let observed = fresh.otp_attempts;
            retry_guard.record_failure(&GuardPolicy::OTP_VERIFY, now);
            if !self
                .persist_otp_guard(fresh.id, observed, &retry_guard)
                .await?
            {
                return Err(AuthError::Database(
                    "concurrent update on OTP attempt counter".to_string(),
                ));
            }
            guard = retry_guard;
        }

        warn!(
            "OTP mismatch for account {} ({} attempts left)",
            account.id,
            guard.attempts_left(&GuardPolicy::OTP_VERIFY)
        );
        Err(AuthError::OtpMismatch {
            attempts_left: guard.attempts_left(&GuardPolicy::OTP_VERIFY),
        })
    }

    // ==========================================================================
    // PRIVATE HELPERS
    // ==========================================================================

    async fn find_account(&self, email: &str) -> Result<Account, AuthError> {
        let path = format!("/rest/v1/accounts?email=eq.{}", urlencoding::encode(email));
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, None, None)
            .await
            .map_err(|e| AuthError::Database(e.to_string()))?;

        if result.is_empty() {
            return Err(AuthError::AccountNotFound);
        }

        serde_json::from_value(result[0].clone())
            .map_err(|e| AuthError::Database(format!("failed to parse account: {}", e)))
    }

    async fn patch_account(&self, account_id: Uuid, update: Value) -> Result<(), AuthError> {
        let path = format!("/rest/v1/accounts?id=eq.{}", account_id);
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "Prefer",
            reqwest::header::HeaderValue::from_static("return=representation"),
        );

        let result: Vec<Value> = self
            .supabase
            .request_with_headers(Method::PATCH, &path, None, Some(update), Some(headers))
            .await
            .map_err(|e| AuthError::Database(e.to_string()))?;

        if result.is_empty() {
            return Err(AuthError::AccountNotFound);
        }
        Ok(())
    }

    /// Conditional write of the OTP guard state, keyed on the attempt count
    /// we read. Returns false when no row matched (a concurrent writer got
    /// there first).
    async fn persist_otp_guard(
        &self,
        account_id: Uuid,
        observed_attempts: i32,
        guard: &AttemptGuardState,
    ) -> Result<bool, AuthError> {
        let path = format!(
            "/rest/v1/accounts?id=eq.{}&otp_attempts=eq.{}",
            account_id, observed_attempts
        );
        let update = json!({
            "otp_attempts": guard.attempts,
            "otp_locked_until": guard.locked_until.map(|t| t.to_rfc3339())
        });

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "Prefer",
            reqwest::header::HeaderValue::from_static("return=representation"),
        );

        let result: Vec<Value> = self
            .supabase
            .request_with_headers(Method::PATCH, &path, None, Some(update), Some(headers))
            .await
            .map_err(|e| AuthError::Database(e.to_string()))?;

        Ok(!result.is_empty())
    }

    async fn mark_verified(&self, account_id: Uuid) -> Result<(), AuthError> {
        self.patch_account(
            account_id,
            json!({
                "is_verified": true,
                "otp_code": null,
                "otp_created_at": null,
                "otp_attempts": 0,
                "otp_locked_until": null
            }),
        )
        .await
    }

    /// Fire-and-forget email dispatch. Delivery failures are logged, never
    /// surfaced into the signup/verification outcome.
    fn queue_otp_email(&self, recipient: &str, code: &str) {
        let supabase = Arc::clone(&self.supabase);
        let recipient = recipient.to_string();
        let payload = json!({
            "recipient": recipient,
            "template": "otp_code",
            "context": { "code": code }
        });

        tokio::spawn(async move {
            let mut headers = reqwest::header::HeaderMap::new();
            headers.insert(
                "Prefer",
                reqwest::header::HeaderValue::from_static("return=representation"),
            );
            if let Err(e) = supabase
                .request_with_headers::<Vec<Value>>(
                    Method::POST,
                    "/rest/v1/outbound_emails",
                    None,
                    Some(payload),
                    Some(headers),
                )
                .await
            {
                warn!("Failed to queue OTP email for {}: {}", recipient, e);
            }
        });
    }
}

fn generate_otp_code() -> String {
    let n: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("{:06}", n)
}

fn parse_single(mut rows: Vec<Value>) -> Result<Account, AuthError> {
    if rows.is_empty() {
        return Err(AuthError::Database(
            "storage returned no representation".to_string(),
        ));
    }
    serde_json::from_value(rows.remove(0))
        .map_err(|e| AuthError::Database(format!("failed to parse account: {}", e)))
}
