// libs/auth-cell/src/services/login.rs
use std::sync::Arc;

use chrono::{DateTime, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::{Account, AuthError};
use crate::services::guard::{AttemptGuardState, GuardPolicy, LockStatus};
use crate::services::password;

/// Password login behind the attempt guard.
pub struct LoginService {
    supabase: Arc<SupabaseClient>,
}

impl LoginService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
        }
    }

    /// Authenticate by email and password.
    ///
    /// The lock check runs before the password is ever compared; a locked
    /// account short-circuits without counting an attempt. An unknown email
    /// reports the same error as a wrong password.
    pub async fn login(
        &self,
        email: &str,
        submitted_password: &str,
        now: DateTime<Utc>,
    ) -> Result<Account, AuthError> {
        let account = match self.find_account(email).await {
            Ok(account) => account,
            Err(AuthError::AccountNotFound) => return Err(AuthError::CredentialMismatch),
            Err(e) => return Err(e),
        };

        let mut guard = account.login_guard();
        if let LockStatus::Locked { remaining_seconds } = guard.check_lock(now) {
            return Err(AuthError::AccountLocked { remaining_seconds });
        }
        if guard != account.login_guard() {
            // Persist the lazy reset of an expired lock before building on it.
            self.patch_account(
                account.id,
                json!({ "login_attempts": 0, "login_locked_until": null }),
            )
            .await?;
        }

        if password::verify_password(submitted_password, &account.password_hash)? {
            if guard.attempts != 0 || guard.locked_until.is_some() {
                guard.record_success();
                self.patch_account(
                    account.id,
                    json!({ "login_attempts": 0, "login_locked_until": null }),
                )
                .await?;
            }
            debug!("Login succeeded for account {}", account.id);
            return Ok(account);
        }

        let observed = guard.attempts;
        guard.record_failure(&GuardPolicy::LOGIN, now);

        if !self.persist_login_guard(account.id, observed, &guard).await? {
            // Lost the conditional write to a concurrent failure; re-read
            // and count this attempt on top of the fresh state.
            let fresh = match self.find_account(email).await {
                Ok(account) => account,
                Err(AuthError::AccountNotFound) => return Err(AuthError::CredentialMismatch),
                Err(e) => return Err(e),
            };
            let mut retry_guard = fresh.login_guard();
            if let LockStatus::Locked { remaining_seconds } = retry_guard.check_lock(now) {
                return Err(AuthError::AccountLocked { remaining_seconds });
            }
            let observed = fresh.login_attempts;
            retry_guard.record_failure(&GuardPolicy::LOGIN, now);
            if !self
                .persist_login_guard(fresh.id, observed, &retry_guard)
                .await?
            {
                return Err(AuthError::Database(
                    "concurrent update on login attempt counter".to_string(),
                ));
            }
        }

        warn!("Failed login for account {}", account.id);
        Err(AuthError::CredentialMismatch)
    }

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

    async fn persist_login_guard(
        &self,
        account_id: Uuid,
        observed_attempts: i32,
        guard: &AttemptGuardState,
    ) -> Result<bool, AuthError> {
        let path = format!(
            "/rest/v1/accounts?id=eq.{}&login_attempts=eq.{}",
            account_id, observed_attempts
        );
        let update = json!({
            "login_attempts": guard.attempts,
            "login_locked_until": guard.locked_until.map(|t| t.to_rfc3339())
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
}
