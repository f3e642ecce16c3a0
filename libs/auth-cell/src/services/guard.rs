// libs/auth-cell/src/services/guard.rs
//
// Rate-limited verification guard: a pure state machine over
// (attempts, locked_until), shared by OTP verification and password login.
// Callers load the state from the account row, run it against `now`, and
// persist whatever comes out.
use chrono::{DateTime, Duration, Utc};

/// Attempt ceiling and lockout duration for one verification flow.
#[derive(Debug, Clone, Copy)]
pub struct GuardPolicy {
    pub ceiling: i32,
    pub lockout_minutes: i64,
}

impl GuardPolicy {
    /// OTP verification: 3 wrong codes lock the account for 10 minutes.
    pub const OTP_VERIFY: GuardPolicy = GuardPolicy {
        ceiling: 3,
        lockout_minutes: 10,
    };

    /// Password login: 5 wrong passwords lock the account for 15 minutes.
    pub const LOGIN: GuardPolicy = GuardPolicy {
        ceiling: 5,
        lockout_minutes: 15,
    };

    pub fn lockout(&self) -> Duration {
        Duration::minutes(self.lockout_minutes)
    }
}

/// An OTP is valid for exactly 3 minutes from creation.
pub const OTP_TTL_SECONDS: i64 = 180;

/// Expiry is independent of the attempt counter and must be evaluated
/// before the submitted code is compared.
pub fn otp_expired(created_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now - created_at >= Duration::seconds(OTP_TTL_SECONDS)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStatus {
    Open,
    Locked { remaining_seconds: i64 },
}

impl LockStatus {
    pub fn is_locked(&self) -> bool {
        matches!(self, LockStatus::Locked { .. })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttemptGuardState {
    pub attempts: i32,
    pub locked_until: Option<DateTime<Utc>>,
}

impl AttemptGuardState {
    pub fn new(attempts: i32, locked_until: Option<DateTime<Utc>>) -> Self {
        Self {
            attempts,
            locked_until,
        }
    }

    /// Check whether the guard currently blocks verification.
    ///
    /// A lock that has naturally expired is cleared here, as a side effect
    /// of the check: there is no background timer, so a lock only goes away
    /// when somebody next asks. Remaining time is rounded up to whole
    /// seconds.
    pub fn check_lock(&mut self, now: DateTime<Utc>) -> LockStatus {
        match self.locked_until {
            Some(until) if now < until => {
                let millis = (until - now).num_milliseconds();
                LockStatus::Locked {
                    remaining_seconds: (millis + 999) / 1000,
                }
            }
            Some(_) => {
                // Lock expired: lazy reset on read.
                *self = Self::default();
                LockStatus::Open
            }
            None => LockStatus::Open,
        }
    }

    /// Count one failed verification. Engages the lock once the ceiling is
    /// reached.
    pub fn record_failure(&mut self, policy: &GuardPolicy, now: DateTime<Utc>) {
        self.attempts += 1;
        if self.attempts >= policy.ceiling {
            self.locked_until = Some(now + policy.lockout());
        }
    }

    pub fn record_success(&mut self) {
        *self = Self::default();
    }

    /// Attempts remaining before lockout, floored at zero.
    pub fn attempts_left(&self, policy: &GuardPolicy) -> i32 {
        (policy.ceiling - self.attempts).max(0)
    }
}
