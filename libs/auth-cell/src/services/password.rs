// libs/auth-cell/src/services/password.rs
use argon2::password_hash::{rand_core::OsRng, SaltString};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};

use crate::models::AuthError;

pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AuthError::Database(format!("password hashing failed: {}", e)))
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool, AuthError> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|e| AuthError::Database(format!("stored hash is malformed: {}", e)))?;
    let argon2 = Argon2::default();

    match argon2.verify_password(password.as_bytes(), &parsed_hash) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(AuthError::Database(format!(
            "password verification failed: {}",
            e
        ))),
    }
}

/// Minimal strength gate applied at signup.
pub fn validate_password_strength(password: &str) -> Result<(), AuthError> {
    if password.len() < 8 {
        return Err(AuthError::WeakPassword(
            "must be at least 8 characters long".to_string(),
        ));
    }
    if !password.chars().any(|c| c.is_alphabetic()) || !password.chars().any(|c| c.is_numeric()) {
        return Err(AuthError::WeakPassword(
            "must contain both letters and digits".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify_round_trip() {
        let hash = hash_password("correct horse 1").unwrap();
        assert!(verify_password("correct horse 1", &hash).unwrap());
        assert!(!verify_password("wrong horse 1", &hash).unwrap());
    }

    #[test]
    fn strength_gate_rejects_short_and_single_class() {
        assert!(validate_password_strength("ab1").is_err());
        assert!(validate_password_strength("onlyletters").is_err());
        assert!(validate_password_strength("12345678901").is_err());
        assert!(validate_password_strength("letters4nd1").is_ok());
    }
}
