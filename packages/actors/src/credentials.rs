//! Password hashing and random token generation.
//!
//! Stored credential format: `base64(salt) "." base64(pbkdf2_sha256(password, salt))`.

use std::num::NonZeroU32;

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use rand::RngCore;
use ring::pbkdf2;
use subtle::ConstantTimeEq;

use crate::config::PasswordHashConfig;
use crate::error::ActorError;

/// Derive a credential record for `password` with a fresh random salt.
pub fn hash_password(password: &str, cfg: &PasswordHashConfig) -> Result<String, ActorError> {
    let iterations = NonZeroU32::new(cfg.iterations)
        .ok_or_else(|| ActorError::Validation("PBKDF2 iterations must be non-zero".into()))?;

    let mut salt = vec![0u8; cfg.salt_len];
    rand::rng().fill_bytes(&mut salt);

    let mut hash = vec![0u8; cfg.hash_len];
    pbkdf2::derive(
        pbkdf2::PBKDF2_HMAC_SHA256,
        iterations,
        &salt,
        password.as_bytes(),
        &mut hash,
    );

    Ok(format!("{}.{}", STANDARD.encode(salt), STANDARD.encode(hash)))
}

/// Check `password` against a stored record in constant time.
///
/// A record that does not parse is a mismatch, never an error.
pub fn verify_password(password: &str, record: &str, cfg: &PasswordHashConfig) -> bool {
    let Some(iterations) = NonZeroU32::new(cfg.iterations) else {
        return false;
    };
    let mut parts = record.split('.');
    let (Some(salt), Some(hash), None) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };
    let (Ok(salt), Ok(hash)) = (STANDARD.decode(salt), STANDARD.decode(hash)) else {
        return false;
    };
    if hash.is_empty() {
        return false;
    }

    pbkdf2::verify(
        pbkdf2::PBKDF2_HMAC_SHA256,
        iterations,
        &salt,
        password.as_bytes(),
        &hash,
    )
    .is_ok()
}

/// 256 bits of randomness, URL-safe base64 without padding.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Constant-time token comparison.
pub fn tokens_match(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> PasswordHashConfig {
        PasswordHashConfig {
            iterations: 1_000,
            ..PasswordHashConfig::default()
        }
    }

    #[test]
    fn hash_then_verify() -> Result<(), ActorError> {
        let cfg = fast();
        let record = hash_password("Secret1", &cfg)?;
        assert_eq!(record.split('.').count(), 2);
        assert!(verify_password("Secret1", &record, &cfg));
        assert!(!verify_password("secret1", &record, &cfg));
        Ok(())
    }

    #[test]
    fn same_password_gets_fresh_salt() -> Result<(), ActorError> {
        let cfg = fast();
        assert_ne!(hash_password("pw", &cfg)?, hash_password("pw", &cfg)?);
        Ok(())
    }

    #[test]
    fn malformed_records_never_match() {
        let cfg = fast();
        for record in ["", "onlyone", "a.b.c", "!!!.???", "c2FsdA=="] {
            assert!(!verify_password("pw", record, &cfg), "{record:?}");
        }
    }

    #[test]
    fn tokens_are_url_safe_and_distinct() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn token_comparison() {
        let token = generate_token();
        assert!(tokens_match(&token, &token.clone()));
        assert!(!tokens_match(&token, &generate_token()));
        // Prefixes and length mismatches never match.
        assert!(!tokens_match(&token, &token[..42]));
        assert!(!tokens_match("", &token));
        assert!(tokens_match("", ""));
    }
}
