// Password hashing and validation service

use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use rand::rngs::OsRng;

use crate::auth::error::AuthError;
use crate::config::PasswordConfig;

/// Minimum accepted password length
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Password service for hashing and verification
///
/// Argon2id with a fresh random salt per hash, so hashing the same secret
/// twice yields two different PHC strings that both verify.
#[derive(Debug, Clone)]
pub struct PasswordService {
    params: Params,
}

impl PasswordService {
    /// Create a service with the given work factor
    pub fn new(config: PasswordConfig) -> Result<Self, AuthError> {
        let params = Params::new(config.memory_kib, config.iterations, config.parallelism, None)
            .map_err(|e| AuthError::Fatal(format!("Invalid Argon2 parameters: {e}")))?;
        Ok(Self { params })
    }

    fn argon2(&self) -> Argon2<'_> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    /// Hash a password using Argon2id
    pub fn hash_password(&self, password: &str) -> Result<String, AuthError> {
        let salt = SaltString::generate(&mut OsRng);

        self.argon2()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| AuthError::Fatal(format!("Password hashing failed: {e}")))
    }

    /// Verify a password against a hash
    ///
    /// Returns `Ok(false)` on mismatch; only an unparseable stored hash is an error.
    pub fn verify_password(&self, password: &str, hash: &str) -> Result<bool, AuthError> {
        let parsed = PasswordHash::new(hash)
            .map_err(|e| AuthError::Internal(format!("Invalid password hash format: {e}")))?;

        match self.argon2().verify_password(password.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(AuthError::Internal(format!("Password verification failed: {e}"))),
        }
    }

    /// Validate password strength requirements
    pub fn validate_password_strength(password: &str) -> Result<(), AuthError> {
        if password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(AuthError::Validation(format!(
                "Password must be at least {} characters long",
                MIN_PASSWORD_LENGTH
            )));
        }

        if !password.chars().any(|c| c.is_alphabetic()) {
            return Err(AuthError::Validation(
                "Password must contain at least one letter".to_string(),
            ));
        }

        if !password.chars().any(|c| c.is_ascii_digit()) {
            return Err(AuthError::Validation(
                "Password must contain at least one digit".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn fast_password_service() -> PasswordService {
    // Lowest legal cost so property tests stay quick
    PasswordService::new(PasswordConfig {
        memory_kib: 8,
        iterations: 1,
        parallelism: 1,
    })
    .expect("test parameters are valid")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_hash_and_verify() {
        let service = fast_password_service();
        let hash = service.hash_password("correct horse 1").unwrap();

        assert!(hash.starts_with("$argon2id$"));
        assert!(service.verify_password("correct horse 1", &hash).unwrap());
        assert!(!service.verify_password("correct horse 2", &hash).unwrap());
    }

    #[test]
    fn test_same_password_gets_different_salt() {
        let service = fast_password_service();
        let first = service.hash_password("warehouse42").unwrap();
        let second = service.hash_password("warehouse42").unwrap();

        assert_ne!(first, second);
        assert!(service.verify_password("warehouse42", &first).unwrap());
        assert!(service.verify_password("warehouse42", &second).unwrap());
    }

    #[test]
    fn test_default_parameters_verify_hashes_from_other_costs() {
        // The PHC string carries its own parameters
        let cheap = fast_password_service();
        let standard = PasswordService::new(PasswordConfig::default()).unwrap();
        let hash = cheap.hash_password("picker-2024").unwrap();
        assert!(standard.verify_password("picker-2024", &hash).unwrap());
    }

    #[test]
    fn test_corrupt_hash_is_an_error() {
        let service = fast_password_service();
        assert!(matches!(
            service.verify_password("anything", "not-a-phc-string"),
            Err(AuthError::Internal(_))
        ));
    }

    #[test]
    fn test_invalid_parameters_are_fatal() {
        let result = PasswordService::new(PasswordConfig {
            memory_kib: 1,
            iterations: 0,
            parallelism: 1,
        });
        assert!(matches!(result, Err(AuthError::Fatal(_))));
    }

    #[test]
    fn test_password_strength() {
        assert!(PasswordService::validate_password_strength("abc12345").is_ok());
        assert!(PasswordService::validate_password_strength("abc123").is_err());
        assert!(PasswordService::validate_password_strength("abcdefghij").is_err());
        assert!(PasswordService::validate_password_strength("1234567890").is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn prop_hash_verifies_and_is_salted(secret in "\\PC{1,40}") {
            let service = fast_password_service();
            let first = service.hash_password(&secret)?;
            let second = service.hash_password(&secret)?;

            prop_assert_ne!(&first, &second);
            prop_assert!(service.verify_password(&secret, &first)?);
            prop_assert!(service.verify_password(&secret, &second)?);
        }

        #[test]
        fn prop_other_secret_does_not_verify(secret in "[a-z0-9]{4,20}", suffix in "[A-Z]{1,4}") {
            let service = fast_password_service();
            let hash = service.hash_password(&secret)?;
            let other = format!("{secret}{suffix}");
            prop_assert!(!service.verify_password(&other, &hash)?);
        }
    }
}
