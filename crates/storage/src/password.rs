//! Argon2id password hashes for locally stored accounts, kept as PHC strings.

use argon2::Argon2;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use snafu::ResultExt;

use super::error::{PasswordHashSnafu, StorageResult};

pub const MIN_PASSWORD_LENGTH: usize = 8;

/// A stored password hash in PHC string form (`$argon2id$v=19$...`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordDigest {
    phc: String,
}

impl PasswordDigest {
    pub fn derive(password: &str) -> StorageResult<Self> {
        let salt = SaltString::generate(&mut OsRng);
        let phc = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .context(PasswordHashSnafu {
                stage: "password-hash-derive",
            })?
            .to_string();
        Ok(Self { phc })
    }

    pub fn from_phc(phc: impl Into<String>) -> Self {
        Self { phc: phc.into() }
    }

    pub fn as_phc(&self) -> &str {
        &self.phc
    }

    /// A stored hash that no longer parses never matches.
    pub fn matches(&self, password: &str) -> bool {
        let parsed = match PasswordHash::new(&self.phc) {
            Ok(parsed) => parsed,
            Err(error) => {
                tracing::warn!(error = %error, "stored password hash is not a valid PHC string");
                return false;
            }
        };
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_accepts_original_password_only() {
        let digest = PasswordDigest::derive("correct horse").unwrap();
        assert!(digest.matches("correct horse"));
        assert!(!digest.matches("correct horse "));
        assert!(!digest.matches(""));
    }

    #[test]
    fn stored_phc_string_verifies_after_reload() {
        let digest = PasswordDigest::derive("hunter22").unwrap();
        assert!(digest.as_phc().starts_with("$argon2id$v=19$"));

        let reloaded = PasswordDigest::from_phc(digest.as_phc().to_string());
        assert!(reloaded.matches("hunter22"));
        assert!(!reloaded.matches("hunter23"));

        let again = PasswordDigest::derive("hunter22").unwrap();
        assert_ne!(again.as_phc(), digest.as_phc());
    }

    #[test]
    fn malformed_stored_hash_never_matches() {
        let digest = PasswordDigest::from_phc("5e884898da28047151d0e56f8dc62927");
        assert!(!digest.matches("password"));
        assert!(!digest.matches(""));
    }
}
