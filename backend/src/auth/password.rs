use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use std::sync::{Arc, OnceLock};

const PLACEHOLDER_PASSWORD: &str = "placeholder-for-unknown-accounts";

#[derive(Debug, thiserror::Error)]
#[error("password hashing failed: {0}")]
pub struct PasswordError(String);

/// Argon2id hashing in PHC string format.
#[derive(Clone)]
pub struct PasswordManager {
    params: Params,
    // Hashed with `params` on first use so unknown-account checks cost the same.
    placeholder: Arc<OnceLock<Option<String>>>,
}

impl Default for PasswordManager {
    fn default() -> Self {
        Self::with_params(Params::default())
    }
}

impl PasswordManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_params(params: Params) -> Self {
        Self {
            params,
            placeholder: Arc::new(OnceLock::new()),
        }
    }

    /// Minimum-cost parameters so test suites do not spend seconds hashing.
    #[cfg(test)]
    pub fn fast() -> Self {
        Self::with_params(
            Params::new(Params::MIN_M_COST, Params::MIN_T_COST, Params::MIN_P_COST, None).unwrap(),
        )
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    pub fn hash(&self, password: &str) -> Result<String, PasswordError> {
        let salt = SaltString::generate(&mut OsRng);
        self.argon2()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| PasswordError(e.to_string()))
    }

    /// False for a wrong password and for a stored hash that does not parse.
    pub fn verify(&self, password: &str, stored_hash: &str) -> bool {
        match PasswordHash::new(stored_hash) {
            Ok(parsed) => self
                .argon2()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok(),
            Err(e) => {
                log::warn!("Stored password hash is unreadable: {}", e);
                false
            }
        }
    }
}

impl PasswordManager {
    /// Runs a full verification against a fixed hash and always fails. Used
    /// when no account matches, so the lookup takes as long as a real check.
    pub fn verify_placeholder(&self, password: &str) -> bool {
        let placeholder = self
            .placeholder
            .get_or_init(|| self.hash(PLACEHOLDER_PASSWORD).ok());
        if let Some(hash) = placeholder {
            self.verify(password, hash);
        }
        false
    }

    #[cfg(test)]
    pub fn placeholder_ready(&self) -> bool {
        matches!(self.placeholder.get(), Some(Some(_)))
    }
}
