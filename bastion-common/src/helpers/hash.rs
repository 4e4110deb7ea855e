//! Password hashing. Bcrypt is mandated explicitly by the catalog's
//! credential format (`UserSecret.passwordHash`); callers on the hot auth
//! path should run these through `tokio::task::spawn_blocking` since bcrypt
//! is deliberately CPU-bound (~100ms).

use bcrypt::{hash, verify, DEFAULT_COST};

use crate::error::BastionError;

pub fn hash_password(password: &str) -> Result<String, BastionError> {
    hash(password, DEFAULT_COST).map_err(|e| BastionError::Other(Box::new(e)))
}

/// `doPasswordsMatch` — never panics, never matches an empty password
/// against any hash, and degrades to `false` on a malformed hash rather
/// than erroring the caller out of the auth flow.
pub fn do_passwords_match(hash: &str, password: &str) -> bool {
    if password.is_empty() {
        return false;
    }
    verify(password, hash).unwrap_or(false)
}
