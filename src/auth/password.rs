//! Argon2id password hashes stored as PHC strings.

use argon2::{
    password_hash::{self, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::rngs::OsRng;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("could not hash password: {0}")]
    Hash(password_hash::Error),
    #[error("stored password hash is unreadable: {0}")]
    UnreadableHash(password_hash::Error),
}

fn hasher() -> Argon2<'static> {
    Argon2::default()
}

pub fn hash_password(plain: &str) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);
    hasher()
        .hash_password(plain.as_bytes(), &salt)
        .map(|phc| phc.to_string())
        .map_err(PasswordError::Hash)
}

/// A wrong password is `Ok(false)`. Only a stored value that is not a usable
/// argon2 PHC string is an error.
pub fn verify_password(plain: &str, stored: &str) -> Result<bool, PasswordError> {
    let phc = PasswordHash::new(stored).map_err(PasswordError::UnreadableHash)?;
    match hasher().verify_password(plain.as_bytes(), &phc) {
        Ok(()) => Ok(true),
        Err(password_hash::Error::Password) => Ok(false),
        Err(other) => Err(PasswordError::UnreadableHash(other)),
    }
}
