//! Share-link password verifiers (Argon2 PHC strings).

use argon2::{
    Argon2, PasswordHash,
    password_hash::{PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};

/// Derive a verifier for `password` with a fresh random salt.
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    Ok(Argon2::default()
        .hash_password(password.as_bytes(), &salt)?
        .to_string())
}

/// Check `password` against a stored verifier.
///
/// `Ok(false)` is a wrong password; `Err` means the stored verifier itself is
/// unusable.
pub fn verify_password(password: &str, verifier: &str) -> Result<bool, argon2::password_hash::Error> {
    let parsed = PasswordHash::new(verifier)?;
    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(err) => Err(err),
    }
}

/// Failure of an off-thread password task.
#[derive(Debug, thiserror::Error)]
pub enum PasswordTaskError {
    #[error(transparent)]
    Hash(#[from] argon2::password_hash::Error),
    #[error("password task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// `hash_password` on the blocking pool.
pub async fn hash_password_blocking(password: String) -> Result<String, PasswordTaskError> {
    Ok(tokio::task::spawn_blocking(move || hash_password(&password)).await??)
}

/// `verify_password` on the blocking pool.
pub async fn verify_password_blocking(
    password: String,
    verifier: String,
) -> Result<bool, PasswordTaskError> {
    Ok(tokio::task::spawn_blocking(move || verify_password(&password, &verifier)).await??)
}
