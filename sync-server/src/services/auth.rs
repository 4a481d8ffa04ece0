//! Registration, login and token issuance.
//!
//! Treated as a thin, opaque credential surface — argon2 for password
//! hashing, a single HS256 JWT for session tokens. Nothing here tries to be
//! a full auth system; it exists because the sync protocol needs *some*
//! real identity behind each request.

use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::user::{self, User};

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user id
    pub username: String,
    pub exp: i64,
}

pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("password hashing failed: {e}"))?;
    Ok(hash.to_string())
}

pub fn verify_password(password: &str, hash: &str) -> anyhow::Result<bool> {
    let parsed = PasswordHash::new(hash).map_err(|e| anyhow::anyhow!("invalid password hash: {e}"))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

pub fn issue_token(user: &User, secret: &str, expiration_secs: i64) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user.id.clone(),
        username: user.username.clone(),
        exp: (chrono::Utc::now().timestamp() + expiration_secs),
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes()))
        .map_err(|e| anyhow::anyhow!("token issuance failed: {e}"))
}

pub fn verify_token(token: &str, secret: &str) -> Result<Claims, AppError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| AppError::Unauthorized(format!("invalid or expired token: {e}")))
}

pub fn register(
    conn: &rusqlite::Connection,
    username: &str,
    password: &str,
) -> Result<User, AppError> {
    if username.trim().is_empty() || password.is_empty() {
        return Err(AppError::BadRequest("username and password are required".into()));
    }
    if user::find_by_username(conn, username).map_err(AppError::Internal)?.is_some() {
        return Err(AppError::Conflict("username already exists".into()));
    }
    let hash = hash_password(password).map_err(AppError::Internal)?;
    user::create(conn, username, &hash).map_err(AppError::Internal)
}

pub fn login(conn: &rusqlite::Connection, username: &str, password: &str) -> Result<User, AppError> {
    let user = user::find_by_username(conn, username)
        .map_err(AppError::Internal)?
        .ok_or_else(|| AppError::Unauthorized("invalid credentials".into()))?;
    let ok = verify_password(password, &user.password_hash).map_err(AppError::Internal)?;
    if !ok {
        return Err(AppError::Unauthorized("invalid credentials".into()));
    }
    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hash_round_trips() {
        let hash = hash_password("correct horse battery staple").unwrap();
        assert!(verify_password("correct horse battery staple", &hash).unwrap());
        assert!(!verify_password("wrong password", &hash).unwrap());
    }

    #[test]
    fn token_round_trips_and_rejects_bad_secret() {
        let user = User {
            id: "user-1".into(),
            username: "alice".into(),
            password_hash: String::new(),
            created_at: String::new(),
        };
        let token = issue_token(&user, "secret-a", 3600).unwrap();
        let claims = verify_token(&token, "secret-a").unwrap();
        assert_eq!(claims.sub, "user-1");
        assert!(verify_token(&token, "secret-b").is_err());
    }
}
