use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use hmac::{Hmac, Mac};
use jwt::{RegisteredClaims, SignWithKey, VerifyWithKey};
use serde::Serialize;
use sha2::Sha256;

use crate::db::schema::users;
use crate::types::AppError;

/// Sessions stay valid for two weeks.
pub const SESSION_TTL_SECS: u64 = 14 * 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Identifiable, Serialize)]
#[diesel(table_name = users)]
pub struct User {
    #[serde(skip_serializing)]
    pub id: i32,
    pub username: String,
    pub email: String,
    pub full_name: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    #[serde(skip_serializing)]
    pub date_joined: NaiveDateTime,
}

/// The public face of a user next to their posts and comments.
#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Serialize)]
#[diesel(table_name = users)]
pub struct Author {
    #[serde(skip_serializing)]
    pub id: i32,
    pub username: String,
    pub full_name: String,
}

fn session_key(secret: &str) -> Result<Hmac<Sha256>, AppError> {
    Hmac::<Sha256>::new_from_slice(secret.as_bytes()).map_err(|_| AppError::Internal)
}

impl User {
    pub fn make_password(password: &str) -> Result<String, AppError> {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| {
                tracing::error!("failed to hash password: {}", e);
                AppError::Internal
            })
    }

    pub fn verify_password(&self, password: &str) -> bool {
        let hash = match PasswordHash::new(&self.password_hash) {
            Ok(hash) => hash,
            Err(err) => {
                tracing::error!("failed to parse password hash of {}: {}", self.username, err);
                return false;
            }
        };

        Argon2::default()
            .verify_password(password.as_bytes(), &hash)
            .is_ok()
    }

    /// A signed session token naming this user as its subject.
    pub fn session_token(&self, secret: &str) -> Result<String, AppError> {
        let key = session_key(secret)?;
        let now = Utc::now().timestamp() as u64;
        let claims = RegisteredClaims {
            subject: Some(self.id.to_string()),
            issued_at: Some(now),
            expiration: Some(now + SESSION_TTL_SECS),
            ..Default::default()
        };
        claims.sign_with_key(&key).map_err(|e| {
            tracing::error!("failed to sign session token: {}", e);
            AppError::Internal
        })
    }

    /// Verifies a session token and loads the user it names. Bad signatures,
    /// expired tokens and deleted users all come back as `Unauthenticated`.
    pub fn load_from_token(
        token: &str,
        secret: &str,
        connection: &mut SqliteConnection,
    ) -> Result<User, AppError> {
        let key = session_key(secret)?;
        let claims: RegisteredClaims = token
            .verify_with_key(&key)
            .map_err(|_| AppError::Unauthenticated)?;

        let now = Utc::now().timestamp() as u64;
        match claims.expiration {
            Some(exp) if exp > now => {}
            _ => return Err(AppError::Unauthenticated),
        }

        let user_id = claims
            .subject
            .as_deref()
            .and_then(|sub| sub.parse::<i32>().ok())
            .ok_or(AppError::Unauthenticated)?;

        users::table
            .find(user_id)
            .select(User::as_select())
            .first(connection)
            .optional()?
            .ok_or(AppError::Unauthenticated)
    }

    pub fn load_by_name(name: &str, connection: &mut SqliteConnection) -> Result<User, AppError> {
        users::table
            .filter(users::username.eq(name))
            .select(User::as_select())
            .first(connection)
            .map_err(|e| e.into())
    }

    pub fn create(new_user: &NewUser, connection: &mut SqliteConnection) -> Result<User, AppError> {
        diesel::insert_into(users::table)
            .values(new_user)
            .returning(User::as_returning())
            .get_result(connection)
            .map_err(|e| e.into())
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub password_hash: String,
}
