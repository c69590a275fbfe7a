use std::fmt;
use std::str::FromStr;

use argon2::Argon2;
use log::error;
use password_hash::rand_core::OsRng;
use password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use serde::Deserialize;
use uuid::Uuid;

pub const SESSION_COOKIE: &str = "sessionid";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl From<Uuid> for SessionId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl FromStr for SessionId {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::try_parse(s).map(Self).map_err(|_| ())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{}", self.0.simple())
    }
}

#[derive(Debug, Deserialize)]
pub struct AuthAttempt {
    username: String,
    password: String,
}

impl AuthAttempt {
    #[cfg(test)]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn user(&self) -> &str {
        &self.username
    }

    pub fn matches(&self, pwhash: &str) -> bool {
        verify_password(&self.password, pwhash)
    }
}

/// Salted argon2id hash in PHC string form.
pub fn hash_password(password: &str) -> Result<String, ()> {
    let salt = SaltString::generate(&mut OsRng);

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| {
            error!("couldn't hash password: {e}");
        })
}

pub fn verify_password(password: &str, pwhash: &str) -> bool {
    let parsed = match PasswordHash::new(pwhash) {
        Ok(parsed) => parsed,
        Err(e) => {
            error!("stored password hash is unparseable: {e}");
            return false;
        }
    };

    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}
