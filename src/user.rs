use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::field::Field;
use crate::time::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct UserId(Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::try_parse(s).map(Self).map_err(|_| ())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub pwhash: String,
    pub selected_fields: Vec<Field>,
    pub created_at: Timestamp,
}

/// What the client gets to see about a user.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub selected_fields: Vec<Field>,
    pub created_at: Timestamp,
}

impl From<User> for Profile {
    fn from(user: User) -> Self {
        let User {
            id,
            username,
            email,
            pwhash: _,
            selected_fields,
            created_at,
        } = user;

        Self {
            id,
            username,
            email,
            selected_fields,
            created_at,
        }
    }
}
