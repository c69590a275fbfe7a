use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A research field. Users select these, every paper has exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
pub enum Field {
    #[serde(rename = "Computer Science")]
    ComputerScience,
    Medicine,
    Engineering,
    Physics,
    Chemistry,
    Biology,
}

impl Field {
    pub const ALL: [Field; 6] = [
        Field::ComputerScience,
        Field::Medicine,
        Field::Engineering,
        Field::Physics,
        Field::Chemistry,
        Field::Biology,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Field::ComputerScience => "Computer Science",
            Field::Medicine => "Medicine",
            Field::Engineering => "Engineering",
            Field::Physics => "Physics",
            Field::Chemistry => "Chemistry",
            Field::Biology => "Biology",
        }
    }
}

impl FromStr for Field {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|field| field.as_str() == s)
            .ok_or(())
    }
}

impl fmt::Display for Field {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str(self.as_str())
    }
}

/// Drops repeated fields, keeping the first occurrence of each.
pub fn dedup(fields: Vec<Field>) -> Vec<Field> {
    let mut out = Vec::with_capacity(fields.len());
    for field in fields {
        if !out.contains(&field) {
            out.push(field);
        }
    }
    out
}
