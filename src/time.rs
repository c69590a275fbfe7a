use ::time::{format_description::well_known::Rfc3339, OffsetDateTime};
use log::error;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// Seconds since the unix epoch. Travels over the wire as an RFC 3339 string.
#[derive(Debug, Clone, Copy, PartialOrd, Ord, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "backend-sql", derive(sqlx::Type))]
#[cfg_attr(feature = "backend-sql", sqlx(transparent))]
pub struct Timestamp(i64);

pub const DAY: i64 = 24 * 60 * 60;

impl Timestamp {
    pub fn now() -> Result<Self, ()> {
        use std::time::SystemTime;

        SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|duration| duration.as_secs() as i64)
            .map(Self)
            .map_err(|e| {
                error!("couldn't get time: {e:?}");
            })
    }

    #[cfg(test)]
    pub fn from_i64(secs: i64) -> Self {
        Self(secs)
    }

    #[cfg(test)]
    pub fn secs(self) -> i64 {
        self.0
    }

    pub fn days_before(self, days: i64) -> Self {
        Self(self.0.saturating_sub(days.saturating_mul(DAY)))
    }

    fn to_rfc3339(self) -> Option<String> {
        OffsetDateTime::from_unix_timestamp(self.0)
            .ok()
            .and_then(|when| when.format(&Rfc3339).ok())
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let s = self
            .to_rfc3339()
            .ok_or_else(|| serde::ser::Error::custom(format!("timestamp {} out of range", self.0)))?;

        serializer.serialize_str(&s)
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;

        OffsetDateTime::parse(&s, &Rfc3339)
            .map(|when| Self(when.unix_timestamp()))
            .map_err(|e| de::Error::custom(format!("invalid timestamp \"{s}\": {e}")))
    }
}
