// SPDX-License-Identifier: MIT OR Apache-2.0

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serializer};

/// Helper method for `serde` to serialize bytes into a hex string.
pub fn serialize_hex<S>(value: &[u8], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    hex::serde::serialize(value, serializer)
}

/// Helper method for `serde` to deserialize from a hex string into bytes.
pub fn deserialize_hex<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    hex::serde::deserialize(deserializer)
}

/// Serde helpers for optional ISO-8601 timestamps with millisecond precision and `Z` suffix
/// (`2015-08-21T09:58:19.733Z`), the canonical wire form for post times.
pub mod timestamp_opt {
    use super::*;

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(timestamp) => {
                serializer.serialize_str(&timestamp.to_rfc3339_opts(SecondsFormat::Millis, true))
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value: Option<String> = Option::deserialize(deserializer)?;
        match value {
            Some(raw) => {
                let timestamp = DateTime::parse_from_rfc3339(&raw)
                    .map_err(serde::de::Error::custom)?
                    .with_timezone(&Utc);
                Ok(Some(timestamp))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Test {
        #[serde(with = "super::timestamp_opt")]
        timestamp: Option<DateTime<Utc>>,
    }

    #[test]
    fn timestamps_use_millisecond_precision_and_zulu_suffix() {
        let test = Test {
            timestamp: Some(
                DateTime::parse_from_rfc3339("2015-08-21T09:58:19.733Z")
                    .unwrap()
                    .with_timezone(&Utc),
            ),
        };

        let json = serde_json::to_string(&test).unwrap();
        assert_eq!(json, "{\"timestamp\":\"2015-08-21T09:58:19.733Z\"}");

        let test_again: Test = serde_json::from_str(&json).unwrap();
        assert_eq!(test, test_again);
    }

    #[test]
    fn absent_timestamps_are_null() {
        let json = serde_json::to_string(&Test { timestamp: None }).unwrap();
        assert_eq!(json, "{\"timestamp\":null}");

        let test: Test = serde_json::from_str("{\"timestamp\":null}").unwrap();
        assert_eq!(test.timestamp, None);
    }
}
