//! Serde helper for optional positions encoded as `-1` when absent.

use serde::{Deserialize, Deserializer, Serializer};

pub fn serialize<S>(value: &Option<usize>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match value {
        Some(v) => serializer.serialize_i64(*v as i64),
        None => serializer.serialize_i64(-1),
    }
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<usize>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = i64::deserialize(deserializer)?;
    Ok(usize::try_from(raw).ok())
}
