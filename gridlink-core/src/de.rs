//! Deserialization helpers for server-sent documents

use serde::{Deserialize, Deserializer};

/// Reads an explicit `null` as the field's default
///
/// Pair with `#[serde(default)]` so that a missing field and a `null` one
/// mean the same thing.
pub fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
