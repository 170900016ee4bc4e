//! Conversion between profiles and checkpoint records.
//!
//! A checkpoint record is the JSON form of a [`Profile`]. Ephemeral payloads
//! are `#[serde(skip)]`, so every record holds only strings, numbers,
//! booleans, nulls and nested lists/maps of those.

use serde_json::Value;

use crate::profile::Profile;

/// Snapshot profiles for `Run::stage_outputs`.
///
/// # Errors
///
/// Returns a serialization error if a profile cannot be represented as JSON.
/// Non-finite scores are written as `null` and read back as NaN.
pub fn to_checkpoint(profiles: &[Profile]) -> serde_json::Result<Vec<Value>> {
    profiles.iter().map(serde_json::to_value).collect()
}

/// Rebuild profiles from checkpoint records.
///
/// # Errors
///
/// Returns a deserialization error if any record is not a valid profile.
pub fn from_checkpoint(records: &[Value]) -> serde_json::Result<Vec<Profile>> {
    records
        .iter()
        .map(|record| serde_json::from_value(record.clone()))
        .collect()
}
