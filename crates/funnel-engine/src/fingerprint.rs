//! Filter fingerprints for staleness tracking.

use funnel_types::filters::{MAX_BUDGET_KEY, PARENT_RUN_KEY, RETRY_FROM_KEY};
use funnel_types::state::FilterFingerprint;
use funnel_types::{Filters, Platform};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

/// Keys that vary between otherwise identical searches. The budget is
/// written by the launcher and does not change what discovery returns.
const VOLATILE_KEYS: [&str; 4] = ["bdr_names", MAX_BUDGET_KEY, RETRY_FROM_KEY, PARENT_RUN_KEY];

/// SHA-256 over `{"filters": .., "platform": ..}` with volatile keys removed.
/// `serde_json` maps are ordered, so key order in the input does not matter.
pub fn filter_fingerprint(platform: Platform, filters: &Filters) -> FilterFingerprint {
    let clean: Map<String, Value> = filters
        .as_map()
        .iter()
        .filter(|(k, _)| !VOLATILE_KEYS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    let payload = json!({ "filters": clean, "platform": platform.as_str() }).to_string();

    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    FilterFingerprint::new(format!("{:x}", hasher.finalize()))
}
