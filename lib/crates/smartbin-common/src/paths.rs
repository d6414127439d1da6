use crate::types::Compartment;

/// Root node of the bin document in the remote store.
/// Children:
///   waste_type                 last classified label
///   lid_status                 "open" | "closed"
///   timestamp                  RFC 3339 time of the last open update
///   BiodegradableBin/Open      compartment actuator flag
///   BiodegradableBin/level     fill level written by the device
///   NonBiodegradableBin/Open
///   NonBiodegradableBin/level
pub const ROOT: &str = "garbage_bin";

/// Field names under [`ROOT`]
pub mod fields {
    pub const WASTE_TYPE: &str = "waste_type";
    pub const LID_STATUS: &str = "lid_status";
    pub const TIMESTAMP: &str = "timestamp";

    /// Leaf under a compartment node
    pub const OPEN: &str = "Open";

    /// Leaf under a compartment node
    pub const LEVEL: &str = "level";
}

/// Timing defaults
pub mod timing {
    /// How long the lid stays reported open after a classification.
    pub const DEFAULT_DWELL_SECS: u64 = 10;

    /// Upper bound on a single remote store call.
    pub const DEFAULT_STORE_TIMEOUT_SECS: u64 = 5;

    /// Upper bound on a single model server call.
    pub const DEFAULT_MODEL_TIMEOUT_SECS: u64 = 30;
}

/// Characters the Firebase Realtime Database rejects in keys.
const FORBIDDEN_CHARS: &[char] = &['.', '$', '#', '[', ']'];

/// Maximum path length accepted by the remote store (bytes).
const MAX_PATH_LEN: usize = 768;

/// `BiodegradableBin/Open` style field for a compartment flag.
#[must_use]
pub fn open_field(compartment: Compartment) -> String {
    format!("{}/{}", compartment.node(), fields::OPEN)
}

/// `BiodegradableBin/level` style field for a compartment level.
#[must_use]
pub fn level_field(compartment: Compartment) -> String {
    format!("{}/{}", compartment.node(), fields::LEVEL)
}

/// Join two slash paths, ignoring empty parts.
#[must_use]
pub fn join(base: &str, rel: &str) -> String {
    segments(base)
        .chain(segments(rel))
        .collect::<Vec<_>>()
        .join("/")
}

/// Non-empty segments of a slash path.
pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Validate a slash path before handing it to a store backend.
/// Returns Ok(()) if valid, Err with description if invalid.
pub fn validate_path(path: &str) -> Result<(), &'static str> {
    if path.len() > MAX_PATH_LEN {
        return Err("path must be at most 768 bytes");
    }
    if segments(path).next().is_none() {
        return Err("path must contain at least one segment");
    }
    if path.contains(FORBIDDEN_CHARS) {
        return Err("path must not contain '.', '$', '#', '[' or ']'");
    }
    if path.chars().any(char::is_control) {
        return Err("path must not contain control characters");
    }
    Ok(())
}
