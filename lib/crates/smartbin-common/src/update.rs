//! Partial-field updates applied to the bin document.
//!
//! A [`BinUpdate`] is a set of slash-path fields relative to the bin root.
//! Stores apply it as a single last-write-wins merge: named fields are
//! overwritten, every other field is left alone.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::paths::{fields, level_field, open_field};
use crate::types::{Compartment, LidStatus, WasteClass};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BinUpdate {
    fields: Map<String, Value>,
}

impl BinUpdate {
    /// Open the lid over the compartment matching `label`.
    #[must_use]
    pub fn open(label: WasteClass, at: DateTime<Utc>) -> Self {
        let mut update = Self::default();
        update.set(fields::WASTE_TYPE, label.as_str());
        update.set(fields::LID_STATUS, LidStatus::Open.as_str());
        for compartment in Compartment::ALL {
            update.set(
                &open_field(compartment),
                compartment == label.compartment(),
            );
        }
        update.set(fields::TIMESTAMP, at.to_rfc3339());
        update
    }

    /// Close the lid and both compartments. `waste_type` and `timestamp`
    /// keep their last values.
    #[must_use]
    pub fn close() -> Self {
        let mut update = Self::default();
        update.set(fields::LID_STATUS, LidStatus::Closed.as_str());
        for compartment in Compartment::ALL {
            update.set(&open_field(compartment), false);
        }
        update
    }

    /// Record a fill level for one compartment.
    #[must_use]
    pub fn level(compartment: Compartment, level: f64) -> Self {
        let mut update = Self::default();
        update.set(&level_field(compartment), level);
        update
    }

    fn set(&mut self, field: &str, value: impl Into<Value>) {
        self.fields.insert(field.to_string(), value.into());
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    #[must_use]
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    #[must_use]
    pub fn into_fields(self) -> Map<String, Value> {
        self.fields
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Fill levels are percentages.
pub fn validate_level(level: f64) -> Result<(), &'static str> {
    if !level.is_finite() {
        return Err("level must be a finite number");
    }
    if !(0.0..=100.0).contains(&level) {
        return Err("level must be between 0 and 100");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn open_biodegradable_sets_expected_fields() {
        let at = Utc::now();
        let update = BinUpdate::open(WasteClass::Biodegradable, at);
        assert_eq!(update.get("waste_type"), Some(&json!("biodegradable")));
        assert_eq!(update.get("lid_status"), Some(&json!("open")));
        assert_eq!(update.get("BiodegradableBin/Open"), Some(&json!(true)));
        assert_eq!(update.get("NonBiodegradableBin/Open"), Some(&json!(false)));
        assert_eq!(update.get("timestamp"), Some(&json!(at.to_rfc3339())));
        assert_eq!(update.fields().len(), 5);
    }

    #[test]
    fn close_leaves_waste_type_and_timestamp_untouched() {
        let update = BinUpdate::close();
        assert_eq!(update.get("lid_status"), Some(&json!("closed")));
        assert_eq!(update.get("BiodegradableBin/Open"), Some(&json!(false)));
        assert_eq!(update.get("NonBiodegradableBin/Open"), Some(&json!(false)));
        assert!(update.get("waste_type").is_none());
        assert!(update.get("timestamp").is_none());
    }

    #[test]
    fn level_update_targets_compartment_node() {
        let update = BinUpdate::level(Compartment::NonBiodegradableBin, 55.0);
        assert_eq!(update.get("NonBiodegradableBin/level"), Some(&json!(55.0)));
        assert_eq!(update.fields().len(), 1);
    }

    #[test]
    fn validate_level_bounds() {
        assert!(validate_level(0.0).is_ok());
        assert!(validate_level(100.0).is_ok());
        assert!(validate_level(-0.1).is_err());
        assert!(validate_level(100.5).is_err());
        assert!(validate_level(f64::NAN).is_err());
    }

    proptest! {
        /// Exactly one compartment flag is true in every open update, and it
        /// is the one matching the label.
        #[test]
        fn prop_open_update_flags_exclusive(biodegradable in any::<bool>()) {
            let label = if biodegradable {
                WasteClass::Biodegradable
            } else {
                WasteClass::NonBiodegradable
            };
            let update = BinUpdate::open(label, Utc::now());
            let bio = update.get("BiodegradableBin/Open").and_then(Value::as_bool);
            let non = update.get("NonBiodegradableBin/Open").and_then(Value::as_bool);
            prop_assert_eq!(bio, Some(biodegradable));
            prop_assert_eq!(non, Some(!biodegradable));
        }

        #[test]
        fn prop_validate_level_matches_percent_range(level in -1000.0f64..1000.0) {
            prop_assert_eq!(validate_level(level).is_ok(), (0.0..=100.0).contains(&level));
        }
    }
}
