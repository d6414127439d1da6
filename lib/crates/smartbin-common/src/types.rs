use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::paths::fields;

/// Outcome of classifying one image of waste
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum WasteClass {
    Biodegradable,
    NonBiodegradable,
}

impl WasteClass {
    /// Map a model output index to a class: `0` is biodegradable, `1` is not.
    #[must_use]
    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(Self::Biodegradable),
            1 => Some(Self::NonBiodegradable),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Biodegradable => "biodegradable",
            Self::NonBiodegradable => "non-biodegradable",
        }
    }

    /// The compartment that opens for this class.
    #[must_use]
    pub fn compartment(self) -> Compartment {
        match self {
            Self::Biodegradable => Compartment::BiodegradableBin,
            Self::NonBiodegradable => Compartment::NonBiodegradableBin,
        }
    }
}

impl fmt::Display for WasteClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing a label or compartment name fails
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("unknown waste type '{0}': expected biodegradable or non-biodegradable")]
    WasteClass(String),

    #[error("unknown compartment '{0}': expected BiodegradableBin or NonBiodegradableBin")]
    Compartment(String),
}

impl FromStr for WasteClass {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "biodegradable" => Ok(Self::Biodegradable),
            "non-biodegradable" => Ok(Self::NonBiodegradable),
            _ => Err(ParseError::WasteClass(s.to_string())),
        }
    }
}

/// Lid position as reported to the bin controller
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LidStatus {
    Open,
    #[default]
    Closed,
}

impl LidStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }
}

/// One of the two physical compartments, named as in the document tree
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Compartment {
    BiodegradableBin,
    NonBiodegradableBin,
}

impl Compartment {
    pub const ALL: [Compartment; 2] = [Self::BiodegradableBin, Self::NonBiodegradableBin];

    /// Child node name under the bin root.
    #[must_use]
    pub fn node(self) -> &'static str {
        match self {
            Self::BiodegradableBin => "BiodegradableBin",
            Self::NonBiodegradableBin => "NonBiodegradableBin",
        }
    }
}

impl fmt::Display for Compartment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.node())
    }
}

impl FromStr for Compartment {
    type Err = ParseError;

    /// Accepts the node name or the matching waste label, case-insensitive.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "biodegradablebin" | "biodegradable" => Ok(Self::BiodegradableBin),
            "nonbiodegradablebin" | "non-biodegradable" => Ok(Self::NonBiodegradableBin),
            _ => Err(ParseError::Compartment(s.to_string())),
        }
    }
}

/// Externally visible bin state decoded from the remote document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BinState {
    pub waste_type: Option<WasteClass>,
    pub lid_status: LidStatus,
    pub biodegradable_open: bool,
    pub non_biodegradable_open: bool,
    pub updated_at: Option<String>,
}

impl BinState {
    /// Decode the bin root document. Missing or malformed fields fall back
    /// to the closed defaults.
    #[must_use]
    pub fn from_document(doc: &Value) -> Self {
        let waste_type = doc
            .get(fields::WASTE_TYPE)
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok());
        let lid_status = match doc.get(fields::LID_STATUS).and_then(Value::as_str) {
            Some("open") => LidStatus::Open,
            _ => LidStatus::Closed,
        };
        let flag = |c: Compartment| {
            doc.get(c.node())
                .and_then(|node| node.get(fields::OPEN))
                .and_then(Value::as_bool)
                .unwrap_or(false)
        };

        Self {
            waste_type,
            lid_status,
            biodegradable_open: flag(Compartment::BiodegradableBin),
            non_biodegradable_open: flag(Compartment::NonBiodegradableBin),
            updated_at: doc
                .get(fields::TIMESTAMP)
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }

    /// Exactly one compartment open while the lid is open, none while closed.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        match self.lid_status {
            LidStatus::Open => self.biodegradable_open != self.non_biodegradable_open,
            LidStatus::Closed => !self.biodegradable_open && !self.non_biodegradable_open,
        }
    }
}

/// Fill levels reported by the sensor device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinLevels {
    pub biodegradable_level: f64,
    pub non_biodegradable_level: f64,
    pub timestamp: String,
}

impl BinLevels {
    /// Read levels out of the bin root document; missing values read as zero.
    #[must_use]
    pub fn from_document(doc: &Value) -> Self {
        let level = |c: Compartment| {
            doc.get(c.node())
                .and_then(|node| node.get(fields::LEVEL))
                .and_then(Value::as_f64)
                .unwrap_or(0.0)
        };

        Self {
            biodegradable_level: level(Compartment::BiodegradableBin),
            non_biodegradable_level: level(Compartment::NonBiodegradableBin),
            timestamp: doc
                .get(fields::TIMESTAMP)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }
    }
}

/// Static coordinates of the physical bin
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BinLocation {
    pub latitude: f64,
    pub longitude: f64,
}

/// Body returned by `POST /predict`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictResponse {
    pub waste_type: WasteClass,
    pub lid_status: LidStatus,
    #[serde(rename = "BiodegradableBin_Open")]
    pub biodegradable_open: bool,
    #[serde(rename = "NonBiodegradableBin_Open")]
    pub non_biodegradable_open: bool,
}

impl PredictResponse {
    #[must_use]
    pub fn opened(label: WasteClass) -> Self {
        Self {
            waste_type: label,
            lid_status: LidStatus::Open,
            biodegradable_open: label == WasteClass::Biodegradable,
            non_biodegradable_open: label == WasteClass::NonBiodegradable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn waste_class_wire_names() {
        assert_eq!(
            serde_json::to_string(&WasteClass::Biodegradable).unwrap(),
            "\"biodegradable\""
        );
        assert_eq!(
            serde_json::to_string(&WasteClass::NonBiodegradable).unwrap(),
            "\"non-biodegradable\""
        );
    }

    #[test]
    fn waste_class_from_index() {
        assert_eq!(WasteClass::from_index(0), Some(WasteClass::Biodegradable));
        assert_eq!(WasteClass::from_index(1), Some(WasteClass::NonBiodegradable));
        assert_eq!(WasteClass::from_index(2), None);
    }

    #[test]
    fn waste_class_parse_accepts_variants() {
        assert_eq!(
            "Biodegradable".parse::<WasteClass>().unwrap(),
            WasteClass::Biodegradable
        );
        assert_eq!(
            "non_biodegradable".parse::<WasteClass>().unwrap(),
            WasteClass::NonBiodegradable
        );
        assert!("plastic".parse::<WasteClass>().is_err());
    }

    #[test]
    fn compartment_parse_accepts_node_and_label() {
        assert_eq!(
            "NonBiodegradableBin".parse::<Compartment>().unwrap(),
            Compartment::NonBiodegradableBin
        );
        assert_eq!(
            "biodegradable".parse::<Compartment>().unwrap(),
            Compartment::BiodegradableBin
        );
        assert!("Bin".parse::<Compartment>().is_err());
    }

    #[test]
    fn bin_state_decodes_open_document() {
        let doc = json!({
            "waste_type": "biodegradable",
            "lid_status": "open",
            "BiodegradableBin": { "Open": true, "level": 40 },
            "NonBiodegradableBin": { "Open": false },
            "timestamp": "2026-01-01T00:00:00+00:00",
        });
        let state = BinState::from_document(&doc);
        assert_eq!(state.waste_type, Some(WasteClass::Biodegradable));
        assert_eq!(state.lid_status, LidStatus::Open);
        assert!(state.biodegradable_open);
        assert!(!state.non_biodegradable_open);
        assert!(state.is_consistent());
    }

    #[test]
    fn bin_state_empty_document_is_closed() {
        let state = BinState::from_document(&json!({}));
        assert_eq!(state, BinState::default());
        assert!(state.is_consistent());
    }

    #[test]
    fn bin_state_detects_both_flags_open() {
        let doc = json!({
            "lid_status": "open",
            "BiodegradableBin": { "Open": true },
            "NonBiodegradableBin": { "Open": true },
        });
        assert!(!BinState::from_document(&doc).is_consistent());
    }

    #[test]
    fn bin_state_detects_flag_open_while_closed() {
        let doc = json!({
            "lid_status": "closed",
            "NonBiodegradableBin": { "Open": true },
        });
        assert!(!BinState::from_document(&doc).is_consistent());
    }

    #[test]
    fn bin_levels_reads_nested_levels() {
        let doc = json!({
            "BiodegradableBin": { "level": 35 },
            "NonBiodegradableBin": { "level": 72.5 },
            "timestamp": "2026-03-01T10:00:00",
        });
        let levels = BinLevels::from_document(&doc);
        assert!((levels.biodegradable_level - 35.0).abs() < f64::EPSILON);
        assert!((levels.non_biodegradable_level - 72.5).abs() < f64::EPSILON);
        assert_eq!(levels.timestamp, "2026-03-01T10:00:00");
    }

    #[test]
    fn bin_levels_defaults_missing_fields_to_zero() {
        let levels = BinLevels::from_document(&json!({ "lid_status": "closed" }));
        assert!(levels.biodegradable_level.abs() < f64::EPSILON);
        assert!(levels.non_biodegradable_level.abs() < f64::EPSILON);
        assert_eq!(levels.timestamp, "");
    }

    #[test]
    fn predict_response_field_names() {
        let body = serde_json::to_value(PredictResponse::opened(WasteClass::NonBiodegradable))
            .unwrap();
        assert_eq!(
            body,
            json!({
                "waste_type": "non-biodegradable",
                "lid_status": "open",
                "BiodegradableBin_Open": false,
                "NonBiodegradableBin_Open": true,
            })
        );
    }
}
