//! Item Store - the container for measurement and calibration descriptors
//!
//! Loaded read-only from a YAML description exported from the A2L file.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ConvError, ConvResult};
use crate::item::{CalibrationItem, MeasurementItem};

/// Metadata about the description
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Address of the EPK string in ECU memory and in the firmware image
    #[serde(skip_serializing_if = "Option::is_none")]
    pub epk_address: Option<u32>,

    /// EPK the description was generated for
    #[serde(skip_serializing_if = "Option::is_none")]
    pub epk: Option<String>,
}

/// File format for YAML descriptions
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct DescriptionFile {
    #[serde(default)]
    pub meta: StoreMeta,
    #[serde(default)]
    pub measurements: Vec<MeasurementItem>,
    #[serde(default)]
    pub calibrations: Vec<CalibrationItem>,
}

/// Store of items keyed by name
#[derive(Debug, Default, Clone)]
pub struct ItemStore {
    meta: StoreMeta,
    measurements: BTreeMap<String, MeasurementItem>,
    calibrations: BTreeMap<String, CalibrationItem>,
}

impl ItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load descriptions from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> ConvResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Load descriptions from a YAML string
    pub fn from_yaml(yaml: &str) -> ConvResult<Self> {
        let file: DescriptionFile = serde_yaml::from_str(yaml)?;
        let mut store = Self {
            meta: file.meta,
            ..Self::default()
        };
        for item in file.measurements {
            store.add_measurement(item);
        }
        for item in file.calibrations {
            store.add_calibration(item);
        }
        Ok(store)
    }

    pub fn meta(&self) -> &StoreMeta {
        &self.meta
    }

    /// Register a measurement, replacing any item with the same name
    pub fn add_measurement(&mut self, item: MeasurementItem) {
        self.measurements.insert(item.name().to_string(), item);
    }

    /// Register a calibration, replacing any item with the same name
    pub fn add_calibration(&mut self, item: CalibrationItem) {
        self.calibrations.insert(item.name().to_string(), item);
    }

    pub fn measurement(&self, name: &str) -> ConvResult<&MeasurementItem> {
        self.measurements
            .get(name)
            .ok_or_else(|| ConvError::UnknownItem(name.to_string()))
    }

    pub fn calibration(&self, name: &str) -> ConvResult<&CalibrationItem> {
        self.calibrations
            .get(name)
            .ok_or_else(|| ConvError::UnknownItem(name.to_string()))
    }

    /// All measurements in name order
    pub fn measurements(&self) -> impl Iterator<Item = &MeasurementItem> {
        self.measurements.values()
    }

    /// All calibrations in name order
    pub fn calibrations(&self) -> impl Iterator<Item = &CalibrationItem> {
        self.calibrations.values()
    }

    pub fn len(&self) -> usize {
        self.measurements.len() + self.calibrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
