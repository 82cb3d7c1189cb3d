//! Persisted selection history
//!
//! Remembers which items were selected together with the EPK of the ECU they
//! were selected for. On the next start the selection is restored only if the
//! EPK still matches.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::HistoryResult;
use crate::item::{CalibrationItem, MeasurementItem};
use crate::selection::Selection;
use crate::store::ItemStore;

/// A saved measurement selection entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedMeasurement {
    pub name: String,
    pub daq_number: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    /// EPK seen when the history was written
    #[serde(default)]
    pub epk: Option<String>,
    #[serde(default)]
    pub measurements: Vec<SavedMeasurement>,
    #[serde(default)]
    pub calibrations: Vec<String>,
}

impl History {
    /// Snapshot the current selections
    pub fn capture(
        epk: Option<&str>,
        measurements: &Selection<MeasurementItem>,
        calibrations: &Selection<CalibrationItem>,
    ) -> Self {
        Self {
            epk: epk.map(str::to_string),
            measurements: measurements
                .items()
                .iter()
                .map(|m| SavedMeasurement {
                    name: m.name().to_string(),
                    daq_number: m.daq_number,
                })
                .collect(),
            calibrations: calibrations.names(),
        }
    }

    /// Load history; a missing file yields an empty history
    pub fn load(path: impl AsRef<Path>) -> HistoryResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(path = %path.display(), "No history file");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> HistoryResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Rebuild selections from the store if `current_epk` matches.
    ///
    /// Items no longer present in the store are skipped.
    pub fn restore(
        &self,
        current_epk: Option<&str>,
        store: &ItemStore,
    ) -> Option<(Selection<MeasurementItem>, Selection<CalibrationItem>)> {
        if self.epk.is_none() || self.epk.as_deref() != current_epk {
            debug!(
                saved = ?self.epk,
                current = ?current_epk,
                "EPK changed, history not restored"
            );
            return None;
        }

        let mut measurements = Selection::new();
        for saved in &self.measurements {
            match store.measurement(&saved.name) {
                Ok(item) => {
                    let mut item = item.clone();
                    item.daq_number = saved.daq_number;
                    measurements.select(&item);
                }
                Err(_) => warn!(item = %saved.name, "Saved measurement no longer described"),
            }
        }

        let mut calibrations = Selection::new();
        for name in &self.calibrations {
            match store.calibration(name) {
                Ok(item) => {
                    calibrations.select(item);
                }
                Err(_) => warn!(item = %name, "Saved calibration no longer described"),
            }
        }

        Some((measurements, calibrations))
    }
}
