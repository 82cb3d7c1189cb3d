//! Measurement and calibration item descriptors

use serde::{Deserialize, Serialize};

use crate::types::{Coefficients, Conversion, DataType, DisplayFormat, TableEntry};

/// Description of one ECU variable, as supplied by the A2L-style description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemDescriptor {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub data_type: DataType,

    #[serde(default)]
    pub conversion: Conversion,

    /// ECU memory address of the element
    pub address: u32,

    #[serde(default)]
    pub address_extension: u8,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<DisplayFormat>,

    #[serde(default = "default_lower_limit")]
    pub lower_limit: f64,

    #[serde(default = "default_upper_limit")]
    pub upper_limit: f64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

fn default_lower_limit() -> f64 {
    f64::MIN
}

fn default_upper_limit() -> f64 {
    f64::MAX
}

impl ItemDescriptor {
    /// Create an item with an identity conversion
    pub fn new(name: impl Into<String>, data_type: DataType, address: u32) -> Self {
        Self {
            name: name.into(),
            description: None,
            data_type,
            conversion: Conversion::default(),
            address,
            address_extension: 0,
            format: None,
            lower_limit: default_lower_limit(),
            upper_limit: default_upper_limit(),
            unit: None,
        }
    }

    /// Create an item with linear conversion `raw = b·x + c`
    pub fn linear(
        name: impl Into<String>,
        data_type: DataType,
        address: u32,
        b: f64,
        c: f64,
    ) -> Self {
        Self::new(name, data_type, address).with_conversion(Conversion::RatFunc(
            Coefficients::linear(b, c),
        ))
    }

    /// Create an item with a verbal table conversion
    pub fn table(
        name: impl Into<String>,
        data_type: DataType,
        address: u32,
        entries: impl IntoIterator<Item = (i64, &'static str)>,
    ) -> Self {
        let entries = entries
            .into_iter()
            .map(|(raw, label)| TableEntry {
                raw,
                label: label.to_string(),
            })
            .collect();
        Self::new(name, data_type, address).with_conversion(Conversion::TabVerb(entries))
    }

    pub fn with_conversion(mut self, conversion: Conversion) -> Self {
        self.conversion = conversion;
        self
    }

    pub fn with_format(mut self, format: DisplayFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn with_limits(mut self, lower: f64, upper: f64) -> Self {
        self.lower_limit = lower;
        self.upper_limit = upper;
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Byte width of the element in ECU memory
    pub fn element_size(&self) -> usize {
        self.data_type.byte_size()
    }
}

/// Position of a measurement item in the device's DAQ layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaqSchedule {
    pub daq_number: u8,
    pub odt_number: u8,
    pub element_number: u8,
    /// PID of the ODT the element travels in
    pub pid: u8,
}

/// A variable sampled through DAQ lists
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementItem {
    #[serde(flatten)]
    pub descriptor: ItemDescriptor,

    /// Sampling-rate channel (DAQ list) the item is measured on
    #[serde(default)]
    pub daq_number: u8,

    /// Assigned when the DAQ layout is allocated
    #[serde(skip)]
    pub schedule: Option<DaqSchedule>,
}

impl MeasurementItem {
    pub fn new(descriptor: ItemDescriptor, daq_number: u8) -> Self {
        Self {
            descriptor,
            daq_number,
            schedule: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }
}

/// A variable read and written through upload/download
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationItem {
    #[serde(flatten)]
    pub descriptor: ItemDescriptor,
}

impl CalibrationItem {
    pub fn new(descriptor: ItemDescriptor) -> Self {
        Self { descriptor }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }
}

/// Items that can be looked up by name in a selection
pub trait NamedItem {
    fn item_name(&self) -> &str;
}

impl NamedItem for MeasurementItem {
    fn item_name(&self) -> &str {
        self.name()
    }
}

impl NamedItem for CalibrationItem {
    fn item_name(&self) -> &str {
        self.name()
    }
}
