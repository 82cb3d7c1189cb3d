//! canflash-conv - Physical value conversion for ECU variables
//!
//! Converts raw ECU memory bytes to engineering values and back, using the
//! conversion methods of an A2L-style description.
//!
//! # Features
//!
//! - **A2L data types** - UBYTE through FLOAT32_IEEE, big-endian
//! - **Linear RAT_FUNC** - `raw = B·x + C`; true rational functions are rejected
//! - **TAB_VERB** - verbal table lookup in both directions
//! - **Precision-aware display** - no `13.000000001` values
//! - **YAML descriptions**, selections and a persisted history
//!
//! # Quick Start
//!
//! ```rust
//! use canflash_conv::{decode, encode, DataType, ItemDescriptor};
//!
//! // Coolant temperature: raw = 1·x + 40
//! let item = ItemDescriptor::linear("coolant", DataType::Ubyte, 0x4000, 1.0, 40.0)
//!     .with_unit("°C");
//!
//! assert_eq!(decode(&item, &[132]).unwrap(), "92");
//! assert_eq!(encode(&item, "92", -40.0, 215.0).unwrap(), vec![132]);
//! assert!(encode(&item, "216", -40.0, 215.0).is_err());
//! ```
//!
//! # YAML Descriptions
//!
//! ```yaml
//! meta:
//!   name: Engine ECU
//!   epk_address: 65536
//!
//! measurements:
//!   - name: engine_speed
//!     data_type: UWORD
//!     address: 4096
//!     daq_number: 1        # sampling channel
//!     conversion:
//!       rat_func: { b: 4.0, c: 0.0 }
//!     format: "%6.1"
//!
//! calibrations:
//!   - name: idle_mode
//!     data_type: UBYTE
//!     address: 8192
//!     conversion:
//!       tab_verb:
//!         - { raw: 0, label: "OFF" }
//!         - { raw: 1, label: "ON" }
//! ```

pub mod decode;
pub mod encode;
pub mod error;
pub mod history;
pub mod item;
pub mod precision;
pub mod selection;
pub mod store;
pub mod types;

pub use decode::{decode, decode_physical, read_raw_value};
pub use encode::{encode, encode_within_limits, write_raw_value, LIMIT_TOLERANCE};
pub use error::{ConvError, ConvResult, HistoryError, HistoryResult};
pub use history::{History, SavedMeasurement};
pub use item::{CalibrationItem, DaqSchedule, ItemDescriptor, MeasurementItem, NamedItem};
pub use precision::{format_physical, precision_from_scale, round_to_precision};
pub use selection::Selection;
pub use store::{DescriptionFile, ItemStore, StoreMeta};
pub use types::{Coefficients, Conversion, DataType, DisplayFormat, TableEntry};
