//! Command implementations for canflash

pub mod calibrate;
pub mod flash;
pub mod info;
pub mod measure;

pub use calibrate::calibrate;
pub use flash::{flash, Protocol};
pub use info::info;
pub use measure::measure;
