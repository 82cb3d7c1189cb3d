//! canflash-srec - Motorola S-record firmware images
//!
//! Parses an S-record text file into contiguous memory segments ready for
//! erase/program sequencing, and computes the checksums the flashing
//! protocols need.
//!
//! # Example
//!
//! ```rust
//! use canflash_srec::SrecordImage;
//!
//! let text = "S00F000068656C6C6F202020202000003C\n\
//!             S30900001000DEADBEEFAE\n\
//!             S70500001000EA\n";
//!
//! let image = SrecordImage::parse(text).unwrap();
//! assert_eq!(image.describe_info(), "hello");
//! assert_eq!(image.segments().len(), 1);
//! assert_eq!(image.segments()[0].start_address, 0x1000);
//! assert_eq!(image.program_start_address(), 0x1000);
//! ```
//!
//! # Record types
//!
//! | Type | Meaning | Handling |
//! |------|---------|----------|
//! | S0 | Header | `describe_info` |
//! | S3 | Data, 32-bit address | segmented into [`SrecordSegment`]s |
//! | S7 | Start address, 32-bit | `program_start_address` |
//! | other | - | rejected |

pub mod checksum;
pub mod error;
pub mod image;
pub mod record;

pub use checksum::{crc16_modbus, crc32_bzip2, record_checksum};
pub use error::{SrecError, SrecResult};
pub use image::{SrecordImage, SrecordSegment};
pub use record::{RawRecord, RecordType};
