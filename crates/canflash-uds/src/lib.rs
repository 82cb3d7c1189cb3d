//! canflash-uds - UDS (ISO 14229) flashing over ISO-TP/CAN
//!
//! Layers, bottom-up:
//! - [`IsoTpTransport`]: ISO 15765-2 segmentation over a [`canflash_core::CanTransport`]
//! - [`DiagTransport`] / [`MappingGuard`]: message link with scoped CAN-ID mappings
//! - [`UdsClient`]: service requests, response-pending handling, NRC decoding
//! - [`UdsSession`]: the programming state machine, a [`canflash_core::FlashSession`]
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use canflash_core::{run_flash, FlashOptions, TracingSink, XorSecretResolver};
//! use canflash_uds::{IsoTpTransport, UdsConfig, UdsSession};
//!
//! let config = UdsConfig::default();
//! let link = IsoTpTransport::new(can, device, config.isotp);
//! let resolver = XorSecretResolver::from_hex("A5A5A5A5")?;
//! let mut session = UdsSession::new(Arc::new(link), config, Arc::new(resolver), Arc::new(TracingSink));
//! let report = run_flash(&mut session, &image, &FlashOptions::default(), &TracingSink).await?;
//! ```

pub mod config;
pub mod isotp;
pub mod link;
pub mod mock;
pub mod nrc;
pub mod services;
pub mod session;

pub use config::{IsoTpConfig, RoutineIds, UdsConfig};
pub use isotp::IsoTpTransport;
pub use link::{AddressRole, CanMapping, DiagTransport, MappingGuard};
pub use mock::{MappingEvent, MockDiagTransport};
pub use nrc::NegativeResponseCode;
pub use services::UdsClient;
pub use session::{next_block_counter, UdsSession, UdsState};
