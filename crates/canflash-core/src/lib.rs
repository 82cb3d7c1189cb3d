//! canflash-core - Shared building blocks for CAN flashing sessions
//!
//! This crate provides:
//! - The [`CanTransport`] contract sessions use to talk to a CAN driver
//! - A scripted [`MockCanTransport`] and, on Linux, a SocketCAN transport
//! - [`ProtocolError`], shared by the CCP and UDS sessions
//! - The [`FlashSession`] trait with [`run_flash`] / [`spawn_flash`]
//! - Seed/key resolvers and the injected [`LogSink`]

pub mod config;
pub mod error;
pub mod log;
pub mod mock;
pub mod seedkey;
pub mod session;
pub mod transport;

#[cfg(all(target_os = "linux", feature = "socketcan"))]
pub mod socketcan;

pub use config::DeviceConfig;
pub use error::{ProtocolError, ProtocolResult, SeedKeyError, TransportError};
pub use log::{LogLevel, LogSink, MemorySink, TracingSink};
pub use mock::MockCanTransport;
pub use seedkey::{FnResolver, SeedKeyResolver, XorSecretResolver};
pub use session::{run_flash, spawn_flash, FlashOptions, FlashReport, FlashSession};
pub use transport::{recv_from, CanFrame, CanTransport, DeviceGuard, MAX_FRAME_LEN};
