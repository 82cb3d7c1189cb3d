//! canflash-ccp - CCP 2.1 flashing, calibration and DAQ measurement
//!
//! - [`CcpSession`]: connect, seed/key unlock, erase/program/verify/launch as
//!   a [`canflash_core::FlashSession`], plus upload/download and calibration
//! - [`allocate_daq`]: packs measurement items into ODTs of the device's DAQ lists
//! - [`CcpSession::start_measure`] arms the lists and spawns the receive loop,
//!   which feeds a latest-value [`TelemetryQueue`]
//! - [`spawn_refresh`] copies that queue into [`CurrentValues`] on a fixed tick
//!
//! # Example
//!
//! ```ignore
//! let mut session = CcpSession::new(can, device, CcpConfig::default(), resolver, log);
//! session.open()?;
//! session.connect(Duration::from_secs(5)).await?;
//! session.unlock_resource(resource::DAQ).await?;
//!
//! let lists = session.read_daq_lists().await?;
//! let allocation = Arc::new(allocate_daq(&mut items, &lists)?);
//! let queue = session.start_measure(allocation).await?;
//! let refresh = spawn_refresh(queue, values.clone(), Duration::from_millis(100));
//! ```

pub mod command;
pub mod config;
pub mod daq;
pub mod error;
pub mod measure;
pub mod session;
pub mod telemetry;

pub use command::{resource, session_status, Crm};
pub use config::{CcpConfig, DaqListConfig};
pub use daq::{allocate_daq, DaqAllocation, DaqList, DaqListInfo, Odt, OdtEntry, ODT_CAPACITY};
pub use error::{SchedulingError, SchedulingResult};
pub use measure::{spawn_receive_loop, MeasurementHandle, ReceiveStats};
pub use session::{CcpSession, CcpState, ErrorCounters, Seed, SlaveId, CCP_VERSION};
pub use telemetry::{spawn_refresh, CurrentValues, RefreshTask, Sample, TelemetryQueue};
