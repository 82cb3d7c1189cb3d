//! Flash session contract and runner
//!
//! CCP and UDS sessions share one shape: open the device, connect, unlock,
//! erase/write/program the image, disconnect, close. [`run_flash`] drives that
//! sequence and guarantees the device is closed on every exit path.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use canflash_srec::SrecordImage;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::ProtocolResult;
use crate::log::LogSink;

#[async_trait]
pub trait FlashSession: Send {
    /// Protocol name for log lines ("CCP", "UDS")
    fn protocol(&self) -> &'static str;

    /// Open the CAN device
    fn open(&mut self) -> ProtocolResult<()>;

    /// Close the CAN device; must be safe to call in any state
    fn close(&mut self) -> ProtocolResult<()>;

    /// Establish the session, bounded by `timeout` overall
    async fn connect(&mut self, timeout: Duration) -> ProtocolResult<()>;

    /// Perform seed/key security access for programming
    async fn unlock(&mut self) -> ProtocolResult<()>;

    /// Erase, program and verify every segment; returns the elapsed time
    async fn erase_write_program(&mut self, image: &SrecordImage) -> ProtocolResult<Duration>;

    async fn disconnect(&mut self) -> ProtocolResult<()>;
}

/// Options for a flashing run
#[derive(Debug, Clone)]
pub struct FlashOptions {
    pub connect_timeout: Duration,
}

impl Default for FlashOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Outcome of a successful run
#[derive(Debug, Clone)]
pub struct FlashReport {
    pub protocol: &'static str,
    /// Time spent in erase/write/program
    pub program_time: Duration,
    /// Wall-clock time of the whole run
    pub total_time: Duration,
    pub bytes: usize,
    pub segments: usize,
}

/// Run one complete flashing sequence.
///
/// The device is closed before returning, whether the run succeeded or not.
/// A failure in any phase aborts the run and is returned unchanged.
pub async fn run_flash<S: FlashSession + ?Sized>(
    session: &mut S,
    image: &SrecordImage,
    options: &FlashOptions,
    log: &dyn LogSink,
) -> ProtocolResult<FlashReport> {
    let started = Instant::now();
    let protocol = session.protocol();

    info!(
        protocol,
        segments = image.segments().len(),
        bytes = image.total_len(),
        "Starting flash"
    );
    log.info(&format!(
        "{}: flashing {} bytes in {} segment(s)",
        protocol,
        image.total_len(),
        image.segments().len()
    ));

    if let Err(e) = session.open() {
        error!(protocol, error = %e, "Failed to open device");
        log.error(&format!("{}: {}", protocol, e));
        // open may have partially initialized the channel
        if let Err(close_err) = session.close() {
            warn!(protocol, error = %close_err, "Failed to close device after open error");
            log.warn(&format!("{}: close after failed open: {}", protocol, close_err));
        }
        return Err(e);
    }

    let result = flash_sequence(session, image, options, log).await;
    let closed = session.close();

    match (result, closed) {
        (Ok(program_time), Ok(())) => {
            let report = FlashReport {
                protocol,
                program_time,
                total_time: started.elapsed(),
                bytes: image.total_len(),
                segments: image.segments().len(),
            };
            info!(
                protocol,
                program_ms = report.program_time.as_millis() as u64,
                "Flash complete"
            );
            log.info(&format!(
                "{}: flash complete in {:.1}s",
                protocol,
                report.program_time.as_secs_f64()
            ));
            Ok(report)
        }
        (Ok(_), Err(e)) => {
            error!(protocol, error = %e, "Failed to close device");
            log.error(&format!("{}: {}", protocol, e));
            Err(e)
        }
        (Err(e), closed) => {
            if let Err(close_err) = closed {
                warn!(protocol, error = %close_err, "Failed to close device after error");
            }
            error!(protocol, error = %e, "Flash failed");
            log.error(&format!("{}: flash failed: {}", protocol, e));
            Err(e)
        }
    }
}

async fn flash_sequence<S: FlashSession + ?Sized>(
    session: &mut S,
    image: &SrecordImage,
    options: &FlashOptions,
    log: &dyn LogSink,
) -> ProtocolResult<Duration> {
    session.connect(options.connect_timeout).await?;
    log.info(&format!("{}: connected", session.protocol()));

    session.unlock().await?;
    log.info(&format!("{}: security access granted", session.protocol()));

    let elapsed = session.erase_write_program(image).await?;

    session.disconnect().await?;
    Ok(elapsed)
}

/// Run [`run_flash`] on a worker task.
///
/// The returned handle is the single completion signal for the run; the
/// session is handed back with the result.
pub fn spawn_flash<S>(
    mut session: S,
    image: Arc<SrecordImage>,
    options: FlashOptions,
    log: Arc<dyn LogSink>,
) -> JoinHandle<(S, ProtocolResult<FlashReport>)>
where
    S: FlashSession + 'static,
{
    tokio::spawn(async move {
        let result = run_flash(&mut session, &image, &options, log.as_ref()).await;
        (session, result)
    })
}
