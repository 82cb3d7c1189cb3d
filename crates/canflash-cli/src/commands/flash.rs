//! Flash command - program an S-record image over UDS or CCP

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use canflash_ccp::CcpSession;
use canflash_core::{spawn_flash, FlashOptions, FlashReport, FlashSession, LogSink};
use canflash_srec::SrecordImage;
use canflash_uds::{IsoTpTransport, UdsSession};
use clap::ValueEnum;
use tracing::debug;

use crate::config::Config;
use crate::device;
use crate::output::{OutputContext, OutputFormat, ProgressSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Protocol {
    Uds,
    Ccp,
}

/// Flash firmware to an ECU
pub async fn flash(
    config: &Config,
    file_path: &Path,
    protocol: Protocol,
    ctx: &OutputContext,
) -> Result<()> {
    ctx.info(&format!("Reading firmware from {}...", file_path.display()));
    let image = SrecordImage::from_file(file_path)
        .with_context(|| format!("Failed to load S-record file: {}", file_path.display()))?;
    ctx.info(&format!(
        "Firmware: {} bytes in {} segment(s), CRC-32 0x{:08X}",
        image.total_len(),
        image.segments().len(),
        image.crc32()
    ));

    let pb = ctx.flash_progress();
    let log: Arc<dyn LogSink> = Arc::new(ProgressSink::new(pb.clone()));
    let can = device::can_transport()?;
    let image = Arc::new(image);

    let report = match protocol {
        Protocol::Uds => {
            let resolver = device::resolver(config.uds.secret.as_deref(), "uds")?;
            let link = IsoTpTransport::new(can, config.device.clone(), config.uds.isotp);
            let session = UdsSession::new(Arc::new(link), config.uds.clone(), resolver, log.clone());
            let options = FlashOptions {
                connect_timeout: config.uds.connect_timeout(),
            };
            run(session, image, options, log).await
        }
        Protocol::Ccp => {
            let resolver = device::resolver(config.ccp.secret.as_deref(), "ccp")?;
            let session = CcpSession::new(
                can,
                config.device.clone(),
                config.ccp.clone(),
                resolver,
                log.clone(),
            );
            let options = FlashOptions {
                connect_timeout: config.ccp.connect_timeout(),
            };
            run(session, image, options, log).await
        }
    };

    let report = match report {
        Ok(report) => {
            pb.finish_with_message("Complete!");
            report
        }
        Err(e) => {
            pb.abandon_with_message("Flash failed!");
            return Err(e);
        }
    };

    match ctx.format {
        OutputFormat::Json => ctx.print_json(&serde_json::json!({
            "protocol": report.protocol,
            "bytes": report.bytes,
            "segments": report.segments,
            "program_ms": report.program_time.as_millis() as u64,
            "total_ms": report.total_time.as_millis() as u64,
        })),
        OutputFormat::Text => ctx.success(&format!(
            "\nFirmware update completed successfully ({} bytes, {:.1}s programming, {:.1}s total)",
            report.bytes,
            report.program_time.as_secs_f64(),
            report.total_time.as_secs_f64()
        )),
    }

    Ok(())
}

async fn run<S: FlashSession + 'static>(
    session: S,
    image: Arc<SrecordImage>,
    options: FlashOptions,
    log: Arc<dyn LogSink>,
) -> Result<FlashReport> {
    let protocol = session.protocol();
    debug!(protocol, "Spawning flash task");
    let (_session, result) = spawn_flash(session, image, options, log)
        .await
        .context("Flash task aborted")?;
    result.with_context(|| format!("{} flash failed", protocol))
}
