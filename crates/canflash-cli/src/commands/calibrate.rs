//! Calibrate command - write one calibration value

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use canflash_ccp::{resource, CcpSession};
use canflash_conv::{History, ItemStore};
use canflash_core::{FlashSession, LogSink};

use crate::config::Config;
use crate::device;
use crate::output::{ConsoleSink, OutputContext, OutputFormat};

/// Write `value` to the calibration item `name` and read it back
pub async fn calibrate(
    config: &Config,
    items_path: &Path,
    name: &str,
    value: &str,
    ctx: &OutputContext,
) -> Result<()> {
    let store = ItemStore::from_file(items_path)
        .with_context(|| format!("Failed to load item descriptions: {}", items_path.display()))?;
    let item = store
        .calibration(name)
        .with_context(|| format!("Unknown calibration '{}'", name))?;

    let can = device::can_transport()?;
    let resolver = device::resolver(config.ccp.secret.as_deref(), "ccp")?;
    let log: Arc<dyn LogSink> = Arc::new(ConsoleSink::new(ctx.quiet));
    let mut session = CcpSession::new(
        can,
        config.device.clone(),
        config.ccp.clone(),
        resolver,
        log,
    );
    session.open().context("Failed to open CAN device")?;

    let result = async {
        session
            .connect(config.ccp.connect_timeout())
            .await
            .context("CCP connect failed")?;
        session
            .unlock_resource(resource::CAL)
            .await
            .context("Failed to unlock calibration")?;
        let before = session
            .read_calibration(item)
            .await
            .context("Failed to read current value")?;
        session
            .write_calibration(item, value)
            .await
            .with_context(|| format!("Failed to write {} = {}", name, value))?;
        let after = session
            .read_calibration(item)
            .await
            .context("Failed to read back value")?;
        session.disconnect().await.context("CCP disconnect failed")?;
        Ok::<_, anyhow::Error>((before, after))
    }
    .await;
    if let Err(e) = session.close() {
        ctx.warn(&format!("Failed to close CAN device: {}", e));
    }
    let (before, after) = result?;

    let history_path = config.history_path()?;
    match History::load(&history_path) {
        Ok(mut history) => {
            if !history.calibrations.iter().any(|c| c == name) {
                history.calibrations.push(name.to_string());
                if let Err(e) = history.save(&history_path) {
                    ctx.warn(&format!("Failed to save history: {}", e));
                }
            }
        }
        Err(e) => ctx.warn(&format!("Ignoring unreadable history: {}", e)),
    }

    let unit = item.descriptor.unit.as_deref().unwrap_or("");
    match ctx.format {
        OutputFormat::Json => ctx.print_json(&serde_json::json!({
            "item": name,
            "before": before,
            "after": after,
            "unit": item.descriptor.unit,
        })),
        OutputFormat::Text => {
            ctx.success(format!("{}: {} -> {} {}", name, before, after, unit).trim_end())
        }
    }
    Ok(())
}
