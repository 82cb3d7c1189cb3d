//! Measure command - DAQ acquisition with a periodic value display

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use canflash_ccp::{allocate_daq, resource, spawn_refresh, CcpSession, CurrentValues};
use canflash_conv::{History, ItemStore, MeasurementItem, Selection, StoreMeta};
use canflash_core::{FlashSession, LogSink};
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::config::Config;
use crate::device;
use crate::output::{ConsoleSink, OutputContext, OutputFormat};

/// Measure `names` (or the remembered selection) until Ctrl+C
pub async fn measure(
    config: &Config,
    items_path: &Path,
    names: &[String],
    daq: Option<u8>,
    ctx: &OutputContext,
) -> Result<()> {
    let store = ItemStore::from_file(items_path)
        .with_context(|| format!("Failed to load item descriptions: {}", items_path.display()))?;
    let history_path = config.history_path()?;
    let history = History::load(&history_path).unwrap_or_else(|e| {
        ctx.warn(&format!(
            "Ignoring unreadable history {}: {}",
            history_path.display(),
            e
        ));
        History::default()
    });

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

    let request = Request {
        store: &store,
        names,
        daq,
        history: &history,
        history_path: &history_path,
    };
    let result = run(&mut session, config, request, ctx).await;
    if let Err(e) = session.close() {
        ctx.warn(&format!("Failed to close CAN device: {}", e));
    }
    result
}

struct Request<'a> {
    store: &'a ItemStore,
    names: &'a [String],
    daq: Option<u8>,
    history: &'a History,
    history_path: &'a Path,
}

async fn run(
    session: &mut CcpSession,
    config: &Config,
    request: Request<'_>,
    ctx: &OutputContext,
) -> Result<()> {
    session
        .connect(config.ccp.connect_timeout())
        .await
        .context("CCP connect failed")?;
    session
        .unlock_resource(resource::DAQ)
        .await
        .context("Failed to unlock DAQ")?;

    let epk = read_epk(session, request.store.meta(), ctx).await?;
    let mut selection = select(
        request.store,
        request.names,
        request.daq,
        request.history,
        epk.as_deref(),
    )?;

    let lists = session
        .read_daq_lists()
        .await
        .context("Failed to read DAQ list sizes")?;
    let allocation = Arc::new(
        allocate_daq(selection.items_mut(), &lists).context("Failed to allocate DAQ lists")?,
    );
    remember(request.history, epk.as_deref(), &selection, request.history_path, ctx);

    let queue = session
        .start_measure(allocation)
        .await
        .context("Failed to start measurement")?;

    let values = Arc::new(CurrentValues::new());
    for index in 0..selection.len() {
        values.register(index);
    }
    let period = config.ccp.refresh_period();
    let refresh = spawn_refresh(queue, values.clone(), period);

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    ctx.info(&format!(
        "Measuring {} item(s) on {} DAQ list(s)",
        selection.len(),
        lists.len()
    ));
    ctx.info("Press Ctrl+C to stop");

    let started = Instant::now();
    while running.load(Ordering::SeqCst) {
        tokio::time::sleep(period).await;
        print_values(selection.items(), &values, started, ctx);
    }

    ctx.info("\nStopping measurement...");
    refresh.stop();
    let stats = session
        .stop_measure()
        .await
        .context("Failed to stop measurement")?;
    session.disconnect().await.context("CCP disconnect failed")?;
    info!(
        frames = stats.frames,
        samples = stats.samples,
        decode_errors = stats.decode_errors,
        "Measurement finished"
    );
    if stats.transport_error {
        ctx.warn("Measurement ended early on a CAN receive error");
    }
    ctx.success(&format!(
        "Measurement stopped: {} frames, {} samples, {} decode errors",
        stats.frames, stats.samples, stats.decode_errors
    ));
    Ok(())
}

/// Read the ECU's EPK when the description names one
async fn read_epk(
    session: &mut CcpSession,
    meta: &StoreMeta,
    ctx: &OutputContext,
) -> Result<Option<String>> {
    let (Some(address), Some(expected)) = (meta.epk_address, meta.epk.as_deref()) else {
        return Ok(None);
    };
    let device = session
        .read_epk(address, expected.len())
        .await
        .context("Failed to read EPK")?;
    if device != expected {
        ctx.warn(&format!(
            "EPK mismatch: ECU reports '{}', description expects '{}'",
            device, expected
        ));
    }
    Ok(Some(device))
}

/// Build the measurement selection from names or from history
fn select(
    store: &ItemStore,
    names: &[String],
    daq: Option<u8>,
    history: &History,
    epk: Option<&str>,
) -> Result<Selection<MeasurementItem>> {
    let mut selection = if names.is_empty() {
        let (measurements, _) = history
            .restore(epk, store)
            .context("No items given and no saved selection for this ECU software")?;
        debug!(items = measurements.len(), "Restored selection from history");
        measurements
    } else {
        let mut selection = Selection::new();
        for name in names {
            let item = store
                .measurement(name)
                .with_context(|| format!("Unknown measurement '{}'", name))?;
            selection.select(item);
        }
        selection
    };

    if let Some(daq) = daq {
        for item in selection.items_mut() {
            item.daq_number = daq;
        }
    }
    anyhow::ensure!(!selection.is_empty(), "Nothing to measure");
    Ok(selection)
}

fn remember(
    previous: &History,
    epk: Option<&str>,
    selection: &Selection<MeasurementItem>,
    path: &Path,
    ctx: &OutputContext,
) {
    let mut history = History::capture(epk, selection, &Selection::new());
    history.calibrations = previous.calibrations.clone();
    if let Err(e) = history.save(path) {
        ctx.warn(&format!("Failed to save history {}: {}", path.display(), e));
    }
}

fn print_values(
    items: &[MeasurementItem],
    values: &CurrentValues,
    started: Instant,
    ctx: &OutputContext,
) {
    match ctx.format {
        OutputFormat::Text => {
            let line: Vec<String> = items
                .iter()
                .enumerate()
                .map(|(index, item)| {
                    let value = values.get(index).unwrap_or_else(|| "---".to_string());
                    match &item.descriptor.unit {
                        Some(unit) => format!("{}={} {}", item.name(), value, unit),
                        None => format!("{}={}", item.name(), value),
                    }
                })
                .collect();
            println!(
                "[{}] {}",
                chrono::Local::now().format("%H:%M:%S%.3f"),
                line.join("  ")
            );
        }
        OutputFormat::Json => {
            let map: Map<String, Value> = items
                .iter()
                .enumerate()
                .map(|(index, item)| {
                    let value = values.get(index).map(Value::String).unwrap_or(Value::Null);
                    (item.name().to_string(), value)
                })
                .collect();
            println!(
                "{}",
                json!({
                    "timestamp": chrono::Utc::now().to_rfc3339(),
                    "elapsed_ms": started.elapsed().as_millis() as u64,
                    "values": map,
                })
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const YAML: &str = r#"
meta:
  epk_address: 65536
  epk: "EPK_V1"

measurements:
  - name: engine_speed
    data_type: UWORD
    address: 4096
    daq_number: 1
  - name: coolant_temp
    data_type: UBYTE
    address: 4098
"#;

    #[test]
    fn test_select_by_name() {
        let store = ItemStore::from_yaml(YAML).unwrap();
        let names = vec!["coolant_temp".to_string(), "engine_speed".to_string()];
        let selection = select(&store, &names, None, &History::default(), None).unwrap();
        assert_eq!(selection.names(), names);
        assert_eq!(selection.items()[1].daq_number, 1);

        let selection = select(&store, &names, Some(0), &History::default(), None).unwrap();
        assert!(selection.items().iter().all(|i| i.daq_number == 0));

        let err = select(&store, &["rpm".to_string()], None, &History::default(), None).unwrap_err();
        assert!(err.to_string().contains("Unknown measurement 'rpm'"));
    }

    #[test]
    fn test_select_from_history_needs_matching_epk() {
        let store = ItemStore::from_yaml(YAML).unwrap();
        let names = vec!["engine_speed".to_string()];
        let picked = select(&store, &names, Some(2), &History::default(), None).unwrap();
        let history = History::capture(Some("EPK_V1"), &picked, &Selection::new());

        let restored = select(&store, &[], None, &history, Some("EPK_V1")).unwrap();
        assert_eq!(restored.names(), names);
        assert_eq!(restored.items()[0].daq_number, 2);

        assert!(select(&store, &[], None, &history, Some("EPK_V2")).is_err());
    }

    #[test]
    fn test_remember_keeps_calibrations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        let store = ItemStore::from_yaml(YAML).unwrap();
        let selection =
            select(&store, &["engine_speed".to_string()], None, &History::default(), None).unwrap();
        let previous = History {
            calibrations: vec!["idle_target".to_string()],
            ..History::default()
        };
        let ctx = OutputContext::new(OutputFormat::Text, true, true);

        remember(&previous, Some("EPK_V1"), &selection, &path, &ctx);

        let saved = History::load(&path).unwrap();
        assert_eq!(saved.epk.as_deref(), Some("EPK_V1"));
        assert_eq!(saved.measurements.len(), 1);
        assert_eq!(saved.calibrations, vec!["idle_target".to_string()]);
    }
}
