//! Info command - S-record summary

use std::path::Path;

use anyhow::{Context, Result};
use canflash_srec::SrecordImage;
use serde_json::json;

use crate::output::{OutputContext, OutputFormat};

/// Print segments, CRC and (optionally) the EPK of an S-record file
pub fn info(file_path: &Path, epk_address: Option<u32>, ctx: &OutputContext) -> Result<()> {
    let image = SrecordImage::from_file(file_path)
        .with_context(|| format!("Failed to load S-record file: {}", file_path.display()))?;

    let epk = epk_address.map(|address| {
        image
            .get_epk(address)
            .map(|bytes| String::from_utf8_lossy(bytes).trim_end_matches('\0').to_string())
    });

    match ctx.format {
        OutputFormat::Json => {
            let segments: Vec<_> = image
                .segments()
                .iter()
                .map(|s| {
                    json!({
                        "start_address": s.start_address,
                        "length": s.length(),
                        "crc16": s.crc16_modbus(),
                    })
                })
                .collect();
            ctx.print_json(&json!({
                "file": file_path.display().to_string(),
                "header": image.describe_info(),
                "start_address": image.program_start_address(),
                "bytes": image.total_len(),
                "crc32": image.crc32(),
                "segments": segments,
                "epk": epk.flatten(),
            }));
        }
        OutputFormat::Text => {
            let mut pairs = vec![
                ("File", file_path.display().to_string()),
                ("Header", image.describe_info().to_string()),
                (
                    "Start address",
                    format!("0x{:08X}", image.program_start_address()),
                ),
                ("Bytes", image.total_len().to_string()),
                ("CRC-32", format!("0x{:08X}", image.crc32())),
            ];
            if let Some(epk) = &epk {
                pairs.push((
                    "EPK",
                    epk.clone().unwrap_or_else(|| "<not in image>".to_string()),
                ));
            }
            ctx.print_kv(&pairs);

            println!();
            println!("{:>3}  {:<23}  {:>8}  {:>6}", "#", "Range", "Length", "CRC-16");
            for (i, s) in image.segments().iter().enumerate() {
                println!(
                    "{:>3}  0x{:08X}..0x{:08X}  {:>8}  0x{:04X}",
                    i,
                    s.start_address,
                    s.end_address(),
                    s.length(),
                    s.crc16_modbus()
                );
            }
        }
    }

    Ok(())
}
