//! Plan command implementation.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use bleota::TransferPlan;
use console::style;

/// Render a plan as human-readable lines.
pub(crate) fn render(plan: &TransferPlan) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{} bytes, {} sectors, {} packets ({} bytes on the wire, packet size {})\n",
        plan.total,
        plan.sectors.len(),
        plan.packet_count(),
        plan.wire_bytes(),
        plan.packet_size
    ));
    for sector in &plan.sectors {
        let last = sector.packet_payloads.last().copied().unwrap_or(0);
        out.push_str(&format!(
            "  sector {:>5}  offset 0x{:08X}  {:>4} bytes  {:>3} packets (last {:>3})  crc 0x{:04X}\n",
            sector.index,
            sector.offset,
            sector.len,
            sector.packet_payloads.len(),
            last,
            sector.crc
        ));
    }
    out
}

/// Plan command implementation.
pub(crate) fn cmd_plan(file: &Path, packet_size: usize, json: bool) -> Result<()> {
    let image =
        fs::read(file).with_context(|| format!("failed to read image {}", file.display()))?;
    let plan = bleota::plan(&image, packet_size)?;

    if json {
        let output = serde_json::json!({
            "ok": true,
            "data": {
                "file": file.display().to_string(),
                "plan": plan,
            }
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        eprintln!("{} {}", style("ℹ").blue(), file.display());
        print!("{}", render(&plan));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_lists_every_sector() {
        let plan = bleota::plan(&[0u8; 5000], 510).unwrap();
        let text = render(&plan);
        assert!(text.starts_with("5000 bytes, 2 sectors, 11 packets"));
        assert_eq!(text.lines().count(), 3);
        assert!(text.contains("(last  40)"));
        assert!(text.contains("(last 397)"));
    }
}
