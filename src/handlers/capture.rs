/*!
 * Capture handlers
 *
 * Analysis and stripping of capture files, and handshake loading for the
 * attack commands.
 */

use std::path::Path;

use anyhow::{Context as _, Result};
use colored::Colorize;

use pmkforge::capture::{self, HandshakeState};
use pmkforge::{Handshake, MacAddr};

use super::{parse_essid, Context};
use crate::cli::Target;

/// Load handshake from either a capture or a .json file
pub fn load_handshake(target: &Target) -> Result<Handshake> {
    let path = &target.handshake;
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");

    if extension.eq_ignore_ascii_case("json") {
        return Handshake::load_from_file(path).context("Failed to load handshake file");
    }

    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let mut parsed = capture::parse(&bytes).context("Failed to parse capture file")?;
    if let Some(essid) = &target.essid {
        parsed.assume_essid(&parse_essid(essid)?);
    }
    let bssid = target
        .bssid
        .as_deref()
        .map(|s| s.parse::<MacAddr>())
        .transpose()
        .context("Invalid BSSID")?;
    Ok(parsed.best_handshake(bssid)?)
}

pub fn display_handshake(hs: &Handshake) {
    println!("📝 ESSID:    {}", hs.essid.to_string().bold());
    println!("   AP:       {}", hs.ap_mac);
    println!("   Station:  {}", hs.station_mac);
    println!("   Pairing:  {:?} (key version {})", hs.pairing, hs.key_version);
}

pub fn analyze(ctx: &Context, file: &Path) -> Result<()> {
    let bytes = std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let analysis = capture::analyze(&bytes).context("Failed to parse capture file")?;

    ctx.report(&analysis, |analysis| {
        let stats = &analysis.stats;
        println!(
            "📦 {} packet(s), {} EAPOL-Key frame(s), {} anomalies\n",
            stats.packets,
            stats.eapol_frames,
            stats.anomalies()
        );
        for (ap, essid) in &analysis.access_points {
            let name = essid.as_ref().map(|e| e.to_string()).unwrap_or_else(|| "<unknown>".into());
            println!("📡 {} ('{}')", ap, name.bold());
            for station in analysis.stations.iter().filter(|s| s.ap == *ap) {
                let state = match station.state {
                    HandshakeState::Complete => match station.pairing {
                        Some(pairing) => format!("complete, {:?}", pairing).green(),
                        None => "complete".green(),
                    },
                    HandshakeState::HalfHandshake => "half handshake".yellow(),
                    HandshakeState::NoData => "no data".normal(),
                };
                println!("   #{}: {}", station.station, state);
            }
        }
        println!("\n{} handshake(s) usable", analysis.completed());
    })
}

pub fn strip(ctx: &Context, file: &Path, output: &Path) -> Result<()> {
    let bytes = std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let stripped = capture::strip_capture(&bytes).context("Failed to parse capture file")?;
    std::fs::write(output, &stripped).with_context(|| format!("Failed to write {}", output.display()))?;
    if !ctx.json {
        println!(
            "{} Wrote {} bytes ({} before) to {}",
            "✓".green(),
            stripped.len(),
            bytes.len(),
            output.display()
        );
    }
    Ok(())
}
