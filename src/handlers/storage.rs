/*!
 * Storage handlers
 *
 * ESSID lifecycle, password import/export and the export adapters.
 */

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{bail, Context as _, Result};
use colored::Colorize;

use pmkforge::export;

use super::{parse_essid, Context};

pub fn create_essid(ctx: &Context, essid: &str) -> Result<()> {
    let essid = parse_essid(essid)?;
    ctx.storage()?.create_essid(&essid)?;
    println!("{} Created ESSID '{}'", "✓".green(), essid);
    Ok(())
}

pub fn delete_essid(ctx: &Context, essid: &str, confirm: bool) -> Result<()> {
    let essid = parse_essid(essid)?;
    if !confirm {
        bail!("Deleting '{}' removes all of its PMKs; pass --yes to confirm", essid);
    }
    let removed = ctx.storage()?.delete_essid(&essid, confirm)?;
    println!(
        "{} Deleted ESSID '{}' ({} result shard(s) removed)",
        "✓".green(),
        essid,
        removed
    );
    Ok(())
}

pub fn list_essids(ctx: &Context) -> Result<()> {
    let stats = ctx.storage()?.stats()?;
    ctx.report(&stats, |stats| {
        println!("📋 {} password(s) in {} shard(s)\n", stats.passwords, stats.password_shards);
        if stats.essids.is_empty() {
            println!("No ESSIDs stored");
        }
        for info in &stats.essids {
            println!(
                "  {:<32} {:>10} PMKs in {} shard(s)",
                info.essid.to_string().bold(),
                info.pmks,
                info.result_shards
            );
        }
    })
}

pub fn import_passwords(ctx: &Context, file: &Path) -> Result<()> {
    let storage = ctx.storage()?;
    let stats = storage
        .import_file(file)
        .with_context(|| format!("Failed to import {}", file.display()))?;
    ctx.report(&stats, |stats| {
        println!(
            "{} Imported {} new password(s) ({} duplicate, {} rejected)",
            "✓".green(),
            stats.accepted,
            stats.duplicate,
            stats.rejected
        );
    })
}

pub fn export_passwords(ctx: &Context, file: &Path) -> Result<()> {
    let storage = ctx.storage()?;
    let out = File::create(file).with_context(|| format!("Failed to create {}", file.display()))?;
    let mut out = BufWriter::new(out);
    let count = storage.export_passwords(&mut out)?;
    out.flush()?;
    println!("{} Exported {} password(s) to {}", "✓".green(), count, file.display());
    Ok(())
}

pub fn export_cowpatty(ctx: &Context, essid: &str, file: &Path) -> Result<()> {
    let essid = parse_essid(essid)?;
    let storage = ctx.storage()?;
    let out = File::create(file).with_context(|| format!("Failed to create {}", file.display()))?;
    let count = export::export_cowpatty(&storage, &essid, BufWriter::new(out))?;
    println!(
        "{} Wrote {} record(s) for '{}' to {}",
        "✓".green(),
        count,
        essid,
        file.display()
    );
    Ok(())
}

pub fn export_hashdb(ctx: &Context, essid: Option<&str>, file: &Path) -> Result<()> {
    let essid = essid.map(parse_essid).transpose()?;
    let storage = ctx.storage()?;
    let stats = export::export_hashdb(&storage, file, essid.as_ref())
        .with_context(|| format!("Failed to export to {}", file.display()))?;
    ctx.report(&stats, |stats| {
        println!(
            "{} Exported {} PMK(s) for {} ESSID(s) ({} new password(s))",
            "✓".green(),
            stats.pmks,
            stats.essids,
            stats.passwords
        );
    })
}
