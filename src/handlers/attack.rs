/*!
 * Attack handlers
 *
 * Passthrough, database and batch attacks against a handshake, plus the
 * maintenance passes over stored results.
 */

use anyhow::{bail, Result};
use colored::Colorize;

use pmkforge::attack::{eval_results, AttackEngine, AttackOptions, AttackOutcome, VerifyScope};

use super::capture::{display_handshake, load_handshake};
use super::{open_source, parse_essid, with_progress, Context};
use crate::cli::{OptionalSource, Source, Target};

fn print_outcome(ctx: &Context, outcome: &AttackOutcome) {
    if ctx.json {
        let value = serde_json::json!({
            "password": outcome.password.as_ref().map(|p| p.to_string()),
            "tested": outcome.tested,
            "seconds": outcome.elapsed.as_secs_f64(),
            "interrupted": outcome.interrupted,
        });
        println!("{}", value);
        return;
    }

    println!("\n📊 Performance Statistics:");
    println!("   Total tested: {}", outcome.tested);
    println!("   Time elapsed: {:.2}s", outcome.elapsed.as_secs_f64());
    println!("   Average rate: {:.0} PMKs/second\n", outcome.rate());

    match &outcome.password {
        Some(password) => println!("{} The password is '{}'", "✓".green().bold(), password.to_string().bold()),
        None if outcome.interrupted => println!("{} Interrupted before the password was found", "⚠".yellow()),
        None => println!("{} Password not found", "✗".red()),
    }
}

pub fn passthrough(ctx: &Context, target: &Target, source: &Source) -> Result<()> {
    let handshake = load_handshake(target)?;
    let Some((passwords, total)) = open_source(source.wordlist.as_deref(), source.numeric.as_deref())? else {
        bail!("A password source is required");
    };
    if !ctx.json {
        display_handshake(&handshake);
        println!("🚀 Starting passthrough attack\n");
    }

    let dispatcher = ctx.dispatcher()?;
    let engine = AttackEngine::new(&dispatcher, AttackOptions::from(&ctx.config));
    let outcome = with_progress(ctx, total, &|| engine.tested(), || {
        engine.passthrough(&handshake, passwords, &ctx.stop)
    })?;
    print_outcome(ctx, &outcome);
    Ok(())
}

pub fn database(ctx: &Context, target: &Target) -> Result<()> {
    let handshake = load_handshake(target)?;
    let storage = ctx.storage()?;
    if !storage.essid_exists(&handshake.essid) {
        bail!("ESSID '{}' is not in storage", handshake.essid);
    }
    if !ctx.json {
        display_handshake(&handshake);
        println!("🚀 Testing stored PMKs\n");
    }

    let dispatcher = ctx.dispatcher()?;
    let engine = AttackEngine::new(&dispatcher, AttackOptions::from(&ctx.config));
    let total = storage
        .list_essids()?
        .into_iter()
        .find(|info| info.essid == handshake.essid)
        .map(|info| info.pmks);
    let outcome = with_progress(ctx, total, &|| engine.tested(), || {
        engine.database(&storage, &handshake, &ctx.stop)
    })?;
    print_outcome(ctx, &outcome);
    Ok(())
}

pub fn batch_attack(ctx: &Context, target: &Target, source: &OptionalSource) -> Result<()> {
    let handshake = load_handshake(target)?;
    let storage = ctx.storage()?;
    let passwords = open_source(source.wordlist.as_deref(), source.numeric.as_deref())?.map(|(s, _)| s);
    if !ctx.json {
        display_handshake(&handshake);
        println!("🚀 Starting batch attack\n");
    }

    let dispatcher = ctx.dispatcher()?;
    let engine = AttackEngine::new(&dispatcher, AttackOptions::from(&ctx.config));
    let outcome = with_progress(ctx, None, &|| engine.tested(), || {
        engine.batch(&storage, &handshake, passwords, &ctx.stop)
    })?;
    print_outcome(ctx, &outcome);
    Ok(())
}

pub fn batch(ctx: &Context, essid: Option<&str>, source: &OptionalSource) -> Result<()> {
    let essid = essid.map(parse_essid).transpose()?;
    let storage = ctx.storage()?;
    let passwords = open_source(source.wordlist.as_deref(), source.numeric.as_deref())?.map(|(s, _)| s);

    let dispatcher = ctx.dispatcher()?;
    let engine = AttackEngine::new(&dispatcher, AttackOptions::from(&ctx.config));
    let report = with_progress(ctx, None, &|| engine.computed(), || {
        engine.batch_process(&storage, essid.as_ref(), passwords, &ctx.stop)
    })?;

    ctx.report(&report, |report| {
        for done in &report.essids {
            println!(
                "  {:<32} {} shard(s) computed, {} already current, {} PMK(s)",
                done.essid.to_string().bold(),
                done.computed,
                done.current,
                done.pmks
            );
        }
        if report.interrupted {
            println!("{} Interrupted; finished shards are stored", "⚠".yellow());
        } else {
            println!("{} Batch complete", "✓".green());
        }
    })
}

pub fn verify(ctx: &Context, essid: &str, all: bool) -> Result<()> {
    let essid = parse_essid(essid)?;
    let storage = ctx.storage()?;
    let scope = if all {
        VerifyScope::All
    } else {
        VerifyScope::Sample(ctx.config.verify_sample_ratio)
    };

    let dispatcher = ctx.dispatcher()?;
    let engine = AttackEngine::new(&dispatcher, AttackOptions::from(&ctx.config));
    let report = with_progress(ctx, None, &|| engine.computed(), || {
        engine.verify(&storage, &essid, scope, &ctx.stop)
    })?;

    ctx.report(&report, |report| {
        println!("🔎 Checked {} PMK(s) in {} shard(s)", report.checked, report.shards);
        for mismatch in &report.mismatches {
            println!("   {} shard {}: '{}'", "✗".red(), mismatch.shard, mismatch.password);
        }
        if report.mismatches.is_empty() {
            println!("{} All checked PMKs are correct", "✓".green());
        } else {
            println!(
                "{} {} stored PMK(s) are wrong; delete the ESSID and recompute",
                "✗".red().bold(),
                report.mismatches.len()
            );
        }
    })?;
    if !report.mismatches.is_empty() {
        bail!("Verification found {} mismatch(es)", report.mismatches.len());
    }
    Ok(())
}

pub fn eval(ctx: &Context, essid: Option<&str>) -> Result<()> {
    let essid = essid.map(parse_essid).transpose()?;
    let storage = ctx.storage()?;
    let coverage = eval_results(&storage, essid.as_ref())?;

    ctx.report(&coverage, |coverage| {
        let passwords = coverage.first().map_or(0, |c| c.passwords);
        println!("📋 {} password(s) stored\n", passwords);
        for c in coverage {
            let pct = format!("{:5.1}%", c.ratio() * 100.0);
            let pct = if c.is_complete() { pct.green() } else { pct.yellow() };
            println!(
                "  {:<32} {} {} PMK(s), {} current, {} stale, {} missing shard(s)",
                c.essid.to_string().bold(),
                pct,
                c.pmks,
                c.current_shards,
                c.stale_shards,
                c.missing_shards
            );
        }
    })
}
