/*!
 * Backend handlers
 */

use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use colored::Colorize;
use serde::Serialize;

use pmkforge::backend::{self, serve_delegate, Backend, CpuBackend};

use super::Context;

pub fn list(ctx: &Context) -> Result<()> {
    let dispatcher = ctx.dispatcher()?;
    let descriptors = dispatcher.descriptors();
    ctx.report(&descriptors, |descriptors| {
        for (i, core) in descriptors.iter().enumerate() {
            let status = if core.alive { "ready".green() } else { "disabled".red() };
            println!(
                "  #{} {:<8} {:<40} {:>10.0} PMKs/s  {}",
                i + 1,
                core.kind.to_string(),
                core.name,
                core.capability,
                status
            );
        }
    })
}

#[derive(Serialize)]
struct SelfTestResult {
    name: String,
    passed: bool,
    error: Option<String>,
}

pub fn selftest(ctx: &Context) -> Result<()> {
    let backends = backend::detect(&ctx.config).context("Failed to initialize backends")?;
    let results: Vec<SelfTestResult> = backends
        .iter()
        .map(|b| {
            let outcome = b.self_test();
            SelfTestResult {
                name: b.name().to_string(),
                passed: outcome.is_ok(),
                error: outcome.err().map(|e| e.to_string()),
            }
        })
        .collect();

    ctx.report(&results, |results| {
        for r in results {
            match &r.error {
                None => println!("{} {}", "✓".green(), r.name),
                Some(e) => println!("{} {}: {}", "✗".red(), r.name, e),
            }
        }
    })?;
    if results.iter().any(|r| !r.passed) {
        anyhow::bail!("Self-test failed; do not trust results from the failing backend(s)");
    }
    Ok(())
}

#[derive(Serialize)]
struct BenchmarkResult {
    name: String,
    pmks_per_second: Option<f64>,
    error: Option<String>,
}

pub fn benchmark(ctx: &Context, seconds: u64) -> Result<()> {
    let backends = backend::detect(&ctx.config).context("Failed to initialize backends")?;
    let duration = Duration::from_secs(seconds.max(1));
    let mut results = Vec::with_capacity(backends.len());

    for b in &backends {
        if ctx.stop.is_stopped() {
            break;
        }
        if !ctx.json {
            println!("⏱  Benchmarking {} for {}s...", b.name(), duration.as_secs());
        }
        let outcome = b.benchmark(duration);
        results.push(BenchmarkResult {
            name: b.name().to_string(),
            pmks_per_second: outcome.as_ref().ok().copied(),
            error: outcome.err().map(|e| e.to_string()),
        });
    }

    ctx.report(&results, |results| {
        let total: f64 = results.iter().filter_map(|r| r.pmks_per_second).sum();
        for r in results {
            match (r.pmks_per_second, &r.error) {
                (Some(rate), _) => println!("  {:<40} {:>10.0} PMKs/s", r.name, rate),
                (None, Some(e)) => println!("  {:<40} {}", r.name, e.red()),
                (None, None) => {}
            }
        }
        println!("\n📊 Combined: {:.0} PMKs/s", total);
    })
}

pub fn serve(ctx: &Context, listen: SocketAddr) -> Result<()> {
    let backend: Arc<dyn Backend> = Arc::new(CpuBackend::new(ctx.config.effective_cpu_threads())?);
    let listener = TcpListener::bind(listen).with_context(|| format!("Failed to listen on {}", listen))?;
    println!(
        "🌐 Serving {} on {} (Ctrl-C to stop)",
        backend.name().bold(),
        listener.local_addr()?
    );
    serve_delegate(listener, backend, &ctx.stop)?;
    Ok(())
}
