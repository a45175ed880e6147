mod allowlist;
mod archive;
mod calls;
mod cfg;
mod classfile;
mod engine;
mod error;
mod hierarchy;
mod ir;
mod model;
mod opcodes;
mod pool;
mod reachability;
mod report;
mod rewrite;
mod scan;
#[cfg(test)]
mod testing;
mod trust;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use crate::allowlist::Allowlist;
use crate::archive::build_jar;
use crate::engine::optimize;
use crate::ir::internal_name;
use crate::reachability::EntryPoints;
use crate::report::{build_invocation, build_sarif, failure_result, stripped_results, write_report};
use crate::rewrite::RewriteOptions;
use crate::scan::scan_module;
use crate::trust::TrustPolicy;

/// CLI arguments for classtrim execution.
#[derive(Parser, Debug)]
#[command(
    name = "classtrim",
    about = "Strip methods unreachable from declared entry points out of a JVM class archive.",
    version
)]
struct Cli {
    /// Module to optimize: a .jar, a directory of .class files or one .class file.
    #[arg(long, value_name = "PATH")]
    input: PathBuf,
    /// JSON catalogue of platform classes and the methods they expose.
    #[arg(long, value_name = "PATH")]
    allowlist: PathBuf,
    /// JSON map of class name to method identifiers that must be kept.
    #[arg(long, value_name = "PATH")]
    entry_points: PathBuf,
    /// Entry class; overrides the jar manifest's Main-Class.
    #[arg(long, value_name = "CLASS")]
    main_class: Option<String>,
    /// Package prefix whose classes may be referenced without being analyzed.
    #[arg(long, value_name = "PREFIX")]
    trusted_prefix: Vec<String>,
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,
    /// SARIF report path, `-` for stdout.
    #[arg(long, value_name = "PATH")]
    report: Option<PathBuf>,
    #[arg(long)]
    keep_debug_info: bool,
    #[arg(long, conflicts_with = "verbose")]
    quiet: bool,
    #[arg(long)]
    verbose: bool,
    #[arg(long)]
    timing: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);
    run(cli)
}

fn init_logging(verbose: bool, quiet: bool) {
    use tracing_subscriber::{EnvFilter, fmt};

    let default_level = if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    if !cli.input.exists() {
        anyhow::bail!("input not found: {}", cli.input.display());
    }

    let started_at = Instant::now();
    let allowlist = Allowlist::load(&cli.allowlist)?;
    let entry_points = load_entry_points(&cli.entry_points)?;
    let scan = scan_module(&cli.input, cli.main_class.as_deref())?;
    info!(
        classes = scan.module.classes.len(),
        platform_classes = allowlist.len(),
        entry_class = %scan.module.entry_class,
        "loaded module"
    );

    let trust = TrustPolicy::new(cli.trusted_prefix.iter().cloned());
    let options = RewriteOptions {
        strip_debug_info: !cli.keep_debug_info,
    };
    let optimized = match optimize(&scan.module, &entry_points, &allowlist, &trust, &options) {
        Ok(optimized) => optimized,
        Err(error) => {
            if let Some(path) = &cli.report {
                let sarif = build_sarif(vec![failure_result(&error)], build_invocation(false));
                write_report(path, &sarif)?;
            }
            return Err(error).with_context(|| format!("failed to optimize {}", cli.input.display()));
        }
    };
    for unresolved in &optimized.unresolved_parents {
        warn!(
            class = %unresolved.class,
            parent = %unresolved.parent,
            "supertype was never resolved"
        );
    }

    let output = cli
        .output
        .clone()
        .unwrap_or_else(|| default_output(&cli.input));
    let jar = build_jar(&optimized.module)?;
    fs::write(&output, jar).with_context(|| format!("failed to write {}", output.display()))?;
    info!(output = %output.display(), "wrote optimized jar");

    if let Some(path) = &cli.report {
        let sarif = build_sarif(
            stripped_results(&optimized.module.stripped),
            build_invocation(true),
        );
        write_report(path, &sarif)?;
    }

    if cli.timing && !cli.quiet {
        eprintln!(
            "timing: total_ms={} classes={} skipped_entries={} reachable={} stripped={}",
            started_at.elapsed().as_millis(),
            scan.module.classes.len(),
            scan.skipped_entries,
            optimized.summary.reachable_methods(),
            optimized.module.stripped.len()
        );
    }

    Ok(())
}

fn load_entry_points(path: &Path) -> Result<EntryPoints> {
    let text =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let raw: BTreeMap<String, Vec<String>> = serde_json::from_str(&text)
        .with_context(|| format!("invalid entry points {}", path.display()))?;

    let mut entry_points = EntryPoints::new();
    for (class, methods) in raw {
        if let Some(method) = methods.iter().find(|method| !method.contains('(')) {
            anyhow::bail!("entry point {class}#{method} lacks a descriptor");
        }
        entry_points
            .entry(internal_name(&class))
            .or_default()
            .extend(methods);
    }
    Ok(entry_points)
}

/// `minimized_<name>.jar` next to the input.
fn default_output(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| "module".to_string());
    let parent = input.parent().unwrap_or_else(|| Path::new("."));
    parent.join(format!("minimized_{stem}.jar"))
}
