use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use tagflow_contracts::{MANIFEST_SCHEMA_VERSION, TRACE_REPORT_SCHEMA_VERSION};
use tagflow_core::config::{EngineConfig, InstrumentOptions};
use tagflow_core::diagnostics::render_diagnostics_md;
use tagflow_core::emit::{emit_program, parse_program_json, SourceInfo};
use tagflow_core::engine::Engine;
use tagflow_core::instrument::instrument_program;
use tagflow_core::policy::{InertPolicy, TracePolicy};
use tagflow_core::runtime::engine_with_runtime;

#[derive(Parser, Debug)]
#[command(name = "tagflow")]
#[command(about = "Dynamic value tagging: instrument and run JSON program trees.", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Instrument a program tree.
    Instrument {
        #[arg(long)]
        r#in: PathBuf,
        /// Source identifier recorded in position records (default: the input path).
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        out: PathBuf,
        /// Keep early returns instead of rewriting each function to one exit.
        #[arg(long, default_value_t = false)]
        no_unify_returns: bool,
        /// If set, fail if output differs; do not write.
        #[arg(long, default_value_t = false)]
        check: bool,
    },
    /// Run a program tree in the host engine.
    Run {
        #[arg(long)]
        r#in: PathBuf,
        /// Instrument before running, with a runtime that supplies no tags.
        #[arg(long, default_value_t = false)]
        instrument: bool,
        /// Instrument and run under the tracing policy; prints a JSON report.
        #[arg(long, default_value_t = false)]
        trace: bool,
        #[arg(long)]
        url: Option<String>,
        #[arg(long, default_value_t = EngineConfig::default().max_call_depth)]
        max_call_depth: usize,
    },
    /// Instrument multiple programs from a manifest.
    Batch {
        #[arg(long)]
        manifest: PathBuf,
        /// If set, fail if any output differs; do not write.
        #[arg(long, default_value_t = false)]
        check: bool,
    },
    /// Print the diagnostics catalog as markdown.
    Diagnostics,
}

fn main() -> Result<()> {
    env_logger::Builder::from_default_env().init();
    try_main().map_err(|err| {
        eprintln!("{err:#}");
        err
    })
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Instrument {
            r#in,
            url,
            out,
            no_unify_returns,
            check,
        } => {
            let options = instrument_options(&r#in, url, !no_unify_returns);
            run_instrument(&r#in, &options, &out, check)
        }
        Command::Run {
            r#in,
            instrument,
            trace,
            url,
            max_call_depth,
        } => {
            let options = instrument_options(&r#in, url, true);
            let config = EngineConfig { max_call_depth };
            run_program(&r#in, &options, config, instrument, trace)
        }
        Command::Batch { manifest, check } => run_batch(&manifest, check),
        Command::Diagnostics => {
            print!("{}", render_diagnostics_md());
            Ok(())
        }
    }
}

fn instrument_options(src_path: &Path, url: Option<String>, unify_returns: bool) -> InstrumentOptions {
    InstrumentOptions {
        url: url.unwrap_or_else(|| src_path.display().to_string()),
        unify_returns,
    }
}

fn run_instrument(
    src_path: &Path,
    options: &InstrumentOptions,
    out_path: &Path,
    check: bool,
) -> Result<()> {
    let bytes = std::fs::read(src_path)
        .with_context(|| format!("read program tree: {}", src_path.display()))?;
    let program = parse_program_json(&bytes)
        .with_context(|| format!("parse program tree: {}", src_path.display()))?;
    let instrumented = instrument_program(&program, options)
        .with_context(|| format!("instrument: {}", src_path.display()))?;
    let source = SourceInfo {
        url: Some(&options.url),
        bytes: Some(&bytes),
    };
    let out_src = emit_program(&instrumented, &source)?;
    write_output(out_path, &out_src, check)
}

fn run_program(
    src_path: &Path,
    options: &InstrumentOptions,
    config: EngineConfig,
    instrument: bool,
    trace: bool,
) -> Result<()> {
    let bytes = std::fs::read(src_path)
        .with_context(|| format!("read program tree: {}", src_path.display()))?;
    let mut program = parse_program_json(&bytes)
        .with_context(|| format!("parse program tree: {}", src_path.display()))?;
    if instrument || trace {
        program = instrument_program(&program, options)
            .with_context(|| format!("instrument: {}", src_path.display()))?;
    }

    if trace {
        let (mut engine, runtime) = engine_with_runtime(TracePolicy::new(), config)?;
        let res = engine.run_program(&program);
        let completion = match &res {
            Ok(()) => "normal".to_string(),
            Err(abrupt) => engine.describe_abrupt(abrupt),
        };
        let events: Vec<String> = runtime.policy().lines().map(str::to_string).collect();
        let report = serde_json::json!({
            "schema_version": TRACE_REPORT_SCHEMA_VERSION,
            "url": options.url,
            "completion": completion,
            "output": engine.output,
            "events": events,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let mut engine = if instrument {
        engine_with_runtime(InertPolicy, config)?.0
    } else {
        Engine::new(config)
    };
    let res = engine.run_program(&program);
    for line in &engine.output {
        println!("{line}");
    }
    res.map_err(|abrupt| engine.abrupt_to_error(abrupt))
}

#[derive(Debug, serde::Deserialize)]
struct Manifest {
    schema_version: String,
    entries: Vec<ManifestEntry>,
}

#[derive(Debug, serde::Deserialize)]
struct ManifestEntry {
    source: String,
    out: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default = "default_true")]
    unify_returns: bool,
}

fn default_true() -> bool {
    true
}

fn run_batch(manifest_path: &Path, check: bool) -> Result<()> {
    let bytes = std::fs::read(manifest_path)
        .with_context(|| format!("read manifest: {}", manifest_path.display()))?;
    let m: Manifest = serde_json::from_slice(&bytes)
        .with_context(|| format!("parse manifest JSON: {}", manifest_path.display()))?;
    if m.schema_version.trim() != MANIFEST_SCHEMA_VERSION {
        anyhow::bail!(
            "manifest schema_version mismatch: expected {MANIFEST_SCHEMA_VERSION} got {:?}",
            m.schema_version
        );
    }

    // Relative paths are resolved against the manifest's directory.
    let base = manifest_path.parent().unwrap_or_else(|| Path::new("."));
    for (idx, e) in m.entries.iter().enumerate() {
        let src_path = base.join(&e.source);
        let out_path = base.join(&e.out);
        let options = InstrumentOptions {
            url: e.url.clone().unwrap_or_else(|| e.source.clone()),
            unify_returns: e.unify_returns,
        };
        run_instrument(&src_path, &options, &out_path, check)
            .with_context(|| format!("manifest entry[{idx}] {}", e.source))?;
    }
    info!("batch: {} entries processed", m.entries.len());
    Ok(())
}

fn write_output(out_path: &Path, src: &str, check: bool) -> Result<()> {
    if check {
        let cur = std::fs::read_to_string(out_path)
            .with_context(|| format!("read existing output: {}", out_path.display()))?;
        if cur != src {
            anyhow::bail!("generated output differs: {}", out_path.display());
        }
        return Ok(());
    }

    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create output dir: {}", parent.display()))?;
    }
    std::fs::write(out_path, src.as_bytes())
        .with_context(|| format!("write output: {}", out_path.display()))?;
    info!("wrote {}", out_path.display());
    Ok(())
}
