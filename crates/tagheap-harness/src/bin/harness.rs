//! CLI entrypoint for the tagheap trace harness.

use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{Parser, Subcommand};

use tagheap_core::config::DEFAULT_SPLIT_THRESHOLD;
use tagheap_core::{CheckLevel, HeapConfig, HeapLogLevel, PlacementPolicy};
use tagheap_harness::structured_log::{LogEmitter, LogEntry, LogLevel, Outcome};
use tagheap_harness::{
    Profile, ReplayOptions, ReplaySummary, Trace, TraceRun, replay_with_sink, synthesize,
};

/// Trace tooling for tagheap.
#[derive(Debug, Parser)]
#[command(name = "tagheap-harness")]
#[command(about = "Replay and synthesize allocation traces against tagheap")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Replay one or more trace files and report utilization and throughput.
    Replay {
        /// Trace file(s) to replay.
        #[arg(long = "trace", required = true, num_args = 1..)]
        traces: Vec<PathBuf>,
        /// Run the full heap scan after every op and validate pointers.
        #[arg(long)]
        check: bool,
        /// Split threshold for the size-threshold placement policy.
        #[arg(long)]
        split_threshold: Option<usize>,
        /// Placement policy: `threshold`, `front` or `back`.
        #[arg(long)]
        placement: Option<String>,
        /// Minimum arena extension in bytes.
        #[arg(long)]
        chunk_size: Option<usize>,
        /// Arena ceiling in bytes.
        #[arg(long)]
        max_arena: Option<usize>,
        /// Output summary path (JSON). Prints Markdown to stdout when omitted.
        #[arg(long)]
        output: Option<PathBuf>,
        /// Structured JSONL log path.
        #[arg(long)]
        log: Option<PathBuf>,
        /// Minimum heap lifecycle level forwarded to the log.
        #[arg(long, default_value = "info")]
        log_level: String,
    },
    /// Generate a deterministic synthetic trace.
    Synthesize {
        /// Workload profile: `churn`, `sawtooth`, `realloc-growth` or `binary`.
        #[arg(long)]
        profile: String,
        /// Root seed (decimal or 0x...).
        #[arg(long, default_value = "0x5EED")]
        seed: String,
        /// Approximate number of ops before the closing releases.
        #[arg(long, default_value_t = 10_000)]
        ops: usize,
        /// Largest request size in bytes.
        #[arg(long, default_value_t = 4096)]
        max_size: usize,
        /// Output trace path.
        #[arg(long)]
        output: PathBuf,
    },
}

fn parse_u64(text: &str) -> Result<u64, String> {
    let clean = text.trim().replace('_', "");
    let parsed = match clean.strip_prefix("0x").or_else(|| clean.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => clean.parse(),
    };
    parsed.map_err(|_| format!("invalid seed `{text}`"))
}

fn build_config(
    check: bool,
    split_threshold: Option<usize>,
    placement: Option<&str>,
    chunk_size: Option<usize>,
    max_arena: Option<usize>,
    log_level: &str,
) -> Result<HeapConfig, String> {
    let mut config = HeapConfig::from_env();
    if let Some(chunk) = chunk_size {
        config = config.with_chunk_size(chunk);
    }
    if let Some(max) = max_arena {
        config = config.with_max_arena_bytes(max);
    }
    let threshold = match (split_threshold, config.placement) {
        (Some(t), _) => t,
        (None, PlacementPolicy::SizeThreshold { threshold }) => threshold,
        (None, _) => DEFAULT_SPLIT_THRESHOLD,
    };
    config.placement = match placement {
        Some(name) => PlacementPolicy::from_name(name, threshold)
            .ok_or_else(|| format!("unknown placement `{name}`"))?,
        None => match config.placement {
            PlacementPolicy::SizeThreshold { .. } => PlacementPolicy::SizeThreshold { threshold },
            other => other,
        },
    };
    if check && config.check == CheckLevel::Off {
        config = config.with_check(CheckLevel::Validate);
    }
    let level =
        HeapLogLevel::from_name(log_level).ok_or_else(|| format!("unknown log level `{log_level}`"))?;
    Ok(config.with_log_level(level))
}

fn run_id() -> String {
    let secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    format!("replay-{secs}-{}", std::process::id())
}

fn replay_one(
    path: &Path,
    options: &ReplayOptions,
    emitter: &mut Option<LogEmitter<std::io::BufWriter<std::fs::File>>>,
) -> std::io::Result<TraceRun> {
    let label = path.display().to_string();
    let trace = match Trace::from_file(path) {
        Ok(trace) => trace,
        Err(err) => {
            if let Some(emitter) = emitter.as_mut() {
                emitter.emit_entry(
                    LogEntry::new("", LogLevel::Error, "trace_rejected")
                        .with_outcome(Outcome::Error)
                        .with_details(serde_json::json!({ "trace": label, "error": err.to_string() })),
                )?;
            }
            return Ok(TraceRun::failed(label, 0, err));
        }
    };

    if let Some(emitter) = emitter.as_mut() {
        emitter.emit_entry(
            LogEntry::new("", LogLevel::Info, "replay_start").with_details(serde_json::json!({
                "trace": label,
                "ops": trace.ops.len(),
                "sha256": trace.sha256(),
            })),
        )?;
    }

    let started = Instant::now();
    let mut log_error = None;
    let result = replay_with_sink(&trace, options, |record| {
        if let Some(emitter) = emitter.as_mut() {
            if let Err(err) = emitter.emit_entry(LogEntry::from_heap_record(&record)) {
                log_error.get_or_insert(err);
            }
        }
    });
    if let Some(err) = log_error {
        return Err(err);
    }
    let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    let (run, level, event, outcome) = match result {
        Ok(report) => (
            TraceRun::passed(&label, trace.weight, report),
            LogLevel::Info,
            "replay_done",
            Outcome::Pass,
        ),
        Err(err) => (
            TraceRun::failed(&label, trace.weight, err),
            LogLevel::Error,
            "replay_failed",
            Outcome::Fail,
        ),
    };
    if let Some(emitter) = emitter.as_mut() {
        emitter.emit_entry(
            LogEntry::new("", level, event)
                .with_outcome(outcome)
                .with_duration_ms(duration_ms)
                .with_details(serde_json::json!({ "trace": label, "error": run.error })),
        )?;
    }
    Ok(run)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::Replay {
            traces,
            check,
            split_threshold,
            placement,
            chunk_size,
            max_arena,
            output,
            log,
            log_level,
        } => {
            let config = build_config(
                check,
                split_threshold,
                placement.as_deref(),
                chunk_size,
                max_arena,
                &log_level,
            )?;
            let options = ReplayOptions {
                config,
                check_each_op: check,
            };
            let mut emitter = match &log {
                Some(path) => Some(LogEmitter::to_file(path, &run_id())?),
                None => None,
            };

            let mut runs = Vec::with_capacity(traces.len());
            for path in &traces {
                eprintln!("Replaying {}", path.display());
                let run = replay_one(path, &options, &mut emitter)?;
                if let Some(error) = &run.error {
                    eprintln!("  FAIL: {error}");
                }
                runs.push(run);
            }
            if let Some(emitter) = emitter.as_mut() {
                emitter.flush()?;
            }

            let summary = ReplaySummary::from_runs(runs);
            match output {
                Some(path) => {
                    std::fs::write(&path, summary.to_json()?)?;
                    eprintln!("Wrote summary to {}", path.display());
                }
                None => print!("{}", summary.to_markdown()),
            }
            if !summary.all_passed() {
                return Err(format!("{} of {} traces failed", summary.failed, summary.traces).into());
            }
        }
        Command::Synthesize {
            profile,
            seed,
            ops,
            max_size,
            output,
        } => {
            let profile =
                Profile::from_name(&profile).ok_or_else(|| format!("unknown profile `{profile}`"))?;
            let seed = parse_u64(&seed)?;
            let trace = synthesize(profile, seed, ops, max_size);
            trace.write_to(&output)?;
            eprintln!(
                "Wrote {} ops ({} ids) to {}",
                trace.ops.len(),
                trace.num_ids,
                output.display()
            );
        }
    }

    Ok(())
}
