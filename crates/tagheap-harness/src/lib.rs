//! Trace harness for tagheap.
//!
//! This crate provides:
//! - Trace files: parse, write and fingerprint allocation traces
//! - Synthesis: deterministic workload generators
//! - Replay: drive a heap through a trace, verifying every block it hands out
//! - Reporting: JSON/Markdown summaries and JSONL structured logs

#![forbid(unsafe_code)]

pub mod replay;
pub mod report;
pub mod structured_log;
pub mod synth;
pub mod trace;

pub use replay::{ReplayError, ReplayOptions, ReplayReport, replay, replay_with_sink};
pub use report::{ReplaySummary, TraceRun};
pub use structured_log::{LogEmitter, LogEntry, LogLevel, Outcome};
pub use synth::{Profile, synthesize};
pub use trace::{Trace, TraceError, TraceOp};
