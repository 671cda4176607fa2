//! Multi-trace replay summary (JSON + Markdown).

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::replay::ReplayReport;
use crate::structured_log::now_utc;

/// One trace's outcome inside a summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceRun {
    /// Trace label, usually the file path.
    pub trace: String,
    pub weight: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<ReplayReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TraceRun {
    #[must_use]
    pub fn passed(trace: impl Into<String>, weight: usize, report: ReplayReport) -> Self {
        Self {
            trace: trace.into(),
            weight,
            report: Some(report),
            error: None,
        }
    }

    #[must_use]
    pub fn failed(trace: impl Into<String>, weight: usize, error: impl ToString) -> Self {
        Self {
            trace: trace.into(),
            weight,
            report: None,
            error: Some(error.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplaySummary {
    pub generated_utc: String,
    pub traces: usize,
    pub passed: usize,
    pub failed: usize,
    pub total_ops: usize,
    /// Weighted mean of per-trace utilization over passing traces.
    pub mean_utilization: f64,
    /// Total passing ops over total heap time.
    pub ops_per_sec: f64,
    pub runs: Vec<TraceRun>,
}

impl ReplaySummary {
    #[must_use]
    pub fn from_runs(runs: Vec<TraceRun>) -> Self {
        let passing: Vec<(&ReplayReport, usize)> = runs
            .iter()
            .filter_map(|run| run.report.as_ref().map(|r| (r, run.weight)))
            .collect();
        let total_ops = passing.iter().map(|(r, _)| r.ops).sum::<usize>();
        let total_ns = passing.iter().map(|(r, _)| r.heap_time_ns).sum::<u64>();
        let total_weight = passing.iter().map(|&(_, w)| w).sum::<usize>();
        let mean_utilization = if total_weight == 0 {
            0.0
        } else {
            passing
                .iter()
                .map(|&(r, w)| r.utilization * w as f64)
                .sum::<f64>()
                / total_weight as f64
        };

        Self {
            generated_utc: now_utc(),
            traces: runs.len(),
            passed: passing.len(),
            failed: runs.len() - passing.len(),
            total_ops,
            mean_utilization,
            ops_per_sec: if total_ns == 0 {
                0.0
            } else {
                total_ops as f64 * 1e9 / total_ns as f64
            },
            runs,
        }
    }

    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    #[must_use]
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        writeln!(out, "# tagheap replay summary").ok();
        writeln!(out).ok();
        writeln!(out, "- Generated: {}", self.generated_utc).ok();
        writeln!(
            out,
            "- Traces: {} ({} passed, {} failed)",
            self.traces, self.passed, self.failed
        )
        .ok();
        writeln!(
            out,
            "- Utilization: {:.1}%  Throughput: {:.0} ops/s",
            self.mean_utilization * 100.0,
            self.ops_per_sec
        )
        .ok();
        writeln!(out).ok();
        writeln!(
            out,
            "| Trace | Weight | Ops | Peak live | Arena | Util | Grows | Kops/s | Status |"
        )
        .ok();
        writeln!(
            out,
            "|-------|-------:|----:|----------:|------:|-----:|------:|-------:|--------|"
        )
        .ok();
        for run in &self.runs {
            match (&run.report, &run.error) {
                (Some(r), _) => {
                    writeln!(
                        out,
                        "| {} | {} | {} | {} | {} | {:.1}% | {} | {:.1} | pass |",
                        run.trace,
                        run.weight,
                        r.ops,
                        r.peak_live_bytes,
                        r.arena_bytes,
                        r.utilization * 100.0,
                        r.grow_calls,
                        r.ops_per_sec / 1000.0
                    )
                    .ok();
                }
                (None, error) => {
                    writeln!(
                        out,
                        "| {} | {} | - | - | - | - | - | - | FAIL: {} |",
                        run.trace,
                        run.weight,
                        error.as_deref().unwrap_or("unknown")
                    )
                    .ok();
                }
            }
        }
        out
    }
}
