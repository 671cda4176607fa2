use tagheap_core::{CheckLevel, HeapConfig, HeapLogLevel, PlacementPolicy};
use tagheap_harness::structured_log::{LogEmitter, LogEntry, LogLevel};
use tagheap_harness::{
    Profile, ReplayError, ReplayOptions, ReplaySummary, Trace, TraceOp, TraceRun, replay,
    replay_with_sink, synthesize,
};

fn checked(config: HeapConfig) -> ReplayOptions {
    ReplayOptions {
        config: config.with_check(CheckLevel::Paranoid),
        check_each_op: true,
    }
}

#[test]
fn synthetic_traces_replay_under_paranoid_checking() {
    for (seed, profile) in Profile::ALL.into_iter().enumerate() {
        let trace = synthesize(profile, seed as u64 + 100, 400, 2500);
        let report = replay(&trace, &checked(HeapConfig::default().with_log_level(HeapLogLevel::Error)))
            .unwrap_or_else(|e| panic!("{}: {e}", profile.name()));
        assert_eq!(report.ops, trace.ops.len());
        assert_eq!(report.trace_sha256, trace.sha256());
        assert!(report.peak_live_bytes <= trace.suggested_heap_size);
        assert!(report.arena_bytes >= report.peak_live_bytes);
        assert_eq!(report.free_blocks_at_end, 1);
    }
}

#[test]
fn text_round_trip_replays_identically() {
    let trace = synthesize(Profile::ReallocGrowth, 9, 300, 1500);
    let reparsed = Trace::parse(&trace.to_text()).expect("parse");
    let a = replay(&trace, &ReplayOptions::default()).expect("replay");
    let b = replay(&reparsed, &ReplayOptions::default()).expect("replay");
    assert_eq!(a.arena_bytes, b.arena_bytes);
    assert_eq!(a.peak_live_bytes, b.peak_live_bytes);
    assert_eq!(a.reallocs_in_place, b.reallocs_in_place);
    assert_eq!(a.reallocs_moved, b.reallocs_moved);
}

#[test]
fn binary_profile_wastes_released_holes() {
    let trace = synthesize(Profile::Binary, 1, 600, 448);
    let report = replay(&trace, &ReplayOptions::default()).expect("replay");
    // Released large blocks are fenced in by live small ones and are too small for
    // the follow-up requests.
    assert!(report.utilization < 0.9, "{report:?}");
    assert!(report.arena_bytes > report.peak_live_bytes);
}

#[test]
fn realloc_heavy_trace_resizes_in_place() {
    let trace = synthesize(Profile::ReallocGrowth, 4, 800, 4000);
    let report = replay(&trace, &ReplayOptions::default()).expect("replay");
    assert!(report.reallocs > 0);
    assert!(report.reallocs_in_place + report.reallocs_absorbed_prev > 0);
}

#[test]
fn placement_policy_is_reported() {
    let trace = synthesize(Profile::Churn, 2, 100, 256);
    for (placement, label) in [
        (PlacementPolicy::AlwaysFront, "front"),
        (PlacementPolicy::AlwaysBack, "back"),
        (PlacementPolicy::SizeThreshold { threshold: 64 }, "threshold:64"),
    ] {
        let options = ReplayOptions {
            config: HeapConfig::default().with_placement(placement),
            check_each_op: false,
        };
        assert_eq!(replay(&trace, &options).expect("replay").placement, label);
    }
}

#[test]
fn errors_carry_the_op_index() {
    let trace = Trace {
        suggested_heap_size: 0,
        num_ids: 2,
        weight: 1,
        ops: vec![
            TraceOp::Alloc { id: 0, size: 64 },
            TraceOp::Free { id: 0 },
            TraceOp::Alloc { id: 1, size: 32 },
            TraceOp::Alloc { id: 1, size: 32 },
        ],
    };
    let err = replay(&trace, &ReplayOptions::default()).unwrap_err();
    assert!(matches!(err, ReplayError::IdInUse { index: 3, id: 1 }));
    assert_eq!(err.to_string(), "op 3: id 1 is already live");
}

#[test]
fn heap_records_flow_into_the_jsonl_log() {
    let trace = synthesize(Profile::Sawtooth, 5, 200, 6000);
    let options = ReplayOptions {
        config: HeapConfig::default().with_log_level(HeapLogLevel::Info),
        check_each_op: false,
    };
    let mut emitter = LogEmitter::to_buffer("replay-test");
    emitter.emit(LogLevel::Info, "replay_start").expect("emit");
    replay_with_sink(&trace, &options, |record| {
        emitter
            .emit_entry(LogEntry::from_heap_record(&record))
            .expect("emit");
    })
    .expect("replay");

    let text = String::from_utf8(emitter.into_inner()).expect("utf8");
    let lines: Vec<serde_json::Value> = text
        .lines()
        .map(|line| serde_json::from_str(line).expect("json"))
        .collect();
    assert_eq!(lines[0]["trace_id"], "harness::replay-test::001");
    let init = lines
        .iter()
        .find(|l| l["event"] == "init")
        .expect("init record");
    assert!(init["trace_id"].as_str().unwrap().starts_with("core::heap::init::"));
    assert!(lines.iter().all(|l| l["run_id"] == "replay-test"));
    // Growth past the first chunk is logged at info against the requesting call.
    assert!(lines.iter().any(|l| l["event"] == "arena_grow"
        && l["symbol"] == "allocate"
        && l["level"] == "info"));
    // Hot-path events stay below the configured level.
    assert!(lines.iter().all(|l| l["event"] != "alloc"));
}

#[test]
fn summary_collects_passes_and_failures() {
    let good = synthesize(Profile::Churn, 8, 200, 512);
    let bad = Trace {
        suggested_heap_size: 0,
        num_ids: 1,
        weight: 2,
        ops: vec![TraceOp::Alloc { id: 0, size: 1 << 20 }],
    };
    let bounded = ReplayOptions {
        config: HeapConfig::default().with_max_arena_bytes(64 * 1024),
        check_each_op: true,
    };
    let runs = [("good.rep", &good), ("bad.rep", &bad)]
        .into_iter()
        .map(|(name, trace)| match replay(trace, &bounded) {
            Ok(report) => TraceRun::passed(name, trace.weight, report),
            Err(err) => TraceRun::failed(name, trace.weight, err),
        })
        .collect();
    let summary = ReplaySummary::from_runs(runs);
    assert_eq!((summary.passed, summary.failed), (1, 1));
    assert_eq!(summary.total_ops, good.ops.len());
    assert!(
        summary.runs[1]
            .error
            .as_deref()
            .unwrap()
            .contains("request of 1048576 bytes for id 0 failed")
    );
}
