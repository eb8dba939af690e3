//! Benchmark suite for specloop hot paths.
//!
//! This module provides performance benchmarks for:
//! - Stream parsing (one assistant turn, line by line)
//! - Activity folding (parser output into stats and the activity log)
//! - Task selection and progress comparison on large specs
//!
//! # Running Benchmarks
//!
//! ```bash
//! # Run all benchmarks
//! cargo bench
//!
//! # Save baseline for comparison
//! cargo bench -- --save-baseline main
//!
//! # Compare against baseline
//! cargo bench -- --baseline main
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;
use specloop::activity::ActivityTracker;
use specloop::progress::made_progress;
use specloop::spec::markdown::parse_spec;
use specloop::spec::{select_tasks, SpecSnapshot, SpecTask, TaskSize, TaskStatus};
use specloop::stream::StreamParser;
use specloop::testing::{spec_markdown, StreamScript};

// ============================================================================
// Fixtures
// ============================================================================

/// A turn with `tools` read/edit/bash round trips.
fn turn(tools: usize) -> Vec<String> {
    let mut lines = vec![StreamScript::system("bench")];
    for i in 0..tools {
        let id = format!("t{i}");
        let (name, input) = match i % 3 {
            0 => ("Read", json!({"file_path": format!("src/file_{i}.rs")})),
            1 => ("Edit", json!({"file_path": format!("src/file_{i}.rs"), "old_string": "a", "new_string": "b"})),
            _ => ("Bash", json!({"command": "cargo test --quiet"})),
        };
        lines.push(StreamScript::thought("Looking at the next file"));
        lines.push(StreamScript::tool_use(&id, name, input));
        lines.push(StreamScript::tool_result(&id, &"x".repeat(200), i % 7 == 0));
    }
    lines.push(StreamScript::result(false, Some(0.25), 50_000, 4_000));
    lines
}

fn large_spec(tasks: usize) -> SpecSnapshot {
    let sizes = [TaskSize::Small, TaskSize::Medium, TaskSize::Large];
    SpecSnapshot::new(
        (0..tasks)
            .map(|i| {
                let status = if i < tasks / 2 {
                    TaskStatus::Passed
                } else {
                    TaskStatus::Pending
                };
                SpecTask::new(format!("T{i:04}"), format!("Task {i}"), sizes[i % 3]).with_status(status)
            })
            .collect(),
    )
}

// ============================================================================
// Stream Parsing Benchmarks
// ============================================================================

fn bench_stream_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("stream_parsing");

    for tools in [10, 100, 1000] {
        let lines = turn(tools);
        let bytes: usize = lines.iter().map(String::len).sum();
        group.throughput(Throughput::Bytes(bytes as u64));
        group.bench_with_input(BenchmarkId::new("parse_turn", tools), &lines, |b, lines| {
            b.iter(|| {
                let mut parser = StreamParser::new();
                let mut events = 0;
                for line in lines {
                    events += parser.parse_line(black_box(line)).len();
                }
                events
            });
        });
    }

    group.finish();
}

fn bench_activity_folding(c: &mut Criterion) {
    let mut group = c.benchmark_group("activity_folding");

    let lines = turn(500);
    let mut parser = StreamParser::new();
    let events: Vec<_> = lines.iter().flat_map(|l| parser.parse_line(l)).collect();
    group.throughput(Throughput::Elements(events.len() as u64));
    group.bench_function("record_500_tools", |b| {
        b.iter(|| {
            let mut tracker = ActivityTracker::new(50);
            for event in &events {
                tracker.record(black_box(event));
            }
            tracker.stats().tools_started
        });
    });

    group.finish();
}

// ============================================================================
// Spec Benchmarks
// ============================================================================

fn bench_spec(c: &mut Criterion) {
    let mut group = c.benchmark_group("spec");

    for tasks in [10, 100, 1000] {
        let snapshot = large_spec(tasks);
        let markdown = spec_markdown(&snapshot.tasks);

        group.bench_with_input(BenchmarkId::new("parse_markdown", tasks), &markdown, |b, md| {
            b.iter(|| parse_spec(black_box(md)).map(|s| s.len()));
        });
        group.bench_with_input(BenchmarkId::new("select_tasks", tasks), &snapshot, |b, snap| {
            b.iter(|| select_tasks(black_box(snap), 4).points);
        });

        let mut after = snapshot.clone();
        if let Some(task) = after.tasks.iter_mut().rev().find(|t| !t.status.is_terminal()) {
            task.status = TaskStatus::Passed;
        }
        group.bench_with_input(
            BenchmarkId::new("made_progress", tasks),
            &(snapshot, after),
            |b, (before, after)| {
                b.iter(|| made_progress(black_box(before), black_box(after)));
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_stream_parsing, bench_activity_folding, bench_spec);
criterion_main!(benches);
