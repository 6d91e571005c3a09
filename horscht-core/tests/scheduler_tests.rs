// ABOUTME: Tests for the whole-second cron scheduler.
// ABOUTME: Firing on multiples, at-most-once per tick, wrap boundaries and event-loop integration.

mod common;

use common::*;
use horscht_core::{CronSpec, Plugin, PluginConfig, Registry, Scheduler};
use std::time::Duration;
use tokio::time::Instant;

fn crons(intervals: &[(&str, i64)]) -> Vec<CronSpec> {
    let mut registry = Registry::new();
    for (name, secs) in intervals {
        registry
            .register(Plugin::new(PluginConfig::empty(name)).cron_every(*secs, RecordingCron(Calls::new())))
            .unwrap();
    }
    registry.crons().to_vec()
}

fn fired(due: &[CronSpec]) -> Vec<String> {
    due.iter().map(|t| t.owner_name.clone()).collect()
}

#[tokio::test]
async fn test_fires_when_elapsed_is_multiple_of_interval() {
    let mut scheduler = Scheduler::new(crons(&[("two", 2), ("three", 3)]), 65_000, Instant::now());

    let mut log = Vec::new();
    for _ in 0..6 {
        let due = scheduler.tick();
        log.push((scheduler.elapsed_seconds(), fired(&due)));
    }

    assert_eq!(
        log,
        vec![
            (1, vec![]),
            (2, vec!["two".to_string()]),
            (3, vec!["three".to_string()]),
            (4, vec!["two".to_string()]),
            (5, vec![]),
            (6, vec!["two".to_string(), "three".to_string()]),
        ]
    );
}

#[tokio::test]
async fn test_wrap_never_skips_or_adds_firings() {
    // Base 10 with intervals 4 and 7 wraps at 28.
    let mut scheduler = Scheduler::new(crons(&[("four", 4), ("seven", 7)]), 10, Instant::now());
    assert_eq!(scheduler.wrap_threshold(), Some(28));

    let (mut fours, mut sevens) = (0, 0);
    for _ in 0..100 {
        for name in fired(&scheduler.tick()) {
            match name.as_str() {
                "four" => fours += 1,
                "seven" => sevens += 1,
                _ => unreachable!(),
            }
        }
        assert!(scheduler.elapsed_seconds() < 28);
    }

    assert_eq!(fours, 100 / 4);
    assert_eq!(sevens, 100 / 7);
}

#[tokio::test]
async fn test_catch_up_fires_each_task_at_most_once() {
    let start = Instant::now();
    let mut scheduler = Scheduler::new(crons(&[("one", 1), ("three", 3)]), 65_000, start);

    let due = scheduler.advance(start + Duration::from_secs(10));

    assert_eq!(fired(&due), vec!["one", "three"]);
    assert_eq!(scheduler.elapsed_seconds(), 10);
}

#[tokio::test]
async fn test_sub_second_remainder_carries_over() {
    let start = Instant::now();
    let mut scheduler = Scheduler::new(crons(&[("one", 1)]), 65_000, start);

    assert!(scheduler.advance(start + Duration::from_millis(900)).is_empty());
    assert_eq!(scheduler.elapsed_seconds(), 0);

    assert_eq!(fired(&scheduler.advance(start + Duration::from_millis(1500))), vec!["one"]);
    assert_eq!(scheduler.elapsed_seconds(), 1);

    assert_eq!(fired(&scheduler.advance(start + Duration::from_millis(2000))), vec!["one"]);
    assert_eq!(scheduler.elapsed_seconds(), 2);

    // same instant again: nothing new
    assert!(scheduler.advance(start + Duration::from_millis(2000)).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_event_loop_fires_cron_independent_of_traffic() {
    let calls = Calls::new();
    let mut registry = Registry::new();
    registry
        .register(
            Plugin::new(plugin_config("reminders", "secs = 2"))
                .cron(RecordingCron(calls.clone()))
                .unwrap(),
        )
        .unwrap();
    let mut h = Harness::new(registry);

    h.event_loop.run_once().await;
    assert!(calls.is_empty());

    tokio::time::advance(Duration::from_secs(1)).await;
    h.event_loop.run_once().await;
    assert!(calls.is_empty());

    tokio::time::advance(Duration::from_secs(1)).await;
    h.event_loop.run_once().await;
    assert_eq!(calls.all(), vec!["reminders"]);

    // a long stall fires the task once, not once per missed multiple
    tokio::time::advance(Duration::from_secs(10)).await;
    h.event_loop.run_once().await;
    assert_eq!(calls.len(), 2);
    assert_eq!(h.event_loop.scheduler().elapsed_seconds(), 12);
}
