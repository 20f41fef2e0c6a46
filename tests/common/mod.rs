//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;
pub mod mock_helpers;

use crossbeam_channel::Receiver;
use drawbot_rs::tasks::TaskId;
use drawbot_rs::{AppEvent, TaskStage};
use std::time::{Duration, Instant};

/// Upper bound for any single wait in the integration tests
pub fn test_timeout() -> Duration {
    Duration::from_secs(10)
}

/// Poll `f` until it holds or the test timeout elapses
pub fn wait_until(mut f: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + test_timeout();
    while Instant::now() < deadline {
        if f() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    false
}

/// Stages published for `task_id`, in the order received
pub fn stages_of(events: &[AppEvent], task_id: TaskId) -> Vec<TaskStage> {
    events
        .iter()
        .filter_map(|event| match event {
            AppEvent::StageFinished { task_id: id, stage, .. } if *id == task_id => Some(*stage),
            _ => None,
        })
        .collect()
}

/// Block until `task_id` publishes `stage`, returning every event seen
pub fn wait_for_stage(rx: &Receiver<AppEvent>, task_id: TaskId, stage: TaskStage) -> Vec<AppEvent> {
    let deadline = Instant::now() + test_timeout();
    let mut seen = Vec::new();
    while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
        let Ok(event) = rx.recv_timeout(remaining) else {
            break;
        };
        let done = matches!(
            &event,
            AppEvent::StageFinished { task_id: id, stage: s, .. } if *id == task_id && *s == stage
        );
        seen.push(event);
        if done {
            return seen;
        }
    }
    panic!("task {} never finished {}", task_id, stage);
}

/// Assert two floats are approximately equal
pub fn assert_float_eq(a: f64, b: f64, epsilon: f64) {
    assert!(
        (a - b).abs() < epsilon,
        "Expected {} to be approximately equal to {} (epsilon: {})",
        a,
        b,
        epsilon
    );
}
