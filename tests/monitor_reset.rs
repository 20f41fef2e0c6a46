//! Integration tests for resetting the compute worker
//!
//! A reset must leave no active task behind and a worker that accepts new
//! work immediately, even when the previous task never yields.

mod common;

use common::builders::{black_image, DrawingBuilder};
use common::mock_helpers::{EndlessFinder, OneLineFinder, RecordingChannel};
use common::{wait_for_stage, wait_until};
use drawbot_rs::device::AllGeometry;
use drawbot_rs::{AppConfig, AppContext, AppEvent, TaskStage};
use serial_test::serial;
use std::sync::Arc;
use std::time::Duration;

#[test]
#[serial]
fn test_reset_clears_active_task() {
    let app = AppContext::new(AppConfig::default()).unwrap();
    app.set_image(black_image(8, 8), None);
    app.set_path_finder(Arc::new(EndlessFinder::default()));

    let task = app.start_plotting().unwrap();
    assert!(wait_until(|| task.geometry_count() > 0));
    let generation = app.monitor().worker_generation();

    app.reset_plotting().unwrap();

    let status = app.status();
    assert!(!status.is_active());
    assert_eq!(status.active_task, None);
    assert_eq!(status.generation, generation + 1);
    assert!(app.monitor().active_task().is_none());
    assert!(app.plotting_task().is_none());
    assert!(task.is_cancelled());
    app.shutdown();
}

#[test]
#[serial]
fn test_worker_accepts_work_after_reset() {
    let app = AppContext::new(AppConfig::default()).unwrap();
    app.set_image(black_image(8, 8), None);
    app.set_path_finder(Arc::new(EndlessFinder::default()));
    let stale = app.start_plotting().unwrap();
    assert!(wait_until(|| stale.geometry_count() > 0));

    app.reset_plotting().unwrap();
    app.set_path_finder(Arc::new(OneLineFinder));
    let rx = app.subscribe();
    let fresh = app.start_plotting().unwrap();
    let events = wait_for_stage(&rx, fresh.id(), TaskStage::Finished);

    assert_eq!(fresh.geometry_count(), 1);
    assert!(!events.iter().any(|event| matches!(
        event,
        AppEvent::StageFinished { task_id, .. } if *task_id == stale.id()
    )));
    assert!(wait_until(|| !app.status().is_active()));
    assert_eq!(app.status().message, "Finished");
    app.shutdown();
}

#[test]
#[serial]
fn test_reset_without_task_is_harmless() {
    let app = AppContext::new(AppConfig::default()).unwrap();
    app.reset_plotting().unwrap();
    app.reset_plotting().unwrap();

    assert_eq!(app.monitor().worker_generation(), 2);
    assert!(!app.status().is_active());

    app.set_image(black_image(4, 4), None);
    app.set_path_finder(Arc::new(OneLineFinder));
    let rx = app.subscribe();
    let task = app.start_plotting().unwrap();
    wait_for_stage(&rx, task.id(), TaskStage::Finished);
    app.shutdown();
}

#[test]
#[serial]
fn test_reset_cancels_export() {
    let channel = RecordingChannel::new().with_delay(Duration::from_millis(2));
    let app = AppContext::new(AppConfig::default()).unwrap();
    app.attach_device(Box::new(channel.clone()));
    let drawing = Arc::new(DrawingBuilder::new(50, 50).strokes(100).build());

    let export = app
        .create_or_resume_export_task(drawing, Arc::new(AllGeometry), app.device_sink().unwrap(), false, false)
        .unwrap();
    assert!(wait_until(|| export.delivered() >= 3));

    app.reset_plotting().unwrap();

    assert!(export.is_cancelled());
    assert!(app.export_task().is_none());
    assert!(!app.status().is_exporting());
    assert!(wait_until(|| export.is_done()));
    assert!(export.delivered() < export.total());
    app.shutdown();
}
