//! Integration tests for manual jog control
//!
//! Manual mode takes the device away from a streaming export: no automated
//! line may reach the device between entering and leaving it. The mode
//! switches are written from the background worker, so the tests wait for
//! them to land.

mod common;

use common::builders::DrawingBuilder;
use common::mock_helpers::RecordingChannel;
use common::wait_until;
use drawbot_rs::device::AllGeometry;
use drawbot_rs::events::drain;
use drawbot_rs::{AppConfig, AppContext, AppEvent, DrawbotError, JogDirection};
use std::sync::Arc;
use std::time::Duration;

fn context_with_device(channel: &RecordingChannel) -> AppContext {
    let app = AppContext::new(AppConfig::default()).unwrap();
    app.attach_device(Box::new(channel.clone()));
    app
}

/// Lines strictly between the first `G91` and the `G90` that follows it
fn manual_section(lines: &[String]) -> Vec<String> {
    let start = lines.iter().position(|l| l == "G91").expect("no G91 sent");
    let end = lines[start..]
        .iter()
        .position(|l| l == "G90")
        .map(|offset| start + offset)
        .expect("no G90 after G91");
    lines[start + 1..end].to_vec()
}

#[test]
fn test_no_automated_lines_while_manual() {
    let channel = RecordingChannel::new().with_delay(Duration::from_millis(1));
    let app = context_with_device(&channel);
    let drawing = Arc::new(DrawingBuilder::new(100, 100).strokes(80).build());

    let task = app
        .create_or_resume_export_task(drawing, Arc::new(AllGeometry), app.device_sink().unwrap(), false, false)
        .unwrap();
    assert!(wait_until(|| task.delivered() >= 8));

    let builder = app.builder().unwrap();
    app.enter_manual_mode().unwrap();
    assert!(wait_until(|| builder.is_manual_mode()));
    builder.manual_move([5.0, 0.0, 0.0]).unwrap();
    builder.manual_move([0.0, 0.0, 1.0]).unwrap();
    let delivered = task.delivered();
    std::thread::sleep(Duration::from_millis(40));
    assert!(task.delivered() <= delivered + 1);
    app.exit_manual_mode().unwrap();

    assert!(wait_until(|| task.is_done()));
    assert_eq!(task.delivered(), task.total());

    let lines = channel.lines();
    assert_eq!(
        manual_section(&lines),
        vec!["G0 X5.000 Y0.000".to_string(), "G0 Z1.000".to_string()]
    );
    assert_eq!(lines.len(), task.total() + 4);
    app.shutdown();
}

#[test]
fn test_manual_mode_events_and_nesting() {
    let channel = RecordingChannel::new();
    let app = context_with_device(&channel);
    let rx = app.subscribe();
    let builder = app.builder().unwrap();
    let mut modes: Vec<bool> = Vec::new();
    let mut collect_until = |count: usize| {
        wait_until(|| {
            modes.extend(drain(&rx).into_iter().filter_map(|event| match event {
                AppEvent::ManualMode(on) => Some(on),
                _ => None,
            }));
            modes.len() >= count
        })
    };

    app.enter_manual_mode().unwrap();
    app.enter_manual_mode().unwrap();
    app.exit_manual_mode().unwrap();
    assert!(collect_until(3));
    assert!(builder.is_manual_mode());
    app.exit_manual_mode().unwrap();
    assert!(collect_until(4));
    assert!(!builder.is_manual_mode());
    assert!(matches!(
        app.exit_manual_mode(),
        Err(DrawbotError::ManualMode(_))
    ));

    assert_eq!(modes, vec![true, true, true, false]);
    assert_eq!(channel.lines(), vec!["G91".to_string(), "G90".to_string()]);
    app.shutdown();
}

#[test]
fn test_manual_move_runs_on_background_worker() {
    let channel = RecordingChannel::new();
    let app = context_with_device(&channel);

    assert!(matches!(
        app.manual_move([1.0, 0.0, 0.0]),
        Err(DrawbotError::ManualMode(_))
    ));

    app.enter_manual_mode().unwrap();
    app.manual_move([1.0, -2.0, 0.0]).unwrap();
    let builder = app.builder().unwrap();
    assert!(wait_until(|| builder.manual_moves() == 1));
    app.return_home().unwrap();
    assert!(wait_until(|| channel.len() == 3));
    app.exit_manual_mode().unwrap();
    assert!(wait_until(|| channel.len() == 4));

    assert_eq!(
        channel.lines(),
        vec!["G91", "G0 X1.000 Y-2.000", "G28", "G90"]
    );
    app.shutdown();
}

#[test]
fn test_jog_repeats_while_held() {
    let channel = RecordingChannel::new();
    let app = AppContext::new(AppConfig::default()).unwrap();
    let mut config = app.config();
    config.device.jog_interval_ms = 10;
    app.set_config(config);
    app.attach_device(Box::new(channel.clone()));

    let jog = app.jog_controller().unwrap();
    jog.press(JogDirection::Right).unwrap();
    assert_eq!(jog.active_direction(), Some(JogDirection::Right));
    let builder = app.builder().unwrap();
    assert!(builder.is_manual_mode());
    assert!(wait_until(|| builder.manual_moves() >= 3));
    jog.release().unwrap();

    assert!(!builder.is_manual_mode());
    assert_eq!(jog.active_direction(), None);
    let lines = channel.lines();
    assert_eq!(lines.first().map(String::as_str), Some("G91"));
    assert_eq!(lines.last().map(String::as_str), Some("G90"));
    assert!(lines[1..lines.len() - 1]
        .iter()
        .all(|line| line == "G0 X5.000 Y0.000"));
    app.shutdown();
}

#[test]
fn test_manual_mode_requires_device() {
    let app = AppContext::new(AppConfig::default()).unwrap();
    assert!(matches!(
        app.enter_manual_mode(),
        Err(DrawbotError::DeviceNotSelected)
    ));
    assert!(app.jog_controller().is_err());
    app.shutdown();
}
