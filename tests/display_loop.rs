// 该文件是 Guanzhao （观照） 项目的一部分。
// tests/display_loop.rs - 状态机与显示循环
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

mod common;

use std::{cell::RefCell, rc::Rc, sync::mpsc, time::Duration};

use common::{
  BrokenModel, RecordingSurface, SourceProbe, canned, gray_frame, person, scripted_sources,
};
use guanzhao::{
  app::{AppState, CaptureState, Control, ControlPanel, DetectorMode, TransitionError},
  detector::{BoxError, Detect, DetectorConfig, DetectorKind, Detector},
  input::FrameRead,
  model::Annex,
  output::{DISPLAY_HEIGHT, DISPLAY_WIDTH},
  task::{Command, ContinuousTask, DisplayLoop, StepOutcome},
};

fn detectors() -> impl FnMut(&DetectorConfig) -> Result<Box<dyn Detect>, BoxError> + 'static {
  |config: &DetectorConfig| {
    Ok(canned(
      *config,
      vec![person(0.7, [10.0, 10.0, 60.0, 100.0], Annex::None)],
    ))
  }
}

fn app(probe: &Rc<RefCell<SourceProbe>>, script: Vec<FrameRead>) -> AppState {
  AppState::new(scripted_sources(probe, 320, 240, script), detectors())
}

#[test]
fn only_one_detector_is_on_at_a_time() {
  let probe = Rc::new(RefCell::new(SourceProbe::default()));
  let mut app = app(&probe, vec![]);

  app.press(Control::CameraOn).unwrap();
  app.press(Control::DetectorOn(DetectorKind::BoxMask)).unwrap();
  assert_eq!(app.mode(), DetectorMode::BoxMask);
  assert_eq!(*app.panel(), ControlPanel::detecting(DetectorKind::BoxMask));

  for kind in DetectorKind::ALL {
    assert!(matches!(
      app.press(Control::DetectorOn(kind)),
      Err(TransitionError::ControlDisabled(_))
    ));
  }
  assert!(app.press(Control::DetectorOff(DetectorKind::Pose)).is_err());

  app.press(Control::DetectorOff(DetectorKind::BoxMask)).unwrap();
  assert_eq!(app.mode(), DetectorMode::None);
  app.press(Control::DetectorOn(DetectorKind::Pose)).unwrap();
  assert_eq!(app.mode(), DetectorMode::Pose);

  // 直接切换：旧检测器先被释放
  app.select_detector(DetectorKind::Box).unwrap();
  assert_eq!(app.mode(), DetectorMode::Box);
}

#[test]
fn selecting_without_capture_is_rejected() {
  let probe = Rc::new(RefCell::new(SourceProbe::default()));
  let mut app = app(&probe, vec![]);
  assert!(matches!(
    app.select_detector(DetectorKind::Box),
    Err(TransitionError::CaptureNotRunning)
  ));
  assert_eq!(app.mode(), DetectorMode::None);
}

#[test]
fn step_presents_scaled_frames() {
  let probe = Rc::new(RefCell::new(SourceProbe::default()));
  let mut app = app(&probe, vec![]);
  let mut display = DisplayLoop::default();
  let mut surface = RecordingSurface::default();

  assert_eq!(display.step(&mut app, &mut surface), StepOutcome::Halted);

  app.start_capture().unwrap();
  assert_eq!(
    display.step(&mut app, &mut surface),
    StepOutcome::Continue(Duration::from_millis(10))
  );
  assert_eq!(surface.images.len(), 1);
  assert_eq!(
    surface.images[0].dimensions(),
    (DISPLAY_WIDTH, DISPLAY_HEIGHT)
  );
  assert!(surface.detections[0].is_none());

  app.select_detector(DetectorKind::Box).unwrap();
  display.step(&mut app, &mut surface);
  let detections = surface.detections[1].as_ref().unwrap();
  assert_eq!(detections.rendered.boxes, 1);
}

#[test]
fn stop_releases_source_only_on_acknowledgment() {
  let probe = Rc::new(RefCell::new(SourceProbe::default()));
  let mut app = app(&probe, vec![]);
  let mut display = DisplayLoop::default();
  let mut surface = RecordingSurface::default();

  app.start_capture().unwrap();
  app.select_detector(DetectorKind::Pose).unwrap();
  display.step(&mut app, &mut surface);

  app.press(Control::CameraOff).unwrap();
  app.stop_capture();
  assert_eq!(app.capture_state(), CaptureState::Draining);
  assert_eq!(app.mode(), DetectorMode::None);
  assert_eq!(*app.panel(), ControlPanel::stopped());
  assert_eq!(probe.borrow().closed, 0);

  assert_eq!(display.step(&mut app, &mut surface), StepOutcome::Halted);
  assert_eq!(app.capture_state(), CaptureState::Stopped);
  assert_eq!(probe.borrow().closed, 1);
  assert_eq!(surface.images.len(), 1);

  assert_eq!(display.step(&mut app, &mut surface), StepOutcome::Halted);
  assert_eq!(probe.borrow().closed, 1);
}

#[test]
fn read_failures_do_not_stop_the_loop() {
  let probe = Rc::new(RefCell::new(SourceProbe::default()));
  let script = vec![
    FrameRead::Missing,
    FrameRead::Reused(gray_frame(320, 240)),
    FrameRead::Lost("设备已拔出".to_string()),
    FrameRead::Ended,
  ];
  let mut app = app(&probe, script);
  let mut display = DisplayLoop::default();
  let mut surface = RecordingSurface::default();
  app.start_capture().unwrap();

  for _ in 0..5 {
    assert!(matches!(
      display.step(&mut app, &mut surface),
      StepOutcome::Continue(_)
    ));
  }
  assert_eq!(app.capture_state(), CaptureState::Running);
  assert_eq!(display.stats().missing, 1);
  assert_eq!(display.stats().reused, 1);
  // Reused 与脚本之后的新帧
  assert_eq!(surface.images.len(), 2);
}

#[test]
fn detector_failure_shows_raw_frame() {
  let probe = Rc::new(RefCell::new(SourceProbe::default()));
  let mut app = AppState::new(
    scripted_sources(&probe, 320, 240, vec![]),
    |config: &DetectorConfig| -> Result<Box<dyn Detect>, BoxError> {
      Ok(Box::new(Detector::new(*config, BrokenModel)))
    },
  );
  let mut display = DisplayLoop::default();
  let mut surface = RecordingSurface::default();

  app.start_capture().unwrap();
  app.select_detector(DetectorKind::BoxMask).unwrap();
  for _ in 0..3 {
    assert!(matches!(
      display.step(&mut app, &mut surface),
      StepOutcome::Continue(_)
    ));
  }
  assert_eq!(display.stats().detect_failures, 3);
  assert_eq!(surface.images.len(), 3);
  assert_eq!(surface.images[0].get_pixel(320, 240).0, [90, 90, 90]);
  assert_eq!(app.mode(), DetectorMode::BoxMask);
}

#[test]
fn continuous_task_runs_commands_until_frame_limit() {
  let probe = Rc::new(RefCell::new(SourceProbe::default()));
  let mut app = app(&probe, vec![]);
  let mut surface = RecordingSurface::default();

  let (tx, rx) = mpsc::channel();
  tx.send(Command::Press(Control::DetectorOn(DetectorKind::Box)))
    .unwrap();

  let stats = ContinuousTask::default()
    .with_interval(Duration::from_millis(1))
    .with_frame_number(Some(4))
    .with_start_capture(true)
    .run_task(&mut app, &mut surface, rx)
    .unwrap();

  drop(tx);
  assert_eq!(stats.presented, 4);
  assert_eq!(app.capture_state(), CaptureState::Stopped);
  assert_eq!(probe.borrow().closed, 1);
  assert!(surface.detections.iter().all(Option::is_some));
}

#[test]
fn quit_command_stops_capture() {
  let probe = Rc::new(RefCell::new(SourceProbe::default()));
  let mut app = app(&probe, vec![]);
  let mut surface = RecordingSurface::default();

  let (tx, rx) = mpsc::channel();
  tx.send(Command::Quit).unwrap();
  let stats = ContinuousTask::default()
    .with_start_capture(true)
    .run_task(&mut app, &mut surface, rx)
    .unwrap();

  drop(tx);
  assert_eq!(stats.presented, 0);
  assert_eq!(probe.borrow().opened, 1);
  assert_eq!(probe.borrow().closed, 1);
}
