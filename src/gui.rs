// 该文件是 Guanzhao （观照） 项目的一部分。
// src/gui.rs - 图形界面
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

use std::{
  convert::Infallible,
  time::{Duration, Instant},
};

use egui::{ColorImage, TextureHandle, TextureOptions};
use image::RgbImage;
use tracing::warn;

use crate::{
  app::{AppState, CaptureState, Control},
  detector::{DetectorKind, Detections},
  output::{DISPLAY_HEIGHT, DISPLAY_WIDTH, DisplaySurface, draw::rounded},
  task::{DisplayLoop, StepOutcome},
};

/// 把呈现的画面暂存起来，在下一次重绘时上传为纹理
#[derive(Default)]
pub struct TextureSurface {
  pending: Option<ColorImage>,
  texture: Option<TextureHandle>,
  last_fps: Option<f64>,
}

impl DisplaySurface for TextureSurface {
  type Error = Infallible;

  fn present(
    &mut self,
    image: &RgbImage,
    detections: Option<&Detections>,
  ) -> Result<(), Self::Error> {
    let size = [image.width() as usize, image.height() as usize];
    self.pending = Some(ColorImage::from_rgb(size, image.as_raw()));
    self.last_fps = detections.map(Detections::fps);
    Ok(())
  }
}

impl TextureSurface {
  fn upload(&mut self, ctx: &egui::Context) {
    let Some(image) = self.pending.take() else {
      return;
    };
    match &mut self.texture {
      Some(texture) => texture.set(image, TextureOptions::LINEAR),
      None => self.texture = Some(ctx.load_texture("frame", image, TextureOptions::LINEAR)),
    }
  }
}

/// 下一次循环步的时刻，`None` 表示循环已停
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StepSchedule {
  next: Option<Instant>,
}

impl StepSchedule {
  pub fn next(&self) -> Option<Instant> {
    self.next
  }

  /// 尚未调度时，安排在 `now` 执行
  pub fn arm(&mut self, now: Instant) {
    self.next.get_or_insert(now);
  }

  pub fn is_due(&self, now: Instant) -> bool {
    self.next.is_some_and(|due| now >= due)
  }

  pub fn settle(&mut self, outcome: StepOutcome, now: Instant) {
    self.next = match outcome {
      StepOutcome::Continue(delay) => Some(now + delay),
      StepOutcome::Halted => None,
    };
  }
}

/// 控制面板的行：名称、ON 控件、OFF 控件
pub fn switch_rows() -> [(&'static str, Control, Control); 4] {
  let [a, b, c] = DetectorKind::ALL;
  let row = |kind: DetectorKind| {
    (
      kind.display_name(),
      Control::DetectorOn(kind),
      Control::DetectorOff(kind),
    )
  };
  [
    ("Camera", Control::CameraOn, Control::CameraOff),
    row(a),
    row(b),
    row(c),
  ]
}

pub struct DetectionApp {
  state: AppState,
  display: DisplayLoop,
  surface: TextureSurface,
  schedule: StepSchedule,
  message: Option<String>,
}

impl DetectionApp {
  pub fn new(state: AppState, display: DisplayLoop) -> Self {
    Self {
      state,
      display,
      surface: TextureSurface::default(),
      schedule: StepSchedule::default(),
      message: None,
    }
  }

  pub fn press(&mut self, control: Control, now: Instant) {
    match self.state.press(control) {
      Ok(()) => self.message = None,
      Err(e) => {
        warn!("{}", e);
        self.message = Some(e.to_string());
      }
    }
    // 启动后开始调度；停止后还需要一步来确认
    if self.state.capture_state() != CaptureState::Stopped {
      self.schedule.arm(now);
    }
  }

  pub fn run_due_step(&mut self, now: Instant) {
    if !self.schedule.is_due(now) {
      return;
    }
    let outcome = self.display.step(&mut self.state, &mut self.surface);
    self.schedule.settle(outcome, now);
  }

  fn switch_row(&mut self, ui: &mut egui::Ui, (name, on, off): (&str, Control, Control)) {
    ui.label(name);
    let panel = *self.state.panel();
    if ui
      .add_enabled(panel.is_enabled(on), egui::Button::new("ON"))
      .clicked()
    {
      self.press(on, Instant::now());
    }
    if ui
      .add_enabled(panel.is_enabled(off), egui::Button::new("OFF"))
      .clicked()
    {
      self.press(off, Instant::now());
    }
    ui.end_row();
  }
}

impl eframe::App for DetectionApp {
  fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
    self.run_due_step(Instant::now());
    self.surface.upload(ctx);

    egui::SidePanel::left("controls").show(ctx, |ui| {
      egui::Grid::new("switches")
        .num_columns(3)
        .spacing([8.0, 8.0])
        .show(ui, |ui| {
          for row in switch_rows() {
            self.switch_row(ui, row);
          }
        });

      ui.separator();
      if let Some(fps) = self.surface.last_fps {
        ui.label(format!("fps: {}", rounded(fps, 4)));
      }
      if let Some(message) = &self.message {
        ui.colored_label(egui::Color32::RED, message);
      }
    });

    egui::CentralPanel::default().show(ctx, |ui| match &self.surface.texture {
      Some(texture) => {
        ui.add(egui::Image::from_texture(egui::load::SizedTexture::new(
          texture.id(),
          egui::vec2(DISPLAY_WIDTH as f32, DISPLAY_HEIGHT as f32),
        )));
      }
      None => {
        ui.label("摄像头未开启");
      }
    });

    if let Some(due) = self.schedule.next() {
      let delay = due.saturating_duration_since(Instant::now());
      ctx.request_repaint_after(delay.max(Duration::from_millis(1)));
    }
  }
}

impl Drop for DetectionApp {
  fn drop(&mut self) {
    self.state.stop_capture();
    self.state.finish_stop();
  }
}

#[cfg(test)]
mod tests {
  use std::{cell::RefCell, rc::Rc};

  use super::*;
  use crate::{
    app::ControlPanel,
    detector::{BoxError, Detect, DetectorConfig},
    frame::{ChannelOrder, Frame},
    input::{FrameRead, FrameSource, SourceKind},
  };

  struct CountingSource {
    closed: Rc<RefCell<usize>>,
    is_closed: bool,
  }

  impl FrameSource for CountingSource {
    fn kind(&self) -> SourceKind {
      SourceKind::Camera
    }

    fn next_frame(&mut self) -> FrameRead {
      FrameRead::Fresh(Frame::filled(8, 6, ChannelOrder::Bgr, [10, 20, 30]))
    }

    fn close(&mut self) {
      if !self.is_closed {
        self.is_closed = true;
        *self.closed.borrow_mut() += 1;
      }
    }

    fn is_closed(&self) -> bool {
      self.is_closed
    }
  }

  fn app(closed: &Rc<RefCell<usize>>) -> DetectionApp {
    let closed = closed.clone();
    let state = AppState::new(
      move || -> Result<Box<dyn FrameSource>, BoxError> {
        Ok(Box::new(CountingSource {
          closed: closed.clone(),
          is_closed: false,
        }))
      },
      |config: &DetectorConfig| -> Result<Box<dyn Detect>, BoxError> {
        Err(format!("{} 没有模型", config.kind.display_name()).into())
      },
    );
    DetectionApp::new(state, DisplayLoop::new(Duration::from_millis(10)))
  }

  #[test]
  fn camera_on_schedules_and_presents() {
    let closed = Rc::new(RefCell::new(0));
    let mut app = app(&closed);
    let now = Instant::now();

    app.run_due_step(now);
    assert!(app.schedule.next().is_none());

    app.press(Control::CameraOn, now);
    assert_eq!(app.schedule.next(), Some(now));
    app.run_due_step(now);
    assert!(app.surface.pending.is_some());
    assert_eq!(app.schedule.next(), Some(now + Duration::from_millis(10)));

    // 未到时间不执行
    app.surface.pending = None;
    app.run_due_step(now + Duration::from_millis(5));
    assert!(app.surface.pending.is_none());
  }

  #[test]
  fn camera_off_waits_for_acknowledging_step() {
    let closed = Rc::new(RefCell::new(0));
    let mut app = app(&closed);
    let now = Instant::now();

    app.press(Control::CameraOn, now);
    app.run_due_step(now);
    app.press(Control::CameraOff, now);
    assert_eq!(app.state.capture_state(), CaptureState::Draining);
    assert_eq!(*closed.borrow(), 0);
    assert!(app.schedule.next().is_some());

    let later = now + Duration::from_millis(20);
    app.run_due_step(later);
    assert_eq!(app.state.capture_state(), CaptureState::Stopped);
    assert_eq!(*closed.borrow(), 1);
    assert!(app.schedule.next().is_none());
  }

  #[test]
  fn stop_before_first_step_still_releases_source() {
    let closed = Rc::new(RefCell::new(0));
    let mut app = app(&closed);
    let now = Instant::now();

    // 启动后从未执行过循环步
    app.press(Control::CameraOn, now);
    app.press(Control::CameraOff, now);
    app.run_due_step(now);
    assert_eq!(*closed.borrow(), 1);

    app.press(Control::CameraOn, now);
    assert_eq!(app.schedule.next(), Some(now));
  }

  #[test]
  fn failed_detector_build_keeps_loop_running() {
    let closed = Rc::new(RefCell::new(0));
    let mut app = app(&closed);
    let now = Instant::now();
    app.press(Control::CameraOn, now);
    app.press(Control::DetectorOn(DetectorKind::Box), now);
    assert!(app.message.is_some());
    assert_eq!(*app.state.panel(), ControlPanel::capturing());
    app.run_due_step(now);
    assert!(app.surface.pending.is_some());
  }

  #[test]
  fn disabled_press_reports_message() {
    let closed = Rc::new(RefCell::new(0));
    let mut app = app(&closed);
    app.press(Control::DetectorOn(DetectorKind::Pose), Instant::now());
    assert!(app.message.is_some());
    assert!(app.schedule.next().is_none());

    app.press(Control::CameraOn, Instant::now());
    assert!(app.message.is_none());
  }

  #[test]
  fn rows_follow_panel_layout() {
    let rows = switch_rows();
    let names = rows.map(|(name, _, _)| name);
    assert_eq!(names[0], "Camera");
    let detector_names = DetectorKind::ALL.map(DetectorKind::display_name);
    assert_eq!(names[1..], detector_names);

    let enabled = |panel: ControlPanel| {
      rows.map(|(_, on, off)| (panel.is_enabled(on), panel.is_enabled(off)))
    };
    assert_eq!(
      enabled(ControlPanel::stopped()),
      [(true, false), (false, false), (false, false), (false, false)]
    );
    assert_eq!(
      enabled(ControlPanel::capturing()),
      [(false, true), (true, false), (true, false), (true, false)]
    );
    assert_eq!(
      enabled(ControlPanel::detecting(DetectorKind::Pose)),
      [(false, true), (false, false), (false, false), (false, true)]
    );
  }

  #[test]
  fn surface_keeps_fps_of_last_detection() {
    let mut surface = TextureSurface::default();
    let image = RgbImage::new(DISPLAY_WIDTH, DISPLAY_HEIGHT);
    surface.present(&image, None).unwrap();
    assert!(surface.last_fps.is_none());
    let pending = surface.pending.as_ref().unwrap();
    let expected = [DISPLAY_WIDTH as usize, DISPLAY_HEIGHT as usize];
    assert_eq!(pending.size, expected);
  }
}
