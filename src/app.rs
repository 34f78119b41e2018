// 该文件是 Guanzhao （观照） 项目的一部分。
// src/app.rs - 应用状态与控件状态机
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

//! 采集状态 × 检测模式的状态机。
//!
//! 停止采集分两步：`stop_capture` 只把状态置为 `Draining`，
//! 由显示循环的下一步关闭帧源并回到 `Stopped`。

use thiserror::Error;
use tracing::{info, warn};

use crate::{
  detector::{BoxError, Detect, DetectError, DetectorConfig, DetectorKind, Detections},
  frame::Frame,
  input::{FrameRead, FrameSource},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureState {
  #[default]
  Stopped,
  Running,
  /// 已请求停止，等待显示循环确认
  Draining,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DetectorMode {
  #[default]
  None,
  Box,
  BoxMask,
  Pose,
}

impl DetectorMode {
  pub fn kind(self) -> Option<DetectorKind> {
    match self {
      DetectorMode::None => None,
      DetectorMode::Box => Some(DetectorKind::Box),
      DetectorMode::BoxMask => Some(DetectorKind::BoxMask),
      DetectorMode::Pose => Some(DetectorKind::Pose),
    }
  }
}

impl From<DetectorKind> for DetectorMode {
  fn from(kind: DetectorKind) -> Self {
    match kind {
      DetectorKind::Box => DetectorMode::Box,
      DetectorKind::BoxMask => DetectorMode::BoxMask,
      DetectorKind::Pose => DetectorMode::Pose,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Control {
  CameraOn,
  CameraOff,
  DetectorOn(DetectorKind),
  DetectorOff(DetectorKind),
}

/// 各控件是否可用
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlPanel {
  camera_on: bool,
  camera_off: bool,
  detector_on: [bool; 3],
  detector_off: [bool; 3],
}

impl Default for ControlPanel {
  fn default() -> Self {
    Self::stopped()
  }
}

impl ControlPanel {
  /// 未采集：只有 Camera ON 可用
  pub fn stopped() -> Self {
    Self {
      camera_on: true,
      camera_off: false,
      detector_on: [false; 3],
      detector_off: [false; 3],
    }
  }

  /// 采集中且未选检测器
  pub fn capturing() -> Self {
    Self {
      camera_on: false,
      camera_off: true,
      detector_on: [true; 3],
      detector_off: [false; 3],
    }
  }

  /// 采集中且选中了 `kind`
  pub fn detecting(kind: DetectorKind) -> Self {
    let mut detector_off = [false; 3];
    detector_off[kind.index()] = true;
    Self {
      camera_on: false,
      camera_off: true,
      detector_on: [false; 3],
      detector_off,
    }
  }

  pub fn is_enabled(&self, control: Control) -> bool {
    match control {
      Control::CameraOn => self.camera_on,
      Control::CameraOff => self.camera_off,
      Control::DetectorOn(kind) => self.detector_on[kind.index()],
      Control::DetectorOff(kind) => self.detector_off[kind.index()],
    }
  }
}

#[derive(Error, Debug)]
pub enum TransitionError {
  #[error("采集已在进行中")]
  AlreadyRunning,
  #[error("采集未在进行中")]
  CaptureNotRunning,
  #[error("控件不可用: {0:?}")]
  ControlDisabled(Control),
  #[error("无法打开帧源: {0}")]
  SourceOpen(#[source] BoxError),
  #[error("无法构建检测器 {kind:?}: {source}")]
  DetectorBuild {
    kind: DetectorKind,
    #[source]
    source: BoxError,
  },
}

pub trait SourceFactory {
  fn open_source(&mut self) -> Result<Box<dyn FrameSource>, BoxError>;
}

impl<F> SourceFactory for F
where
  F: FnMut() -> Result<Box<dyn FrameSource>, BoxError>,
{
  fn open_source(&mut self) -> Result<Box<dyn FrameSource>, BoxError> {
    self()
  }
}

pub trait DetectorFactory {
  fn build_detector(&mut self, config: &DetectorConfig) -> Result<Box<dyn Detect>, BoxError>;
}

impl<F> DetectorFactory for F
where
  F: FnMut(&DetectorConfig) -> Result<Box<dyn Detect>, BoxError>,
{
  fn build_detector(&mut self, config: &DetectorConfig) -> Result<Box<dyn Detect>, BoxError> {
    self(config)
  }
}

pub struct AppState {
  capture: CaptureState,
  mode: DetectorMode,
  panel: ControlPanel,
  source: Option<Box<dyn FrameSource>>,
  detector: Option<Box<dyn Detect>>,
  configs: [DetectorConfig; 3],
  sources: Box<dyn SourceFactory>,
  detectors: Box<dyn DetectorFactory>,
}

impl AppState {
  pub fn new<S, D>(sources: S, detectors: D) -> Self
  where
    S: SourceFactory + 'static,
    D: DetectorFactory + 'static,
  {
    Self {
      capture: CaptureState::Stopped,
      mode: DetectorMode::None,
      panel: ControlPanel::stopped(),
      source: None,
      detector: None,
      configs: DetectorKind::ALL.map(DetectorConfig::new),
      sources: Box::new(sources),
      detectors: Box::new(detectors),
    }
  }

  /// 替换某一检测器的配置，下次选中时生效
  pub fn with_config(mut self, config: DetectorConfig) -> Self {
    self.configs[config.kind.index()] = config;
    self
  }

  pub fn config(&self, kind: DetectorKind) -> &DetectorConfig {
    &self.configs[kind.index()]
  }

  pub fn capture_state(&self) -> CaptureState {
    self.capture
  }

  pub fn mode(&self) -> DetectorMode {
    self.mode
  }

  pub fn panel(&self) -> &ControlPanel {
    &self.panel
  }

  pub fn is_running(&self) -> bool {
    self.capture == CaptureState::Running
  }

  /// 按下一个控件；不可用的控件返回 `ControlDisabled`
  pub fn press(&mut self, control: Control) -> Result<(), TransitionError> {
    if !self.panel.is_enabled(control) {
      return Err(TransitionError::ControlDisabled(control));
    }
    match control {
      Control::CameraOn => self.start_capture(),
      Control::CameraOff => {
        self.stop_capture();
        Ok(())
      }
      Control::DetectorOn(kind) => self.select_detector(kind),
      Control::DetectorOff(_) => self.deselect_detector(),
    }
  }

  pub fn start_capture(&mut self) -> Result<(), TransitionError> {
    match self.capture {
      CaptureState::Running => return Err(TransitionError::AlreadyRunning),
      CaptureState::Draining => {
        self.finish_stop();
      }
      CaptureState::Stopped => {}
    }

    let source = self
      .sources
      .open_source()
      .map_err(TransitionError::SourceOpen)?;
    info!("开始采集: {:?}", source.kind());

    self.source = Some(source);
    self.capture = CaptureState::Running;
    self.mode = DetectorMode::None;
    self.panel = ControlPanel::capturing();
    Ok(())
  }

  /// 请求停止。重复调用无效果。
  pub fn stop_capture(&mut self) {
    if self.capture != CaptureState::Running {
      return;
    }
    info!("请求停止采集");
    self.detector = None;
    self.mode = DetectorMode::None;
    self.capture = CaptureState::Draining;
    self.panel = ControlPanel::stopped();
  }

  /// 确认停止并释放帧源，返回是否确实释放了
  pub fn finish_stop(&mut self) -> bool {
    if self.capture != CaptureState::Draining {
      return false;
    }
    if let Some(mut source) = self.source.take() {
      source.close();
    }
    self.capture = CaptureState::Stopped;
    info!("采集已停止");
    true
  }

  pub fn select_detector(&mut self, kind: DetectorKind) -> Result<(), TransitionError> {
    if self.capture != CaptureState::Running {
      return Err(TransitionError::CaptureNotRunning);
    }

    // 先释放旧的检测器再构建新的
    self.detector = None;
    self.mode = DetectorMode::None;
    self.panel = ControlPanel::capturing();

    let config = self.configs[kind.index()];
    let detector = self
      .detectors
      .build_detector(&config)
      .map_err(|source| TransitionError::DetectorBuild { kind, source })?;

    info!("启用检测器: {}", kind.display_name());
    self.detector = Some(detector);
    self.mode = kind.into();
    self.panel = ControlPanel::detecting(kind);
    Ok(())
  }

  pub fn deselect_detector(&mut self) -> Result<(), TransitionError> {
    if self.capture != CaptureState::Running {
      return Err(TransitionError::CaptureNotRunning);
    }
    if let Some(kind) = self.mode.kind() {
      info!("关闭检测器: {}", kind.display_name());
    }
    self.detector = None;
    self.mode = DetectorMode::None;
    self.panel = ControlPanel::capturing();
    Ok(())
  }

  /// 从当前帧源读取一帧
  pub fn pull_frame(&mut self) -> FrameRead {
    match self.source.as_mut() {
      Some(source) => source.next_frame(),
      None => {
        warn!("没有打开的帧源");
        FrameRead::Lost("没有打开的帧源".to_string())
      }
    }
  }

  /// 用当前检测器处理一帧，未选检测器时返回 `None`
  pub fn detect(&self, frame: &Frame) -> Option<Result<(Frame, Detections), DetectError>> {
    self.detector.as_ref().map(|detector| detector.detect(frame))
  }
}
