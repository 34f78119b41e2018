// 该文件是 Guanzhao （观照） 项目的一部分。
// tests/common/mod.rs - 测试用的帧源、模型与显示面
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

#![allow(dead_code)]

use std::{cell::RefCell, collections::VecDeque, convert::Infallible, rc::Rc};

use guanzhao::{
  detector::{BoxError, Detect, DetectorConfig, Detections, Detector},
  frame::{ChannelOrder, Frame},
  input::{FrameRead, FrameSource, SourceKind},
  model::{Annex, ChwTensor, CocoCategory, DetectItem, DetectResult, Keypoint, Model, WithLabel},
  output::DisplaySurface,
};
use image::RgbImage;

pub fn gray_frame(width: u32, height: u32) -> Frame {
  Frame::filled(width, height, ChannelOrder::Bgr, [90, 90, 90])
}

pub fn person(score: f32, bbox: [f32; 4], annex: Annex) -> DetectItem {
  DetectItem {
    kind: CocoCategory::from_label_id(1),
    score,
    bbox,
    annex,
  }
}

pub fn standing_pose(scores: [f32; 17]) -> Annex {
  let points = scores
    .iter()
    .enumerate()
    .map(|(i, &score)| Keypoint {
      x: 40.0 + (i % 4) as f32 * 12.0,
      y: 20.0 + i as f32 * 6.0,
      score,
    })
    .collect::<Vec<_>>();
  Annex::Keypoints(points.into_boxed_slice())
}

/// 返回预设结果的模型
pub struct CannedModel(pub DetectResult);

impl Model for CannedModel {
  type Input = ChwTensor;
  type Output = DetectResult;
  type Error = Infallible;

  fn infer(&self, _input: &ChwTensor) -> Result<DetectResult, Infallible> {
    Ok(self.0.clone())
  }
}

/// 始终失败的模型
pub struct BrokenModel;

impl Model for BrokenModel {
  type Input = ChwTensor;
  type Output = DetectResult;
  type Error = std::io::Error;

  fn infer(&self, input: &ChwTensor) -> Result<DetectResult, std::io::Error> {
    Err(std::io::Error::other(format!(
      "输入形状不匹配: {}x{}",
      input.width, input.height
    )))
  }
}

pub fn canned(config: DetectorConfig, items: Vec<DetectItem>) -> Box<dyn Detect> {
  Box::new(Detector::new(config, CannedModel(DetectResult::from(items))))
}

#[derive(Debug, Default)]
pub struct SourceProbe {
  pub opened: usize,
  pub closed: usize,
  pub reads: usize,
}

/// 按脚本返回读取结果，脚本读完后一直返回新帧
pub struct ScriptedSource {
  probe: Rc<RefCell<SourceProbe>>,
  script: VecDeque<FrameRead>,
  width: u32,
  height: u32,
  closed: bool,
}

impl FrameSource for ScriptedSource {
  fn kind(&self) -> SourceKind {
    SourceKind::Camera
  }

  fn next_frame(&mut self) -> FrameRead {
    if self.closed {
      return FrameRead::Lost("closed".to_string());
    }
    self.probe.borrow_mut().reads += 1;
    self
      .script
      .pop_front()
      .unwrap_or_else(|| FrameRead::Fresh(gray_frame(self.width, self.height)))
  }

  fn close(&mut self) {
    if !self.closed {
      self.closed = true;
      self.probe.borrow_mut().closed += 1;
    }
  }

  fn is_closed(&self) -> bool {
    self.closed
  }
}

pub fn scripted_sources(
  probe: &Rc<RefCell<SourceProbe>>,
  width: u32,
  height: u32,
  script: Vec<FrameRead>,
) -> impl FnMut() -> Result<Box<dyn FrameSource>, BoxError> + 'static {
  let probe = probe.clone();
  move || {
    probe.borrow_mut().opened += 1;
    Ok(Box::new(ScriptedSource {
      probe: probe.clone(),
      script: script.clone().into(),
      width,
      height,
      closed: false,
    }) as Box<dyn FrameSource>)
  }
}

/// 记录每次呈现的显示面
#[derive(Default)]
pub struct RecordingSurface {
  pub images: Vec<RgbImage>,
  pub detections: Vec<Option<Detections>>,
}

impl DisplaySurface for RecordingSurface {
  type Error = Infallible;

  fn present(
    &mut self,
    image: &RgbImage,
    detections: Option<&Detections>,
  ) -> Result<(), Self::Error> {
    self.images.push(image.clone());
    self.detections.push(detections.cloned());
    Ok(())
  }
}
