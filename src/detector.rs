// 该文件是 Guanzhao （观照） 项目的一部分。
// src/detector.rs - 检测器
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

//! 三种检测器共用同一套流程：转为 RGB 的 CHW 张量、计时推理、叠加绘制、
//! 再还原为输入帧的通道顺序。三者只在绘制阶段不同。

use std::{
  str::FromStr,
  time::{Duration, Instant},
};

use image::imageops::{self, FilterType};
use thiserror::Error;
use tracing::{debug, info};

use crate::{
  frame::{Frame, FromRgbImage, ToRgbImage},
  model::{Annex, ChwTensor, DetectResult, Model, OutputLayout},
  output::draw::Draw,
};

pub use crate::output::draw::RenderReport;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DetectorKind {
  /// Faster R-CNN
  Box,
  /// Mask R-CNN
  BoxMask,
  /// Keypoint R-CNN
  Pose,
}

impl DetectorKind {
  /// 按界面上的排列顺序
  pub const ALL: [DetectorKind; 3] = [
    DetectorKind::BoxMask,
    DetectorKind::Box,
    DetectorKind::Pose,
  ];

  pub fn index(self) -> usize {
    match self {
      DetectorKind::BoxMask => 0,
      DetectorKind::Box => 1,
      DetectorKind::Pose => 2,
    }
  }

  pub fn default_threshold(self) -> f32 {
    match self {
      DetectorKind::Box | DetectorKind::BoxMask => 0.5,
      DetectorKind::Pose => 0.9,
    }
  }

  pub fn display_name(self) -> &'static str {
    match self {
      DetectorKind::Box => "Faster R-CNN",
      DetectorKind::BoxMask => "Mask R-CNN",
      DetectorKind::Pose => "Keypoint R-CNN",
    }
  }

  pub fn output_layout(self) -> OutputLayout {
    match self {
      DetectorKind::Box => OutputLayout::Boxes,
      DetectorKind::BoxMask => OutputLayout::BoxesMasks,
      DetectorKind::Pose => OutputLayout::BoxesKeypoints,
    }
  }
}

impl FromStr for DetectorKind {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "box" | "faster" | "faster-rcnn" => Ok(DetectorKind::Box),
      "mask" | "mask-rcnn" => Ok(DetectorKind::BoxMask),
      "pose" | "keypoint" | "keypoint-rcnn" => Ok(DetectorKind::Pose),
      other => Err(format!("未知的检测器: {}", other)),
    }
  }
}

/// 分类头。替换后的分类头只影响加载的模型文件与类别标签的显示。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClassHead {
  #[default]
  Pretrained,
  Replaced { num_classes: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorConfig {
  pub kind: DetectorKind,
  pub threshold: f32,
  pub head: ClassHead,
}

impl DetectorConfig {
  pub fn new(kind: DetectorKind) -> Self {
    Self {
      kind,
      threshold: kind.default_threshold(),
      head: ClassHead::default(),
    }
  }

  pub fn with_threshold(mut self, threshold: f32) -> Self {
    self.threshold = threshold;
    self
  }

  pub fn with_head(mut self, head: ClassHead) -> Self {
    self.head = head;
    self
  }
}

/// 一次检测的原始结果、耗时与实际绘制的内容
#[derive(Debug, Clone)]
pub struct Detections {
  pub result: DetectResult,
  pub elapsed: Duration,
  pub rendered: RenderReport,
}

impl Detections {
  pub fn fps(&self) -> f64 {
    fps(self.elapsed)
  }
}

fn fps(elapsed: Duration) -> f64 {
  let secs = elapsed.as_secs_f64();
  if secs > 0.0 { 1.0 / secs } else { 0.0 }
}

#[derive(Error, Debug)]
pub enum DetectError {
  #[error("模型推理错误: {0}")]
  Model(#[source] BoxError),
  #[error("空帧")]
  EmptyFrame,
  #[cfg(feature = "model_onnx")]
  #[error("模型加载错误: {0}")]
  Load(#[from] crate::model::RcnnOnnxError),
}

pub trait Detect {
  fn kind(&self) -> DetectorKind;

  /// 返回与输入尺寸、通道顺序相同的标注帧，以及本次检测结果
  fn detect(&self, frame: &Frame) -> Result<(Frame, Detections), DetectError>;
}

impl<D: Detect + ?Sized> Detect for Box<D> {
  fn kind(&self) -> DetectorKind {
    (**self).kind()
  }

  fn detect(&self, frame: &Frame) -> Result<(Frame, Detections), DetectError> {
    (**self).detect(frame)
  }
}

pub struct Detector<M> {
  config: DetectorConfig,
  model: M,
  input_size: Option<(u32, u32)>,
  draw: Draw<'static>,
}

impl<M> Detector<M> {
  pub fn new(config: DetectorConfig, model: M) -> Self {
    Self {
      config,
      model,
      input_size: None,
      draw: Draw::default(),
    }
  }

  /// 模型要求固定输入尺寸时，帧会先缩放到该尺寸，结果再换算回帧坐标
  pub fn with_input_size(mut self, width: u32, height: u32) -> Self {
    self.input_size = Some((width, height));
    self
  }

  pub fn config(&self) -> &DetectorConfig {
    &self.config
  }

  fn render(
    &self,
    image: &mut image::RgbImage,
    result: &DetectResult,
    elapsed: Duration,
  ) -> RenderReport {
    let threshold = self.config.threshold;
    let report = match self.config.kind {
      DetectorKind::Box => self.draw.boxes(image, result, threshold, false),
      DetectorKind::BoxMask => self.draw.boxes(image, result, threshold, true),
      DetectorKind::Pose => self.draw.pose(image, result, threshold),
    };
    self.draw.status(image, Some(report.people), fps(elapsed));
    report
  }
}

impl<M> Detect for Detector<M>
where
  M: Model<Input = ChwTensor, Output = DetectResult>,
  M::Error: std::error::Error + Send + Sync + 'static,
{
  fn kind(&self) -> DetectorKind {
    self.config.kind
  }

  fn detect(&self, frame: &Frame) -> Result<(Frame, Detections), DetectError> {
    let (width, height) = frame.dimensions();
    if width == 0 || height == 0 {
      return Err(DetectError::EmptyFrame);
    }

    let mut image = frame.to_rgb_image();
    let input = match self.input_size {
      Some((w, h)) if (w, h) != (width, height) => {
        let resized = imageops::resize(&image, w, h, FilterType::Triangle);
        ChwTensor::from(&Frame::from_rgb_image(&resized, crate::frame::ChannelOrder::Rgb))
      }
      _ => ChwTensor::from(frame),
    };
    let scale = (
      width as f32 / input.width as f32,
      height as f32 / input.height as f32,
    );

    let now = Instant::now();
    let mut result = self
      .model
      .infer(&input)
      .map_err(|e| DetectError::Model(Box::new(e)))?;
    let elapsed = now.elapsed();
    debug!(
      "{} 推理完成，耗时: {:.2?}，{} 个候选",
      self.config.kind.display_name(),
      elapsed,
      result.len()
    );

    if scale != (1.0, 1.0) {
      rescale(&mut result, scale.0, scale.1);
    }

    let rendered = self.render(&mut image, &result, elapsed);
    let annotated = Frame::from_rgb_image(&image, frame.order());

    Ok((
      annotated,
      Detections {
        result,
        elapsed,
        rendered,
      },
    ))
  }
}

fn rescale(result: &mut DetectResult, sx: f32, sy: f32) {
  for item in result.items.iter_mut() {
    item.bbox = [
      item.bbox[0] * sx,
      item.bbox[1] * sy,
      item.bbox[2] * sx,
      item.bbox[3] * sy,
    ];
    if let Annex::Keypoints(points) = &mut item.annex {
      for point in points.iter_mut() {
        point.x *= sx;
        point.y *= sy;
      }
    }
  }
}

/// 从 ONNX 模型文件构建检测器
#[cfg(feature = "model_onnx")]
pub fn onnx_detector(
  config: DetectorConfig,
  model: &url::Url,
) -> Result<Detector<crate::model::RcnnOnnx>, DetectError> {
  use crate::{FromUrl, model::RcnnOnnxBuilder};

  if let ClassHead::Replaced { num_classes } = config.head {
    info!(
      "{} 使用替换的分类头 ({} 类): {}",
      config.kind.display_name(),
      num_classes,
      model
    );
  }

  let model = RcnnOnnxBuilder::from_url(model)?
    .layout(config.kind.output_layout())
    .build()?;
  let (width, height) = model.input_size();
  info!("{} 已加载", config.kind.display_name());

  Ok(Detector::new(config, model).with_input_size(width, height))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    frame::ChannelOrder,
    model::{CocoCategory, DetectItem, Keypoint, WithLabel},
  };

  struct Canned(DetectResult);

  impl Model for Canned {
    type Input = ChwTensor;
    type Output = DetectResult;
    type Error = std::io::Error;

    fn infer(&self, _input: &ChwTensor) -> Result<DetectResult, std::io::Error> {
      Ok(self.0.clone())
    }
  }

  #[test]
  fn kinds_parse_and_order() {
    assert_eq!("mask".parse::<DetectorKind>(), Ok(DetectorKind::BoxMask));
    assert_eq!(" Pose ".parse::<DetectorKind>(), Ok(DetectorKind::Pose));
    assert!("yolo".parse::<DetectorKind>().is_err());
    for (i, kind) in DetectorKind::ALL.iter().enumerate() {
      assert_eq!(kind.index(), i);
    }
    assert_eq!(DetectorConfig::new(DetectorKind::Pose).threshold, 0.9);
  }

  #[test]
  fn resized_input_maps_back_to_frame() {
    let result = DetectResult::from(vec![DetectItem {
      kind: CocoCategory::from_label_id(1),
      score: 0.99,
      bbox: [10.0, 10.0, 20.0, 20.0],
      annex: Annex::Keypoints(
        vec![
          Keypoint {
            x: 5.0,
            y: 5.0,
            score: 1.0
          };
          17
        ]
        .into_boxed_slice(),
      ),
    }]);
    let detector = Detector::new(DetectorConfig::new(DetectorKind::Pose), Canned(result))
      .with_input_size(32, 24);
    let frame = Frame::filled(64, 48, ChannelOrder::Bgr, [0, 0, 0]);
    let (annotated, detections) = detector.detect(&frame).unwrap();
    assert_eq!(annotated.dimensions(), (64, 48));
    assert_eq!(annotated.order(), ChannelOrder::Bgr);
    let item = &detections.result.items[0];
    assert_eq!(item.bbox, [20.0, 20.0, 40.0, 40.0]);
    assert_eq!(
      item.keypoints().unwrap()[0],
      Keypoint {
        x: 10.0,
        y: 10.0,
        score: 1.0
      }
    );
  }

  #[test]
  fn fps_of_zero_elapsed_is_zero() {
    assert_eq!(fps(Duration::ZERO), 0.0);
    assert!((fps(Duration::from_millis(250)) - 4.0).abs() < 1e-9);
  }
}
