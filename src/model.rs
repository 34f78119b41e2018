// 该文件是 Guanzhao （观照） 项目的一部分。
// src/model.rs - 模型
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

use image::{GrayImage, Luma};

use crate::frame::Frame;

mod labels;
pub use self::labels::{COCO_CATEGORY_NAMES, CocoCategory, PERSON_CATEGORY};

#[cfg(feature = "model_onnx")]
mod rcnn;
#[cfg(feature = "model_onnx")]
pub use self::rcnn::{RcnnOnnx, RcnnOnnxBuilder, RcnnOnnxError};

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

impl<M: Model + ?Sized> Model for Box<M> {
  type Input = M::Input;
  type Output = M::Output;
  type Error = M::Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    (**self).infer(input)
  }
}

pub trait WithLabel: Sized + std::fmt::Debug {
  fn to_label_str(&self) -> String;
  fn from_label_id(id: u32) -> Self;
  fn to_label_id(&self) -> u32;
}

/// 模型输入：RGB 顺序、归一化到 [0, 1] 的 CHW 浮点张量
#[derive(Debug, Clone)]
pub struct ChwTensor {
  pub width: u32,
  pub height: u32,
  pub data: Vec<f32>,
}

impl From<&Frame> for ChwTensor {
  fn from(frame: &Frame) -> Self {
    ChwTensor {
      width: frame.width(),
      height: frame.height(),
      data: frame.to_chw_normalized(),
    }
  }
}

/// 模型输出的布局，对应三种 R-CNN 头
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputLayout {
  /// boxes, labels, scores
  Boxes,
  /// boxes, labels, scores, masks
  BoxesMasks,
  /// boxes, labels, scores, keypoints, keypoints_scores
  BoxesKeypoints,
}

/// 单个目标的逐像素前景概率
#[derive(Debug, Clone, PartialEq)]
pub struct ProbabilityMask {
  width: u32,
  height: u32,
  data: Box<[f32]>,
}

impl ProbabilityMask {
  pub fn new(width: u32, height: u32, data: Vec<f32>) -> Option<Self> {
    if data.len() != width as usize * height as usize {
      return None;
    }
    Some(Self {
      width,
      height,
      data: data.into_boxed_slice(),
    })
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  /// 二值化：概率大于 `threshold` 的像素置为 255
  pub fn binarize(&self, threshold: f32) -> GrayImage {
    let width = self.width as usize;
    GrayImage::from_fn(self.width, self.height, |x, y| {
      let p = self.data[y as usize * width + x as usize];
      Luma([if p > threshold { 255 } else { 0 }])
    })
  }
}

/// 关键点，`score` 为该点的置信度
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
  pub x: f32,
  pub y: f32,
  pub score: f32,
}

/// 随检测项附带的额外输出
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Annex {
  #[default]
  None,
  Mask(ProbabilityMask),
  Keypoints(Box<[Keypoint]>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectItem<T = CocoCategory> {
  pub kind: T,
  pub score: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]，像素坐标
  pub annex: Annex,
}

impl<T> DetectItem<T> {
  pub fn mask(&self) -> Option<&ProbabilityMask> {
    match &self.annex {
      Annex::Mask(mask) => Some(mask),
      _ => None,
    }
  }

  pub fn keypoints(&self) -> Option<&[Keypoint]> {
    match &self.annex {
      Annex::Keypoints(points) => Some(points),
      _ => None,
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectResult<T = CocoCategory> {
  pub items: Box<[DetectItem<T>]>,
}

impl<T> DetectResult<T> {
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn iter(&self) -> impl Iterator<Item = &DetectItem<T>> {
    self.items.iter()
  }

  /// 置信度不低于 `threshold` 的检测项
  pub fn above(&self, threshold: f32) -> impl Iterator<Item = &DetectItem<T>> {
    self.items.iter().filter(move |item| item.score >= threshold)
  }
}

impl<T> From<Vec<DetectItem<T>>> for DetectResult<T> {
  fn from(items: Vec<DetectItem<T>>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn mask_binarizes_strictly_above_threshold() {
    let mask = ProbabilityMask::new(3, 1, vec![0.2, 0.5, 0.9]).unwrap();
    let gray = mask.binarize(0.5);
    assert_eq!(gray.as_raw(), &vec![0, 0, 255]);
    assert!(ProbabilityMask::new(2, 2, vec![0.0; 3]).is_none());
  }

  #[test]
  fn above_keeps_threshold_inclusive() {
    let item = |score| DetectItem {
      kind: CocoCategory::from_label_id(1),
      score,
      bbox: [0.0; 4],
      annex: Annex::None,
    };
    let result = DetectResult::from(vec![item(0.49), item(0.5), item(0.8)]);
    assert_eq!(result.above(0.5).count(), 2);
    assert_eq!(result.len(), 3);
  }
}
