// 该文件是 Guanzhao （观照） 项目的一部分。
// src/model/rcnn.rs - R-CNN 系列 ONNX 模型
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

//! torchvision 导出的 Faster / Mask / Keypoint R-CNN ONNX 模型。
//!
//! 模型输入为单张 `[3, H, W]`（或 `batched` 时 `[1, 3, H, W]`）的 RGB 浮点张量，
//! 输出依次为 `boxes`、`labels`、`scores`，以及可选的 `masks` 或
//! `keypoints`、`keypoints_scores`。

use std::{collections::HashMap, sync::Mutex};

use ndarray::{ArrayD, IxDyn};
use ort::{
  session::{Session, SessionOutputs, builder::GraphOptimizationLevel},
  value::TensorRef,
};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{
    Annex, ChwTensor, CocoCategory, DetectItem, DetectResult, Keypoint, Model, OutputLayout,
    ProbabilityMask, WithLabel,
  },
};

const DEFAULT_INPUT_W: u32 = 640;
const DEFAULT_INPUT_H: u32 = 480;
const KEYPOINT_COUNT: usize = 17;

#[derive(Error, Debug)]
pub enum RcnnOnnxError {
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("模型加载错误: {0}")]
  ModelLoadError(String),
  #[error("输入尺寸不匹配: 模型 {expected:?}, 实际 {actual:?}")]
  InputShape {
    expected: (u32, u32),
    actual: (u32, u32),
  },
  #[error("推理错误: {0}")]
  RuntimeError(String),
  #[error("缺少第 {0} 个输出")]
  OutputMissing(usize),
  #[error("输出形状错误: {0}")]
  OutputShape(String),
}

fn ort_error(wrap: fn(String) -> RcnnOnnxError) -> impl Fn(ort::Error) -> RcnnOnnxError {
  move |e| wrap(e.to_string())
}

pub struct RcnnOnnxBuilder {
  model_path: String,
  width: u32,
  height: u32,
  batched: bool,
  layout: OutputLayout,
}

impl FromUrlWithScheme for RcnnOnnxBuilder {
  const SCHEME: &'static str = "onnx";
}

impl FromUrl for RcnnOnnxBuilder {
  type Error = RcnnOnnxError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(RcnnOnnxError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let query: HashMap<String, String> = url
      .query_pairs()
      .map(|(k, v)| (String::from(k), String::from(v)))
      .collect();

    Ok(RcnnOnnxBuilder {
      model_path: url.path().to_string(),
      width: query
        .get("width")
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_INPUT_W),
      height: query
        .get("height")
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_INPUT_H),
      batched: query.contains_key("batched"),
      layout: OutputLayout::Boxes,
    })
  }
}

impl RcnnOnnxBuilder {
  pub fn layout(mut self, layout: OutputLayout) -> Self {
    self.layout = layout;
    self
  }

  pub fn input_size(mut self, width: u32, height: u32) -> Self {
    self.width = width;
    self.height = height;
    self
  }

  pub fn build(self) -> Result<RcnnOnnx, RcnnOnnxError> {
    info!("加载模型文件: {}", self.model_path);

    let session = Session::builder()
      .map_err(ort_error(RcnnOnnxError::ModelLoadError))?
      .with_optimization_level(GraphOptimizationLevel::Level3)
      .map_err(ort_error(RcnnOnnxError::ModelLoadError))?
      .commit_from_file(&self.model_path)
      .map_err(ort_error(RcnnOnnxError::ModelLoadError))?;

    let shape = if self.batched {
      vec![1, 3, self.height as usize, self.width as usize]
    } else {
      vec![3, self.height as usize, self.width as usize]
    };

    info!(
      "模型加载完成: {}x{} {:?}，{} 个输出",
      self.width,
      self.height,
      self.layout,
      session.outputs.len()
    );

    Ok(RcnnOnnx {
      session: Mutex::new(session),
      width: self.width,
      height: self.height,
      shape,
      layout: self.layout,
    })
  }
}

/// `Session::run` 需要 `&mut`，会话放在互斥锁中
pub struct RcnnOnnx {
  session: Mutex<Session>,
  width: u32,
  height: u32,
  shape: Vec<usize>,
  layout: OutputLayout,
}

impl RcnnOnnx {
  pub fn input_size(&self) -> (u32, u32) {
    (self.width, self.height)
  }
}

impl Model for RcnnOnnx {
  type Input = ChwTensor;
  type Output = DetectResult;
  type Error = RcnnOnnxError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    if (input.width, input.height) != (self.width, self.height) {
      return Err(RcnnOnnxError::InputShape {
        expected: (self.width, self.height),
        actual: (input.width, input.height),
      });
    }

    debug!("设置模型输入");
    let array = ArrayD::from_shape_vec(IxDyn(&self.shape), input.data.clone())
      .map_err(|e| RcnnOnnxError::RuntimeError(e.to_string()))?;
    let tensor =
      TensorRef::from_array_view(&array).map_err(ort_error(RcnnOnnxError::RuntimeError))?;

    debug!("执行模型推理");
    let mut session = self
      .session
      .lock()
      .map_err(|_| RcnnOnnxError::RuntimeError("模型会话锁已损坏".to_string()))?;
    let outputs = session
      .run(ort::inputs![tensor])
      .map_err(ort_error(RcnnOnnxError::RuntimeError))?;

    let outputs = RcnnOutputs::extract(&outputs, self.layout)?;
    postprocess(&outputs, self.layout)
  }
}

/// 从会话输出中复制出的张量，按 boxes、labels、scores 及附加输出排列
struct RcnnOutputs {
  boxes: ArrayD<f32>,
  labels: ArrayD<i64>,
  scores: ArrayD<f32>,
  extra: Vec<ArrayD<f32>>,
}

impl RcnnOutputs {
  fn extract(outputs: &SessionOutputs, layout: OutputLayout) -> Result<Self, RcnnOnnxError> {
    let extra_count = match layout {
      OutputLayout::Boxes => 0,
      OutputLayout::BoxesMasks => 1,
      OutputLayout::BoxesKeypoints => 2,
    };
    if outputs.len() < 3 + extra_count {
      return Err(RcnnOnnxError::OutputMissing(outputs.len()));
    }

    let f32_output = |idx: usize| -> Result<ArrayD<f32>, RcnnOnnxError> {
      Ok(
        outputs[idx]
          .try_extract_array::<f32>()
          .map_err(ort_error(RcnnOnnxError::OutputShape))?
          .into_owned(),
      )
    };

    Ok(RcnnOutputs {
      boxes: f32_output(0)?,
      labels: outputs[1]
        .try_extract_array::<i64>()
        .map_err(ort_error(RcnnOnnxError::OutputShape))?
        .into_owned(),
      scores: f32_output(2)?,
      extra: (3..3 + extra_count)
        .map(&f32_output)
        .collect::<Result<_, _>>()?,
    })
  }

  fn extra(&self, idx: usize) -> Result<&ArrayD<f32>, RcnnOnnxError> {
    self
      .extra
      .get(idx)
      .ok_or(RcnnOnnxError::OutputMissing(idx + 3))
  }
}

fn contiguous<T>(array: &ArrayD<T>) -> Result<&[T], RcnnOnnxError> {
  array
    .as_slice()
    .ok_or_else(|| RcnnOnnxError::OutputShape(format!("非连续输出 {:?}", array.shape())))
}

fn postprocess(outputs: &RcnnOutputs, layout: OutputLayout) -> Result<DetectResult, RcnnOnnxError> {
  let boxes = contiguous(&outputs.boxes)?;
  let labels = contiguous(&outputs.labels)?;
  let scores = contiguous(&outputs.scores)?;

  let count = scores.len();
  if boxes.len() != count * 4 || labels.len() != count {
    return Err(RcnnOnnxError::OutputShape(format!(
      "boxes {} / labels {} / scores {}",
      boxes.len(),
      labels.len(),
      count
    )));
  }

  let mut annexes = match layout {
    OutputLayout::Boxes => vec![Annex::None; count],
    OutputLayout::BoxesMasks => masks(outputs.extra(0)?, count)?,
    OutputLayout::BoxesKeypoints => keypoints(outputs.extra(0)?, outputs.extra(1)?, count)?,
  };

  let items = (0..count)
    .map(|i| DetectItem {
      kind: CocoCategory::from_label_id(labels[i].max(0) as u32),
      score: scores[i],
      bbox: [
        boxes[i * 4],
        boxes[i * 4 + 1],
        boxes[i * 4 + 2],
        boxes[i * 4 + 3],
      ],
      annex: std::mem::take(&mut annexes[i]),
    })
    .collect::<Vec<_>>();

  debug!("检测到 {} 个物体", items.len());
  Ok(DetectResult::from(items))
}

// masks: [N, 1, H, W]
fn masks(tensor: &ArrayD<f32>, count: usize) -> Result<Vec<Annex>, RcnnOnnxError> {
  let shape = tensor.shape();
  if count == 0 {
    return Ok(Vec::new());
  }
  if shape.len() != 4 || shape[0] != count || shape[1] != 1 {
    return Err(RcnnOnnxError::OutputShape(format!("masks {:?}", shape)));
  }
  let (height, width) = (shape[2], shape[3]);
  let data = contiguous(tensor)?;
  let plane = width * height;

  data
    .chunks_exact(plane)
    .map(|chunk| {
      ProbabilityMask::new(width as u32, height as u32, chunk.to_vec())
        .map(Annex::Mask)
        .ok_or_else(|| RcnnOnnxError::OutputShape(format!("masks {:?}", shape)))
    })
    .collect()
}

// keypoints: [N, 17, 3]，keypoints_scores: [N, 17]
fn keypoints(
  points: &ArrayD<f32>,
  scores: &ArrayD<f32>,
  count: usize,
) -> Result<Vec<Annex>, RcnnOnnxError> {
  let points = contiguous(points)?;
  let scores = contiguous(scores)?;
  if points.len() != count * KEYPOINT_COUNT * 3 || scores.len() != count * KEYPOINT_COUNT {
    return Err(RcnnOnnxError::OutputShape(format!(
      "keypoints {} / keypoints_scores {}",
      points.len(),
      scores.len()
    )));
  }

  Ok(
    (0..count)
      .map(|i| {
        let person = (0..KEYPOINT_COUNT)
          .map(|k| {
            let base = (i * KEYPOINT_COUNT + k) * 3;
            Keypoint {
              x: points[base],
              y: points[base + 1],
              score: scores[i * KEYPOINT_COUNT + k],
            }
          })
          .collect::<Vec<_>>();
        Annex::Keypoints(person.into_boxed_slice())
      })
      .collect(),
  )
}

#[cfg(test)]
mod tests {
  use super::*;

  fn array(shape: &[usize], data: &[f32]) -> ArrayD<f32> {
    ArrayD::from_shape_vec(IxDyn(shape), data.to_vec()).unwrap()
  }

  fn outputs(
    boxes: ArrayD<f32>,
    labels: &[i64],
    scores: &[f32],
    extra: Vec<ArrayD<f32>>,
  ) -> RcnnOutputs {
    RcnnOutputs {
      boxes,
      labels: ArrayD::from_shape_vec(IxDyn(&[labels.len()]), labels.to_vec()).unwrap(),
      scores: array(&[scores.len()], scores),
      extra,
    }
  }

  #[test]
  fn boxes_layout_decodes_items() {
    let outputs = outputs(
      array(&[2, 4], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]),
      &[1, 3],
      &[0.9, 0.4],
      vec![],
    );
    let result = postprocess(&outputs, OutputLayout::Boxes).unwrap();
    assert_eq!(result.len(), 2);
    assert!(result.items[0].kind.is_person());
    assert_eq!(result.items[1].bbox, [5.0, 6.0, 7.0, 8.0]);
    assert_eq!(result.items[1].annex, Annex::None);
  }

  #[test]
  fn keypoint_layout_attaches_scores() {
    let points = (0..KEYPOINT_COUNT * 3).map(|v| v as f32).collect::<Vec<_>>();
    let scores = (0..KEYPOINT_COUNT).map(|v| v as f32 - 1.0).collect::<Vec<_>>();
    let outputs = outputs(
      array(&[1, 4], &[0.0, 0.0, 10.0, 10.0]),
      &[1],
      &[0.95],
      vec![
        array(&[1, KEYPOINT_COUNT, 3], &points),
        array(&[1, KEYPOINT_COUNT], &scores),
      ],
    );
    let result = postprocess(&outputs, OutputLayout::BoxesKeypoints).unwrap();
    let kps = result.items[0].keypoints().unwrap();
    assert_eq!(kps.len(), KEYPOINT_COUNT);
    assert_eq!(
      kps[1],
      Keypoint {
        x: 3.0,
        y: 4.0,
        score: 0.0
      }
    );
    assert!(kps[0].score < 0.0);
  }

  #[test]
  fn mask_layout_splits_planes() {
    let outputs = outputs(
      array(&[2, 4], &[0.0, 0.0, 2.0, 1.0, 1.0, 0.0, 2.0, 1.0]),
      &[1, 1],
      &[0.8, 0.6],
      vec![array(&[2, 1, 1, 2], &[0.1, 0.9, 0.7, 0.3])],
    );
    let result = postprocess(&outputs, OutputLayout::BoxesMasks).unwrap();
    let second = result.items[1].mask().unwrap();
    assert_eq!((second.width(), second.height()), (2, 1));
    assert_eq!(second.binarize(0.5).as_raw(), &vec![255, 0]);
  }

  #[test]
  fn missing_mask_output_is_an_error() {
    let outputs = outputs(array(&[1, 4], &[0.0, 0.0, 1.0, 1.0]), &[1], &[0.7], vec![]);
    assert!(matches!(
      postprocess(&outputs, OutputLayout::BoxesMasks),
      Err(RcnnOnnxError::OutputMissing(3))
    ));
  }

  #[test]
  fn url_sets_input_size() {
    let url = Url::parse("onnx:///models/maskrcnn.onnx?width=320&height=240&batched").unwrap();
    let builder = RcnnOnnxBuilder::from_url(&url).unwrap();
    assert_eq!(builder.model_path, "/models/maskrcnn.onnx");
    assert_eq!((builder.width, builder.height), (320, 240));
    assert!(builder.batched);
  }

  #[test]
  fn missing_model_file_fails_to_load() {
    let url = Url::parse("onnx:///nonexistent/guanzhao/fasterrcnn.onnx").unwrap();
    let result = RcnnOnnxBuilder::from_url(&url).unwrap().build();
    assert!(matches!(result, Err(RcnnOnnxError::ModelLoadError(_))));
  }

  /// 设置 `GUANZHAO_RCNN_MODEL=onnx:///path/maskrcnn.onnx?width=..&height=..`
  /// 与 `GUANZHAO_RCNN_LAYOUT=box|mask|pose` 后加载真实模型并推理一张空白图
  #[test]
  fn loads_exported_model_from_env() {
    let Ok(model) = std::env::var("GUANZHAO_RCNN_MODEL") else {
      return;
    };
    let layout = match std::env::var("GUANZHAO_RCNN_LAYOUT").as_deref() {
      Ok("mask") => OutputLayout::BoxesMasks,
      Ok("pose") => OutputLayout::BoxesKeypoints,
      _ => OutputLayout::Boxes,
    };
    let url = Url::parse(&model).unwrap();
    let model = RcnnOnnxBuilder::from_url(&url)
      .unwrap()
      .layout(layout)
      .build()
      .unwrap();

    let (width, height) = model.input_size();
    let input = ChwTensor {
      width,
      height,
      data: vec![0.5; 3 * width as usize * height as usize],
    };
    let result = model.infer(&input).unwrap();
    assert!(result.iter().all(|item| item.score >= 0.0 && item.score <= 1.0));
  }
}
