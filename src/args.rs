// 该文件是 Guanzhao （观照） 项目的一部分。
// src/args.rs - 命令行参数
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

use std::time::Duration;

use clap::Args;
use url::Url;

use crate::{
  FromUrl,
  app::{DetectorFactory, SourceFactory},
  detector::{BoxError, ClassHead, DetectorConfig, DetectorKind},
  input::{FrameSource, InputWrapper},
};

/// 帧源与显示循环
#[derive(Args, Debug, Clone)]
pub struct SourceArgs {
  /// 输入来源，如 v4l://camera/0、gst://file/video.mp4、image:///a.png
  #[arg(long, value_name = "SOURCE", default_value = "v4l://camera/0")]
  pub input: Url,

  /// 显示循环间隔（毫秒）
  #[arg(long, value_name = "MS", default_value_t = 10)]
  pub interval_ms: u64,
}

impl SourceArgs {
  pub fn interval(&self) -> Duration {
    Duration::from_millis(self.interval_ms)
  }

  /// 每次开始采集都按 URL 重新打开帧源
  pub fn source_factory(&self) -> impl SourceFactory + 'static {
    let url = self.input.clone();
    move || -> Result<Box<dyn FrameSource>, BoxError> {
      let input = InputWrapper::from_url(&url)?;
      Ok(Box::new(input))
    }
  }
}

/// 三种检测器的模型与阈值
#[derive(Args, Debug, Clone)]
pub struct DetectorArgs {
  /// Faster R-CNN 模型，如 onnx:///models/fasterrcnn.onnx
  #[arg(long, value_name = "MODEL")]
  pub box_model: Option<Url>,

  /// Mask R-CNN 模型
  #[arg(long, value_name = "MODEL")]
  pub mask_model: Option<Url>,

  /// Keypoint R-CNN 模型
  #[arg(long, value_name = "MODEL")]
  pub pose_model: Option<Url>,

  /// 框检测置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value_t = 0.5, value_name = "THRESHOLD")]
  pub box_threshold: f32,

  /// 姿态检测置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value_t = 0.9, value_name = "THRESHOLD")]
  pub pose_threshold: f32,

  /// 模型使用替换后的分类头时的类别数
  #[arg(long, value_name = "N")]
  pub num_classes: Option<u32>,
}

impl DetectorArgs {
  pub fn model(&self, kind: DetectorKind) -> Option<&Url> {
    match kind {
      DetectorKind::Box => self.box_model.as_ref(),
      DetectorKind::BoxMask => self.mask_model.as_ref(),
      DetectorKind::Pose => self.pose_model.as_ref(),
    }
  }

  pub fn config(&self, kind: DetectorKind) -> DetectorConfig {
    let threshold = match kind {
      DetectorKind::Box | DetectorKind::BoxMask => self.box_threshold,
      DetectorKind::Pose => self.pose_threshold,
    };
    let head = match self.num_classes {
      Some(num_classes) => ClassHead::Replaced { num_classes },
      None => ClassHead::Pretrained,
    };
    DetectorConfig::new(kind)
      .with_threshold(threshold)
      .with_head(head)
  }

  pub fn configs(&self) -> [DetectorConfig; 3] {
    DetectorKind::ALL.map(|kind| self.config(kind))
  }

  #[cfg(feature = "model_onnx")]
  pub fn detector_factory(&self) -> impl DetectorFactory + 'static {
    use crate::detector::{Detect, onnx_detector};

    let args = self.clone();
    move |config: &DetectorConfig| -> Result<Box<dyn Detect>, BoxError> {
      let url = args
        .model(config.kind)
        .ok_or_else(|| format!("未指定 {} 模型", config.kind.display_name()))?;
      Ok(Box::new(onnx_detector(*config, url)?))
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use clap::Parser;

  #[derive(Parser)]
  struct Cli {
    #[command(flatten)]
    source: SourceArgs,
    #[command(flatten)]
    detectors: DetectorArgs,
  }

  #[test]
  fn defaults_follow_detector_kinds() {
    let cli = Cli::parse_from(["guanzhao", "--mask-model", "onnx:///m.onnx"]);
    assert_eq!(cli.source.input.as_str(), "v4l://camera/0");
    assert_eq!(cli.source.interval(), Duration::from_millis(10));
    assert!(cli.detectors.model(DetectorKind::Box).is_none());
    assert_eq!(
      cli.detectors.model(DetectorKind::BoxMask).map(Url::path),
      Some("/m.onnx")
    );
    let pose = cli.detectors.config(DetectorKind::Pose);
    assert_eq!(pose.threshold, 0.9);
    assert_eq!(pose.head, ClassHead::Pretrained);
  }

  #[test]
  fn num_classes_replaces_head() {
    let cli = Cli::parse_from(["guanzhao", "--num-classes", "3", "--box-threshold", "0.7"]);
    let config = cli.detectors.config(DetectorKind::Box);
    assert_eq!(config.head, ClassHead::Replaced { num_classes: 3 });
    assert_eq!(config.threshold, 0.7);
  }
}
