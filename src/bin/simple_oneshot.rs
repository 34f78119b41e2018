// 该文件是 Guanzhao （观照） 项目的一部分。
// src/bin/simple_oneshot.rs - 对单张图片运行一次检测
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

use anyhow::Result;
use clap::Parser;
use url::Url;

use guanzhao::{
  FromUrl,
  detector::{Detect, DetectorConfig, DetectorKind, onnx_detector},
  frame::ToRgbImage,
  input::{FrameSource, ImageFileInput},
  model::WithLabel,
  output::{DisplaySurface, SaveImageFileOutput},
};
use tracing::info;

/// Guanzhao 单张图片检测
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// ONNX 模型文件路径
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 检测器种类：box、mask 或 pose
  #[arg(long, value_name = "KIND", default_value = "box")]
  pub kind: DetectorKind,
  /// 置信度阈值，缺省时按检测器种类取值
  #[arg(long, value_name = "THRESHOLD")]
  pub threshold: Option<f32>,
  /// 输入图片
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出图片
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型文件路径: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let mut config = DetectorConfig::new(args.kind);
  if let Some(threshold) = args.threshold {
    config = config.with_threshold(threshold);
  }

  let mut input = ImageFileInput::from_url(&args.input)?;
  let detector = onnx_detector(config, &args.model)?;
  let mut output = SaveImageFileOutput::from_url(&args.output)?;

  let frame = input
    .next_frame()
    .into_frame()
    .ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
  input.close();

  info!("输入帧获取成功，开始推理...");
  let (annotated, detections) = detector.detect(&frame)?;
  info!(
    "推理完成，耗时: {:.2?}，绘制 {} 个框，{} 人",
    detections.elapsed, detections.rendered.boxes, detections.rendered.people
  );
  for item in detections.result.above(config.threshold) {
    info!(
      "{} {:.3} {:?}",
      item.kind.to_label_str(),
      item.score,
      item.bbox
    );
  }

  // 保持原图尺寸保存
  output.present(&annotated.to_rgb_image(), Some(&detections))?;

  Ok(())
}
