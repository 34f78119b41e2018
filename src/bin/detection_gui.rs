// 该文件是 Guanzhao （观照） 项目的一部分。
// src/bin/detection_gui.rs - 摄像头检测窗口
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
use tracing::info;

use guanzhao::{
  app::AppState,
  args::{DetectorArgs, SourceArgs},
  gui::DetectionApp,
  task::DisplayLoop,
};

/// Guanzhao 摄像头检测窗口
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  #[command(flatten)]
  pub source: SourceArgs,

  #[command(flatten)]
  pub detectors: DetectorArgs,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("输入来源: {}", args.source.input);

  let state = args
    .detectors
    .configs()
    .into_iter()
    .fold(
      AppState::new(
        args.source.source_factory(),
        args.detectors.detector_factory(),
      ),
      AppState::with_config,
    );
  let app = DetectionApp::new(state, DisplayLoop::new(args.source.interval()));

  let options = eframe::NativeOptions {
    viewport: egui::ViewportBuilder::default()
      .with_inner_size([860.0, 520.0])
      .with_title("观照"),
    ..Default::default()
  };

  eframe::run_native("观照", options, Box::new(|_cc| Ok(Box::new(app))))
    .map_err(|e| anyhow::anyhow!("窗口运行失败: {}", e))?;

  Ok(())
}
