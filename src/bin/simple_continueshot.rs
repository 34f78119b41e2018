// 该文件是 Guanzhao （观照） 项目的一部分。
// src/bin/simple_continueshot.rs - 无界面连续检测
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
  app::{AppState, Control},
  args::{DetectorArgs, SourceArgs},
  detector::DetectorKind,
  output::OutputWrapper,
  task::{Command, ContinuousTask, install_interrupt, spawn_stdin_commands},
};
use tracing::info;

/// Guanzhao 无界面连续检测
///
/// 运行时可在标准输入中输入命令：`camera on|off`、`box|mask|pose on|off`、`quit`
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  #[command(flatten)]
  pub source: SourceArgs,

  #[command(flatten)]
  pub detectors: DetectorArgs,

  /// 输出，如 gstdisplay://、folder:///tmp/record?always、image:///tmp/last.png
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,

  /// 启动后立即启用的检测器
  #[arg(long, value_name = "KIND")]
  pub detector: Option<DetectorKind>,

  /// 呈现指定帧数后退出
  #[arg(long, value_name = "FRAME_NUMBER")]
  pub frame_number: Option<usize>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("输入来源: {}", args.source.input);
  info!("输出路径: {}", args.output);

  let mut output = OutputWrapper::from_url(&args.output)?;
  let mut state = args.detectors.configs().into_iter().fold(
    AppState::new(
      args.source.source_factory(),
      args.detectors.detector_factory(),
    ),
    AppState::with_config,
  );

  let (tx, rx) = std::sync::mpsc::channel();
  install_interrupt(tx.clone())?;
  spawn_stdin_commands(tx.clone());

  if let Some(kind) = args.detector {
    // 采集开始后再启用
    tx.send(Command::Press(Control::DetectorOn(kind)))?;
  }
  drop(tx);

  ContinuousTask::default()
    .with_interval(args.source.interval())
    .with_frame_number(args.frame_number)
    .with_start_capture(true)
    .run_task(&mut state, &mut output, rx)?;

  Ok(())
}
