// 该文件是 Guanzhao （观照） 项目的一部分。
// src/task.rs - 显示循环与任务
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
  fmt::Display,
  io::BufRead,
  str::FromStr,
  sync::mpsc::{Receiver, RecvTimeoutError, Sender, TryRecvError},
  thread,
  time::{Duration, Instant},
};

use tracing::{debug, error, info, warn};

use crate::{
  app::{AppState, CaptureState, Control},
  detector::DetectorKind,
  input::FrameRead,
  output::{DisplaySurface, fit_to_display},
};

pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
  /// 在给定延迟后再次调用
  Continue(Duration),
  /// 不再有后续步骤
  Halted,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
  pub steps: usize,
  pub presented: usize,
  pub reused: usize,
  pub missing: usize,
  pub detect_failures: usize,
  pub present_failures: usize,
}

/// 读帧、检测、呈现的单步循环
#[derive(Debug)]
pub struct DisplayLoop {
  interval: Duration,
  stats: LoopStats,
  // 流结束或设备丢失只提示一次
  reported_gone: bool,
}

impl Default for DisplayLoop {
  fn default() -> Self {
    Self::new(DEFAULT_INTERVAL)
  }
}

impl DisplayLoop {
  pub fn new(interval: Duration) -> Self {
    Self {
      interval,
      stats: LoopStats::default(),
      reported_gone: false,
    }
  }

  pub fn interval(&self) -> Duration {
    self.interval
  }

  pub fn stats(&self) -> &LoopStats {
    &self.stats
  }

  pub fn step<S>(&mut self, app: &mut AppState, surface: &mut S) -> StepOutcome
  where
    S: DisplaySurface + ?Sized,
    S::Error: Display,
  {
    match app.capture_state() {
      CaptureState::Draining => {
        app.finish_stop();
        self.reported_gone = false;
        return StepOutcome::Halted;
      }
      CaptureState::Stopped => return StepOutcome::Halted,
      CaptureState::Running => {}
    }

    self.stats.steps += 1;

    let frame = match app.pull_frame() {
      FrameRead::Fresh(frame) => {
        self.reported_gone = false;
        frame
      }
      FrameRead::Reused(frame) => {
        self.stats.reused += 1;
        debug!("读帧失败，沿用上一帧");
        frame
      }
      FrameRead::Missing => {
        self.stats.missing += 1;
        return self.next();
      }
      FrameRead::Ended => {
        if !self.reported_gone {
          warn!("视频已播放完毕");
          self.reported_gone = true;
        }
        return self.next();
      }
      FrameRead::Lost(reason) => {
        if !self.reported_gone {
          error!("帧源已丢失: {}", reason);
          self.reported_gone = true;
        }
        return self.next();
      }
    };

    let (frame, detections) = match app.detect(&frame) {
      None => (frame, None),
      Some(Ok((annotated, detections))) => (annotated, Some(detections)),
      Some(Err(e)) => {
        self.stats.detect_failures += 1;
        error!("检测失败，显示原始画面: {}", e);
        (frame, None)
      }
    };

    let image = fit_to_display(&frame);
    match surface.present(&image, detections.as_ref()) {
      Ok(()) => self.stats.presented += 1,
      Err(e) => {
        self.stats.present_failures += 1;
        error!("显示失败: {}", e);
      }
    }

    self.next()
  }

  fn next(&self) -> StepOutcome {
    StepOutcome::Continue(self.interval)
  }
}

/// 无界面运行时的控制命令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
  Press(Control),
  Quit,
}

impl FromStr for Command {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let words = s.split_whitespace().collect::<Vec<_>>();
    match words.as_slice() {
      ["quit"] | ["q"] | ["exit"] => Ok(Command::Quit),
      ["camera", "on"] => Ok(Command::Press(Control::CameraOn)),
      ["camera", "off"] => Ok(Command::Press(Control::CameraOff)),
      [kind, switch] => {
        let kind: DetectorKind = kind.parse()?;
        match *switch {
          "on" => Ok(Command::Press(Control::DetectorOn(kind))),
          "off" => Ok(Command::Press(Control::DetectorOff(kind))),
          other => Err(format!("未知的开关: {}", other)),
        }
      }
      _ => Err(format!("无法识别的命令: {}", s.trim())),
    }
  }
}

/// 从标准输入逐行读取命令
pub fn spawn_stdin_commands(tx: Sender<Command>) -> thread::JoinHandle<()> {
  thread::spawn(move || {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
      let Ok(line) = line else {
        break;
      };
      if line.trim().is_empty() {
        continue;
      }
      match line.parse::<Command>() {
        Ok(command) => {
          if tx.send(command).is_err() {
            break;
          }
        }
        Err(e) => warn!("{}", e),
      }
    }
  })
}

/// Ctrl-C 转为退出命令，30 秒内未退出则强制结束进程
pub fn install_interrupt(tx: Sender<Command>) -> anyhow::Result<()> {
  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    let _ = tx.send(Command::Quit);
    thread::spawn(|| {
      thread::sleep(Duration::from_secs(30));
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })?;
  Ok(())
}

/// 无界面连续运行：按命令切换状态，按间隔调用显示循环
#[derive(Debug, Default)]
pub struct ContinuousTask {
  display: DisplayLoop,
  frame_number: Option<usize>,
  start_capture: bool,
}

impl ContinuousTask {
  pub fn with_interval(mut self, interval: Duration) -> Self {
    self.display = DisplayLoop::new(interval);
    self
  }

  /// 呈现指定帧数后停止采集并退出
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }

  /// 启动后立即打开帧源
  pub fn with_start_capture(mut self, start: bool) -> Self {
    self.start_capture = start;
    self
  }

  pub fn run_task<S>(
    mut self,
    app: &mut AppState,
    surface: &mut S,
    commands: Receiver<Command>,
  ) -> anyhow::Result<LoopStats>
  where
    S: DisplaySurface + ?Sized,
    S::Error: Display,
  {
    info!("开始任务...");
    if self.start_capture {
      app.start_capture()?;
    }

    let mut quitting = false;
    let mut next_step = Instant::now();

    loop {
      loop {
        match commands.try_recv() {
          Ok(command) => quitting |= apply(app, command),
          Err(TryRecvError::Empty) => break,
          Err(TryRecvError::Disconnected) => {
            if !quitting {
              info!("命令通道已关闭，退出");
            }
            quitting = true;
            app.stop_capture();
            break;
          }
        }
      }

      if let Some(n) = self.frame_number
        && self.display.stats().presented >= n
        && app.is_running()
      {
        info!("达到指定帧数 {}, 退出任务循环", n);
        app.stop_capture();
        quitting = true;
      }

      let now = Instant::now();
      if now < next_step && app.is_running() {
        thread::sleep(next_step - now);
      }

      match self.display.step(app, surface) {
        StepOutcome::Continue(delay) => next_step = Instant::now() + delay,
        StepOutcome::Halted if quitting => break,
        StepOutcome::Halted => {
          // 采集已停止，等待下一条命令
          match commands.recv_timeout(Duration::from_millis(100)) {
            Ok(command) => quitting |= apply(app, command),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
          }
        }
      }
    }

    let stats = *self.display.stats();
    info!(
      "任务完成，退出: 共 {} 步，呈现 {} 帧",
      stats.steps, stats.presented
    );
    Ok(stats)
  }
}

fn apply(app: &mut AppState, command: Command) -> bool {
  match command {
    Command::Quit => {
      app.stop_capture();
      true
    }
    Command::Press(control) => {
      if let Err(e) = app.press(control) {
        warn!("{}", e);
      }
      false
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn commands_parse() {
    assert_eq!("quit".parse::<Command>(), Ok(Command::Quit));
    assert_eq!(
      "camera on".parse::<Command>(),
      Ok(Command::Press(Control::CameraOn))
    );
    assert_eq!(
      " mask  off ".parse::<Command>(),
      Ok(Command::Press(Control::DetectorOff(DetectorKind::BoxMask)))
    );
    assert_eq!(
      "pose on".parse::<Command>(),
      Ok(Command::Press(Control::DetectorOn(DetectorKind::Pose)))
    );
    assert!("pose maybe".parse::<Command>().is_err());
    assert!("camera".parse::<Command>().is_err());
  }
}
