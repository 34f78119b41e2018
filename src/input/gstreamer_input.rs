// 该文件是 Guanzhao （观照） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 输入
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

//! # GStreamer 视频输入模块
//!
//! 通过 GStreamer 管道读取视频文件或摄像头，appsink 输出 BGR 帧。
//!
//! ## URL 格式
//!
//! - `gst://file/path/to/video.mp4` 视频文件
//! - `gst://camera/dev/video0?width=640&height=480&fps=30` 摄像头
//!
//! 可选参数 `rotate=90|180|270` 用于旋转画面。
//!
//! ## 系统依赖
//!
//! **Ubuntu/Debian:**
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev
//! ```

use std::collections::HashMap;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{ChannelOrder, Frame},
  input::{CaptureFailure, FrameRead, FrameSource, LastFrame, SourceKind, settle_stream},
};

/// GStreamer 输入错误类型
#[derive(Error, Debug)]
pub enum GStreamerInputError {
  /// URI scheme 不匹配（期望 "gst://"）
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  /// GStreamer 库错误
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  /// GStreamer 布尔操作错误
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  /// 无法获取 appsink 元素
  #[error("Failed to get appsink element")]
  AppSinkNotFound,
  /// 无法转换元素为 appsink
  #[error("Failed to convert element to appsink")]
  AppSinkConversionFailed,
  /// 管道错误
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  /// 状态改变错误
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
}

const DEFAULT_CAMERA_WIDTH: u32 = 640;
const DEFAULT_CAMERA_HEIGHT: u32 = 480;
const DEFAULT_CAMERA_FPS: u32 = 30;
const PULL_TIMEOUT_MS: u64 = 200;

pub enum GStreamerInputBuilderItem {
  FileSource(String),
  CameraSource {
    camera: String,
    width: u32,
    height: u32,
    fps: u32,
  },
  TargetFormat {
    format: String,
  },
  VideoFlip {
    method: u32,
  },
}

impl GStreamerInputBuilderItem {
  fn to_pipeline(&self) -> String {
    match self {
      GStreamerInputBuilderItem::FileSource(path) => {
        format!("filesrc location={} ! decodebin", path)
      }
      GStreamerInputBuilderItem::CameraSource {
        camera,
        width,
        height,
        fps,
      } => format!(
        "v4l2src device={} ! videoconvert ! video/x-raw,width={},height={},framerate={}/1",
        camera, width, height, fps
      ),
      GStreamerInputBuilderItem::TargetFormat { format } => {
        format!("videoconvert ! video/x-raw,format={}", format)
      }
      GStreamerInputBuilderItem::VideoFlip { method } => {
        format!("videoflip method={}", method)
      }
    }
  }
}

/// GStreamer 输入管道构建器
pub struct GStreamerInputPipelineBuilder {
  kind: SourceKind,
  items: Vec<GStreamerInputBuilderItem>,
}

impl GStreamerInputPipelineBuilder {
  pub fn file(path: &str) -> Self {
    Self {
      kind: SourceKind::VideoFile,
      items: vec![GStreamerInputBuilderItem::FileSource(path.to_string())],
    }
  }

  pub fn camera(device: &str, width: u32, height: u32, fps: u32) -> Self {
    Self {
      kind: SourceKind::Camera,
      items: vec![GStreamerInputBuilderItem::CameraSource {
        camera: device.to_string(),
        width,
        height,
        fps,
      }],
    }
  }

  pub fn rotate(mut self, degrees: &str) -> Self {
    let method = match degrees {
      "90" => 1,
      "180" => 2,
      "270" => 3,
      _ => return self,
    };
    self
      .items
      .push(GStreamerInputBuilderItem::VideoFlip { method });
    self
  }

  pub fn pipeline_description(&self) -> String {
    let basic_pipeline = self
      .items
      .iter()
      .map(GStreamerInputBuilderItem::to_pipeline)
      .collect::<Vec<String>>()
      .join(" ! ");
    let target = GStreamerInputBuilderItem::TargetFormat {
      format: "BGR".to_string(),
    };
    format!(
      "{} ! {} ! appsink max-buffers=2 drop=true name=sink",
      basic_pipeline,
      target.to_pipeline()
    )
  }

  pub fn build(self) -> Result<GStreamerInput, GStreamerInputError> {
    let full_pipeline = self.pipeline_description();
    info!("GStreamer pipeline description: {}", full_pipeline);
    GStreamerInput::launch(self.kind, &full_pipeline)
  }
}

impl FromUrlWithScheme for GStreamerInputPipelineBuilder {
  const SCHEME: &'static str = "gst";
}

impl FromUrl for GStreamerInputPipelineBuilder {
  type Error = GStreamerInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(GStreamerInputError::SchemeMismatch);
    }

    let query: HashMap<String, String> = url
      .query_pairs()
      .map(|(k, v)| (String::from(k), String::from(v)))
      .collect();
    let parse = |key: &str, default: u32| {
      query
        .get(key)
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(default)
    };

    let builder = match url.host_str() {
      Some("camera") => Self::camera(
        url.path(),
        parse("width", DEFAULT_CAMERA_WIDTH),
        parse("height", DEFAULT_CAMERA_HEIGHT),
        parse("fps", DEFAULT_CAMERA_FPS),
      ),
      Some("file") => Self::file(url.path()),
      _ => return Err(GStreamerInputError::SchemeMismatch),
    };

    Ok(match query.get("rotate") {
      Some(degrees) => builder.rotate(degrees),
      None => builder,
    })
  }
}

/// GStreamer 视频输入
pub struct GStreamerInput {
  kind: SourceKind,
  pipeline: Option<gst::Pipeline>,
  appsink: gst_app::AppSink,
  last: LastFrame,
  failure: Option<String>,
}

impl Drop for GStreamerInput {
  fn drop(&mut self) {
    self.close();
  }
}

impl GStreamerInput {
  /// 启动管道，管道中须有名为 `sink` 的 appsink
  fn launch(kind: SourceKind, description: &str) -> Result<Self, GStreamerInputError> {
    gst::init()?;

    let pipeline = gst::parse::launch(description)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerInputError::PipelineError("Failed to create pipeline".to_string()))?;

    let appsink = pipeline
      .by_name("sink")
      .ok_or(GStreamerInputError::AppSinkNotFound)?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerInputError::AppSinkConversionFailed)?;

    pipeline.set_state(gst::State::Playing)?;

    Ok(GStreamerInput {
      kind,
      pipeline: Some(pipeline),
      appsink,
      last: LastFrame::default(),
      failure: None,
    })
  }

  fn pull(&mut self) -> Result<Frame, CaptureFailure> {
    let Some(pipeline) = &self.pipeline else {
      return Err(CaptureFailure::Disconnected("GStreamer 管道已关闭".to_string()));
    };
    if let Some(reason) = &self.failure {
      return Err(CaptureFailure::Disconnected(reason.clone()));
    }

    match self
      .appsink
      .try_pull_sample(gst::ClockTime::from_mseconds(PULL_TIMEOUT_MS))
    {
      Some(sample) => {
        convert_sample(&sample).map_err(|e| CaptureFailure::Transient(e.to_string()))
      }
      None if self.appsink.is_eos() => Err(CaptureFailure::EndOfStream),
      None => match bus_error(pipeline) {
        Some(reason) => {
          error!("GStreamer 管道出错: {}", reason);
          self.failure = Some(reason.clone());
          Err(CaptureFailure::Disconnected(reason))
        }
        None => Err(CaptureFailure::Transient("appsink 超时".to_string())),
      },
    }
  }
}

/// 取出总线上的错误消息；元素出错后管道不会再产出帧
fn bus_error(pipeline: &gst::Pipeline) -> Option<String> {
  let message = pipeline.bus()?.pop_filtered(&[gst::MessageType::Error])?;
  match message.view() {
    gst::MessageView::Error(err) => Some(match err.src() {
      Some(src) => format!("{}: {}", src.name(), err.error()),
      None => err.error().to_string(),
    }),
    _ => None,
  }
}

impl FrameSource for GStreamerInput {
  fn kind(&self) -> SourceKind {
    self.kind
  }

  fn next_frame(&mut self) -> FrameRead {
    let pulled = self.pull();
    if self.kind.is_live() {
      self.last.settle_live(pulled)
    } else {
      settle_stream(pulled)
    }
  }

  fn close(&mut self) {
    if let Some(pipeline) = self.pipeline.take() {
      if let Err(e) = pipeline.set_state(gst::State::Null) {
        warn!("Failed to stop GStreamer pipeline: {}", e);
      }
      info!("GStreamer 输入已释放");
    }
    self.last.clear();
    self.failure = None;
  }

  fn is_closed(&self) -> bool {
    self.pipeline.is_none()
  }
}

fn convert_sample(sample: &gst::Sample) -> Result<Frame, GStreamerInputError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GStreamerInputError::PipelineError("No buffer in sample".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| GStreamerInputError::PipelineError("No caps in sample".to_string()))?;

  let video_info = gst_video::VideoInfo::from_caps(caps)
    .map_err(|_| GStreamerInputError::PipelineError("No video info in caps".to_string()))?;

  let order = match video_info.format() {
    gst_video::VideoFormat::Bgr => ChannelOrder::Bgr,
    gst_video::VideoFormat::Rgb => ChannelOrder::Rgb,
    other => {
      return Err(GStreamerInputError::PipelineError(format!(
        "Unsupported video format: {:?}",
        other
      )));
    }
  };

  let width = video_info.width() as usize;
  let height = video_info.height() as usize;
  let stride = video_info.stride()[0] as usize;

  let map = buffer.map_readable().map_err(|e| {
    GStreamerInputError::PipelineError(format!("Failed to map buffer for reading: {}", e))
  })?;
  let data = map.as_slice();

  let row = width * 3;
  if stride < row || data.len() < stride * (height - 1) + row {
    return Err(GStreamerInputError::PipelineError(format!(
      "Buffer size mismatch: {} bytes for {}x{} (stride {})",
      data.len(),
      width,
      height,
      stride
    )));
  }

  // 去掉行尾对齐填充
  let mut packed = Vec::with_capacity(row * height);
  for y in 0..height {
    packed.extend_from_slice(&data[y * stride..y * stride + row]);
  }

  Frame::from_hwc(width as u32, height as u32, order, packed)
    .map_err(|e| GStreamerInputError::PipelineError(e.to_string()))
}
