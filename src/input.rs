// 该文件是 Guanzhao （观照） 项目的一部分。
// src/input.rs - 视频/图像输入
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

use thiserror::Error;
use tracing::debug;

use crate::{FromUrl, frame::Frame};

#[cfg(feature = "read_image_file")]
mod read_image_file;
#[cfg(feature = "read_image_file")]
pub use self::read_image_file::{ImageFileInput, ImageFileInputError};

#[cfg(feature = "v4l_input")]
mod v4l_input;
#[cfg(feature = "v4l_input")]
pub use self::v4l_input::{V4lInput, V4lInputError};

#[cfg(feature = "gstreamer_input")]
mod gstreamer_input;
#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_input::{GStreamerInput, GStreamerInputError, GStreamerInputPipelineBuilder};

/// 一次读取的结果
///
/// 读取失败不会以错误的形式传播到显示循环，而是区分为几种情况，
/// 以便调用方区分瞬时丢帧与设备永久丢失。
#[derive(Debug, Clone, PartialEq)]
pub enum FrameRead {
  /// 新采集的帧
  Fresh(Frame),
  /// 实时源读取失败，返回最近一次成功采集的帧
  Reused(Frame),
  /// 暂无可用帧
  Missing,
  /// 有限流已读完
  Ended,
  /// 设备已丢失或已关闭
  Lost(String),
}

impl FrameRead {
  pub fn frame(&self) -> Option<&Frame> {
    match self {
      FrameRead::Fresh(frame) | FrameRead::Reused(frame) => Some(frame),
      _ => None,
    }
  }

  pub fn into_frame(self) -> Option<Frame> {
    match self {
      FrameRead::Fresh(frame) | FrameRead::Reused(frame) => Some(frame),
      _ => None,
    }
  }
}

/// 输入源类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
  /// 实时摄像头
  Camera,
  /// 视频文件
  VideoFile,
  /// 静态图片
  Image,
}

impl SourceKind {
  pub fn is_live(self) -> bool {
    matches!(self, SourceKind::Camera)
  }
}

/// 帧源
pub trait FrameSource {
  fn kind(&self) -> SourceKind;

  /// 读取下一帧
  fn next_frame(&mut self) -> FrameRead;

  /// 释放底层设备或文件句柄，重复调用无副作用
  fn close(&mut self);

  fn is_closed(&self) -> bool;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
  fn kind(&self) -> SourceKind {
    (**self).kind()
  }

  fn next_frame(&mut self) -> FrameRead {
    (**self).next_frame()
  }

  fn close(&mut self) {
    (**self).close()
  }

  fn is_closed(&self) -> bool {
    (**self).is_closed()
  }
}

/// 采集后端报告的失败原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureFailure {
  /// 设备暂时没有数据（超时、缓冲区未就绪、解码失败）
  Transient(String),
  /// 设备不可再用
  Disconnected(String),
  /// 流结束
  EndOfStream,
}

/// 实时源的最近一帧缓存
#[derive(Debug, Default)]
pub struct LastFrame {
  frame: Option<Frame>,
}

impl LastFrame {
  pub fn clear(&mut self) {
    self.frame = None;
  }

  /// 实时源：瞬时失败时退回到最近一帧
  pub fn settle_live(&mut self, captured: Result<Frame, CaptureFailure>) -> FrameRead {
    match captured {
      Ok(frame) => {
        self.frame = Some(frame.clone());
        FrameRead::Fresh(frame)
      }
      Err(CaptureFailure::Transient(reason)) => {
        debug!("采集失败，复用上一帧: {}", reason);
        match &self.frame {
          Some(frame) => FrameRead::Reused(frame.clone()),
          None => FrameRead::Missing,
        }
      }
      Err(CaptureFailure::Disconnected(reason)) => {
        self.frame = None;
        FrameRead::Lost(reason)
      }
      Err(CaptureFailure::EndOfStream) => FrameRead::Ended,
    }
  }
}

/// 非实时源：失败时直接跳过本次更新
pub fn settle_stream(captured: Result<Frame, CaptureFailure>) -> FrameRead {
  match captured {
    Ok(frame) => FrameRead::Fresh(frame),
    Err(CaptureFailure::Transient(reason)) => {
      debug!("读取失败，跳过本帧: {}", reason);
      FrameRead::Missing
    }
    Err(CaptureFailure::Disconnected(reason)) => FrameRead::Lost(reason),
    Err(CaptureFailure::EndOfStream) => FrameRead::Ended,
  }
}

#[derive(Error, Debug)]
pub enum InputError {
  #[cfg(feature = "read_image_file")]
  #[error("Image file input error: {0}")]
  ImageFileInputError(#[from] ImageFileInputError),
  #[cfg(feature = "v4l_input")]
  #[error("V4L input error: {0}")]
  V4lInputError(#[from] V4lInputError),
  #[cfg(feature = "gstreamer_input")]
  #[error("GStreamer input error: {0}")]
  GStreamerInputError(#[from] GStreamerInputError),
  #[error("URI scheme mismatch: {0}")]
  SchemeMismatch(String),
}

pub enum InputWrapper {
  #[cfg(feature = "read_image_file")]
  ReadImageFile(ImageFileInput),
  #[cfg(feature = "v4l_input")]
  V4lInput(V4lInput),
  #[cfg(feature = "gstreamer_input")]
  GStreamerInput(GStreamerInput),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "read_image_file")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == ImageFileInput::SCHEME {
        let input = ImageFileInput::from_url(url)?;
        return Ok(InputWrapper::ReadImageFile(input));
      }
    }
    #[cfg(feature = "v4l_input")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == V4lInput::SCHEME {
        let input = V4lInput::from_url(url)?;
        return Ok(InputWrapper::V4lInput(input));
      }
    }
    #[cfg(feature = "gstreamer_input")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == GStreamerInputPipelineBuilder::SCHEME {
        let input = GStreamerInputPipelineBuilder::from_url(url)?.build()?;
        return Ok(InputWrapper::GStreamerInput(input));
      }
    }
    Err(InputError::SchemeMismatch(url.scheme().to_string()))
  }
}

impl FrameSource for InputWrapper {
  fn kind(&self) -> SourceKind {
    match self {
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => input.kind(),
      #[cfg(feature = "v4l_input")]
      InputWrapper::V4lInput(input) => input.kind(),
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamerInput(input) => input.kind(),
    }
  }

  fn next_frame(&mut self) -> FrameRead {
    match self {
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => input.next_frame(),
      #[cfg(feature = "v4l_input")]
      InputWrapper::V4lInput(input) => input.next_frame(),
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamerInput(input) => input.next_frame(),
    }
  }

  fn close(&mut self) {
    match self {
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => input.close(),
      #[cfg(feature = "v4l_input")]
      InputWrapper::V4lInput(input) => input.close(),
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamerInput(input) => input.close(),
    }
  }

  fn is_closed(&self) -> bool {
    match self {
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => input.is_closed(),
      #[cfg(feature = "v4l_input")]
      InputWrapper::V4lInput(input) => input.is_closed(),
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamerInput(input) => input.is_closed(),
    }
  }
}
