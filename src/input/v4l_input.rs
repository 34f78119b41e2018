// 该文件是 Guanzhao （观照） 项目的一部分。
// src/input/v4l_input.rs - V4L 摄像头输入
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

use std::collections::HashMap;

use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;
use v4l::{
  FourCC,
  buffer::Type,
  io::{mmap::Stream, traits::CaptureStream},
  video::Capture,
};

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{ChannelOrder, Frame, FromRgbImage},
  input::{CaptureFailure, FrameRead, FrameSource, LastFrame, SourceKind},
};

#[derive(Error, Debug)]
pub enum V4lInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Invalid device path: {0}")]
  InvalidDevicePath(String),
  #[error("Unsupported pixel format: {0}")]
  UnsupportedPixelFormat(String),
}

const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const STREAM_BUFFERS: u32 = 4;

// Linux errno，表示设备已拔出或句柄失效
const ENODEV: i32 = 19;
const EBADF: i32 = 9;
const ENXIO: i32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PixelFormat {
  Rgb3,
  Bgr3,
  Yuyv,
  Mjpg,
}

impl PixelFormat {
  fn from_fourcc(fourcc: FourCC) -> Option<Self> {
    match &fourcc.repr {
      b"RGB3" => Some(PixelFormat::Rgb3),
      b"BGR3" => Some(PixelFormat::Bgr3),
      b"YUYV" => Some(PixelFormat::Yuyv),
      b"MJPG" => Some(PixelFormat::Mjpg),
      _ => None,
    }
  }
}

struct CaptureHandle {
  // 字段按声明顺序析构，流必须先于设备释放
  stream: Stream<'static>,
  _device: v4l::Device,
}

/// V4L2 摄像头输入
pub struct V4lInput {
  device_path: String,
  width: u32,
  height: u32,
  format: PixelFormat,
  handle: Option<CaptureHandle>,
  last: LastFrame,
}

impl FromUrlWithScheme for V4lInput {
  const SCHEME: &'static str = "v4l";
}

impl FromUrl for V4lInput {
  type Error = V4lInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(V4lInputError::SchemaMismatch);
    }

    // v4l:///dev/video0 或 v4l://camera/0
    let device_path = match url.host_str() {
      Some("camera") => {
        let index = url.path().trim_start_matches('/');
        let index = if index.is_empty() { "0" } else { index };
        let index: usize = index
          .parse()
          .map_err(|_| V4lInputError::InvalidDevicePath(url.path().to_string()))?;
        format!("/dev/video{}", index)
      }
      None | Some("") if !url.path().is_empty() && url.path() != "/" => url.path().to_string(),
      None | Some("") => "/dev/video0".to_string(),
      Some(other) => return Err(V4lInputError::InvalidDevicePath(other.to_string())),
    };

    let query: HashMap<String, String> = url
      .query_pairs()
      .map(|(k, v)| (String::from(k), String::from(v)))
      .collect();
    let width = query
      .get("width")
      .and_then(|v| v.parse::<u32>().ok())
      .unwrap_or(DEFAULT_WIDTH);
    let height = query
      .get("height")
      .and_then(|v| v.parse::<u32>().ok())
      .unwrap_or(DEFAULT_HEIGHT);
    let fourcc = query.get("fourcc").map(String::as_str).unwrap_or("YUYV");

    Self::open(&device_path, width, height, fourcc)
  }
}

impl V4lInput {
  pub fn open(
    device_path: &str,
    width: u32,
    height: u32,
    fourcc: &str,
  ) -> Result<Self, V4lInputError> {
    let fourcc_bytes: [u8; 4] = fourcc
      .as_bytes()
      .try_into()
      .map_err(|_| V4lInputError::UnsupportedPixelFormat(fourcc.to_string()))?;

    let device = v4l::Device::with_path(device_path)?;
    let mut format = device.format()?;
    format.width = width;
    format.height = height;
    format.fourcc = FourCC::new(&fourcc_bytes);

    let format = match device.set_format(&format) {
      Ok(format) => format,
      Err(e) => {
        warn!("设置摄像头格式失败 {}: {}", device_path, e);
        device.format()?
      }
    };

    let pixel_format = PixelFormat::from_fourcc(format.fourcc).ok_or_else(|| {
      V4lInputError::UnsupportedPixelFormat(String::from_utf8_lossy(&format.fourcc.repr).into())
    })?;

    let stream = Stream::with_buffers(&device, Type::VideoCapture, STREAM_BUFFERS)?;

    info!(
      "摄像头已打开: {} ({}x{}, {:?})",
      device_path, format.width, format.height, pixel_format
    );

    Ok(V4lInput {
      device_path: device_path.to_string(),
      width: format.width,
      height: format.height,
      format: pixel_format,
      handle: Some(CaptureHandle {
        stream,
        _device: device,
      }),
      last: LastFrame::default(),
    })
  }

  fn capture(&mut self) -> Result<Frame, CaptureFailure> {
    let handle = self
      .handle
      .as_mut()
      .ok_or_else(|| CaptureFailure::Disconnected("摄像头已关闭".to_string()))?;

    let (buf, meta) = handle.stream.next().map_err(|e| {
      if matches!(e.raw_os_error(), Some(ENODEV) | Some(EBADF) | Some(ENXIO)) {
        CaptureFailure::Disconnected(e.to_string())
      } else {
        CaptureFailure::Transient(e.to_string())
      }
    })?;

    let used = (meta.bytesused as usize).min(buf.len());
    let data = if used == 0 { buf } else { &buf[..used] };
    decode_buffer(self.format, data, self.width, self.height)
  }
}

impl FrameSource for V4lInput {
  fn kind(&self) -> SourceKind {
    SourceKind::Camera
  }

  fn next_frame(&mut self) -> FrameRead {
    let captured = self.capture();
    self.last.settle_live(captured)
  }

  fn close(&mut self) {
    if self.handle.take().is_some() {
      info!("摄像头已释放: {}", self.device_path);
    }
    self.last.clear();
  }

  fn is_closed(&self) -> bool {
    self.handle.is_none()
  }
}

fn decode_buffer(
  format: PixelFormat,
  data: &[u8],
  width: u32,
  height: u32,
) -> Result<Frame, CaptureFailure> {
  let pixels = width as usize * height as usize;
  let transient = |e: String| CaptureFailure::Transient(e);

  match format {
    PixelFormat::Rgb3 | PixelFormat::Bgr3 => {
      if data.len() < pixels * 3 {
        return Err(transient(format!(
          "缓冲区大小不匹配: 期望 {} 字节, 实际 {} 字节",
          pixels * 3,
          data.len()
        )));
      }
      let order = if format == PixelFormat::Rgb3 {
        ChannelOrder::Rgb
      } else {
        ChannelOrder::Bgr
      };
      Frame::from_hwc(width, height, order, data[..pixels * 3].to_vec())
        .map_err(|e| transient(e.to_string()))
    }
    PixelFormat::Yuyv => {
      if data.len() < pixels * 2 {
        return Err(transient(format!(
          "缓冲区大小不匹配: 期望 {} 字节, 实际 {} 字节",
          pixels * 2,
          data.len()
        )));
      }
      Frame::from_hwc(
        width,
        height,
        ChannelOrder::Rgb,
        yuyv_to_rgb(&data[..pixels * 2]),
      )
      .map_err(|e| transient(e.to_string()))
    }
    PixelFormat::Mjpg => {
      let image = image::load_from_memory_with_format(data, image::ImageFormat::Jpeg)
        .map_err(|e| transient(e.to_string()))?
        .into_rgb8();
      Ok(Frame::from_rgb_image(&image, ChannelOrder::Bgr))
    }
  }
}

/// YUYV (YUV 4:2:2) 转 RGB，BT.601 有限范围
fn yuyv_to_rgb(data: &[u8]) -> Vec<u8> {
  let mut rgb = Vec::with_capacity(data.len() / 2 * 3);
  for chunk in data.chunks_exact(4) {
    let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
    for y in [y0, y1] {
      rgb.extend_from_slice(&yuv_to_rgb(y, u, v));
    }
  }
  rgb
}

fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
  let c = y as f32 - 16.0;
  let d = u as f32 - 128.0;
  let e = v as f32 - 128.0;
  let r = 1.164 * c + 1.596 * e;
  let g = 1.164 * c - 0.392 * d - 0.813 * e;
  let b = 1.164 * c + 2.017 * d;
  [
    r.round().clamp(0.0, 255.0) as u8,
    g.round().clamp(0.0, 255.0) as u8,
    b.round().clamp(0.0, 255.0) as u8,
  ]
}
