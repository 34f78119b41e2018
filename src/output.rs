// 该文件是 Guanzhao （观照） 项目的一部分。
// src/output.rs - 输出定义
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

use image::{
  RgbImage,
  imageops::{self, FilterType},
};
use thiserror::Error;
use url::Url;

use crate::{
  FromUrl,
  detector::Detections,
  frame::{Frame, ToRgbImage},
};

pub mod contour;
pub mod draw;

#[cfg(feature = "save_image_file")]
mod save_image_file;
#[cfg(feature = "save_image_file")]
pub use self::save_image_file::{SaveImageFileError, SaveImageFileOutput};

#[cfg(feature = "directory_record")]
mod directory_record;
#[cfg(feature = "directory_record")]
pub use self::directory_record::{DirectoryRecordOutput, DirectoryRecordOutputError};

#[cfg(feature = "gstreamer_output")]
mod gstreamer_display;
#[cfg(feature = "gstreamer_output")]
pub use self::gstreamer_display::{GStreamerDisplayOutput, GStreamerDisplayOutputError};

pub const DISPLAY_WIDTH: u32 = 640;
pub const DISPLAY_HEIGHT: u32 = 480;

/// 显示面：接收缩放到显示尺寸的 RGB 图像
pub trait DisplaySurface {
  type Error;

  fn present(
    &mut self,
    image: &RgbImage,
    detections: Option<&Detections>,
  ) -> Result<(), Self::Error>;
}

impl<S: DisplaySurface + ?Sized> DisplaySurface for Box<S> {
  type Error = S::Error;

  fn present(
    &mut self,
    image: &RgbImage,
    detections: Option<&Detections>,
  ) -> Result<(), Self::Error> {
    (**self).present(image, detections)
  }
}

/// 转为 RGB 并缩放到 640x480
pub fn fit_to_display(frame: &Frame) -> RgbImage {
  let image = frame.to_rgb_image();
  if image.dimensions() == (DISPLAY_WIDTH, DISPLAY_HEIGHT) {
    return image;
  }
  imageops::resize(&image, DISPLAY_WIDTH, DISPLAY_HEIGHT, FilterType::Triangle)
}

#[derive(Error, Debug)]
pub enum OutputError {
  #[cfg(feature = "save_image_file")]
  #[error("保存图像文件错误: {0}")]
  SaveImageFileError(#[from] SaveImageFileError),
  #[cfg(feature = "directory_record")]
  #[error("目录记录输出错误: {0}")]
  DirectoryRecordOutputError(#[from] DirectoryRecordOutputError),
  #[cfg(feature = "gstreamer_output")]
  #[error("GStreamer 显示输出错误: {0}")]
  GStreamerDisplayOutputError(#[from] GStreamerDisplayOutputError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

pub enum OutputWrapper {
  #[cfg(feature = "save_image_file")]
  SaveImageFileOutput(SaveImageFileOutput),
  #[cfg(feature = "directory_record")]
  DirectoryRecordOutput(DirectoryRecordOutput),
  #[cfg(feature = "gstreamer_output")]
  GStreamerDisplayOutput(GStreamerDisplayOutput),
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    #[cfg(any(
      feature = "save_image_file",
      feature = "directory_record",
      feature = "gstreamer_output"
    ))]
    use crate::FromUrlWithScheme;

    match url.scheme() {
      #[cfg(feature = "save_image_file")]
      SaveImageFileOutput::SCHEME => {
        let output = SaveImageFileOutput::from_url(url)?;
        Ok(OutputWrapper::SaveImageFileOutput(output))
      }
      #[cfg(feature = "directory_record")]
      DirectoryRecordOutput::SCHEME => {
        let output = DirectoryRecordOutput::from_url(url)?;
        Ok(OutputWrapper::DirectoryRecordOutput(output))
      }
      #[cfg(feature = "gstreamer_output")]
      GStreamerDisplayOutput::SCHEME => {
        let output = GStreamerDisplayOutput::from_url(url)?;
        Ok(OutputWrapper::GStreamerDisplayOutput(output))
      }
      other => Err(OutputError::SchemeMismatch(other.to_string())),
    }
  }
}

impl DisplaySurface for OutputWrapper {
  type Error = OutputError;

  fn present(
    &mut self,
    image: &RgbImage,
    detections: Option<&Detections>,
  ) -> Result<(), Self::Error> {
    match self {
      #[cfg(feature = "save_image_file")]
      OutputWrapper::SaveImageFileOutput(output) => output
        .present(image, detections)
        .map_err(OutputError::from),
      #[cfg(feature = "directory_record")]
      OutputWrapper::DirectoryRecordOutput(output) => output
        .present(image, detections)
        .map_err(OutputError::from),
      #[cfg(feature = "gstreamer_output")]
      OutputWrapper::GStreamerDisplayOutput(output) => output
        .present(image, detections)
        .map_err(OutputError::from),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::frame::ChannelOrder;

  #[test]
  fn display_fit_scales_and_converts() {
    let frame = Frame::filled(320, 240, ChannelOrder::Bgr, [10, 20, 30]);
    let image = fit_to_display(&frame);
    assert_eq!(image.dimensions(), (DISPLAY_WIDTH, DISPLAY_HEIGHT));
    assert_eq!(image.get_pixel(100, 100).0, [30, 20, 10]);
  }

  #[test]
  fn unknown_output_scheme_is_rejected() {
    let url = Url::parse("rtsp://localhost/stream").unwrap();
    assert!(matches!(
      OutputWrapper::from_url(&url),
      Err(OutputError::SchemeMismatch(_))
    ));
  }
}
