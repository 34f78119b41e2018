// 该文件是 Guanzhao （观照） 项目的一部分。
// src/frame.rs - HWC 帧定义
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

use image::{ImageBuffer, Rgb, RgbImage};
use thiserror::Error;

const COLOR_CHANNELS: usize = 3;

/// 像素通道顺序
///
/// 采集管道（GStreamer、OpenCV 风格的摄像头）通常输出 BGR，
/// 图像文件解码得到的是 RGB。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOrder {
  Bgr,
  Rgb,
}

#[derive(Error, Debug)]
pub enum FrameError {
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  LengthMismatch { expected: usize, actual: usize },
  #[error("帧尺寸无效: {0}x{1}")]
  InvalidShape(u32, u32),
}

/// 单帧图像，按 HWC 排列的 8 位三通道数据
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
  width: u32,
  height: u32,
  order: ChannelOrder,
  data: Box<[u8]>,
}

impl Frame {
  pub fn from_hwc(
    width: u32,
    height: u32,
    order: ChannelOrder,
    data: Vec<u8>,
  ) -> Result<Self, FrameError> {
    if width == 0 || height == 0 {
      return Err(FrameError::InvalidShape(width, height));
    }

    let expected = COLOR_CHANNELS * width as usize * height as usize;
    if data.len() != expected {
      return Err(FrameError::LengthMismatch {
        expected,
        actual: data.len(),
      });
    }

    Ok(Self {
      width,
      height,
      order,
      data: data.into_boxed_slice(),
    })
  }

  /// 纯色帧，`color` 按 `order` 给出
  pub fn filled(width: u32, height: u32, order: ChannelOrder, color: [u8; 3]) -> Self {
    let data = color
      .iter()
      .copied()
      .cycle()
      .take(COLOR_CHANNELS * width as usize * height as usize)
      .collect::<Vec<u8>>();

    Self {
      width,
      height,
      order,
      data: data.into_boxed_slice(),
    }
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn channels(&self) -> usize {
    COLOR_CHANNELS
  }

  pub fn order(&self) -> ChannelOrder {
    self.order
  }

  pub fn dimensions(&self) -> (u32, u32) {
    (self.width, self.height)
  }

  pub fn as_hwc(&self) -> &[u8] {
    &self.data
  }

  /// 读取 (x, y) 处的像素，统一按 RGB 返回
  pub fn rgb_at(&self, x: u32, y: u32) -> Option<[u8; 3]> {
    if x >= self.width || y >= self.height {
      return None;
    }
    let idx = (y as usize * self.width as usize + x as usize) * COLOR_CHANNELS;
    let px = [self.data[idx], self.data[idx + 1], self.data[idx + 2]];
    Some(match self.order {
      ChannelOrder::Rgb => px,
      ChannelOrder::Bgr => [px[2], px[1], px[0]],
    })
  }

  /// 转换为指定通道顺序
  pub fn into_order(mut self, order: ChannelOrder) -> Self {
    if self.order != order {
      for px in self.data.chunks_exact_mut(COLOR_CHANNELS) {
        px.swap(0, 2);
      }
      self.order = order;
    }
    self
  }

  /// 归一化到 [0, 1] 的 RGB CHW 浮点张量数据
  pub fn to_chw_normalized(&self) -> Vec<f32> {
    let plane = self.width as usize * self.height as usize;
    let mut chw = vec![0f32; COLOR_CHANNELS * plane];

    for (idx, px) in self.data.chunks_exact(COLOR_CHANNELS).enumerate() {
      let rgb = match self.order {
        ChannelOrder::Rgb => [px[0], px[1], px[2]],
        ChannelOrder::Bgr => [px[2], px[1], px[0]],
      };
      for (c, value) in rgb.into_iter().enumerate() {
        chw[c * plane + idx] = value as f32 / 255.0;
      }
    }
    chw
  }
}

pub trait ToRgbImage {
  fn to_rgb_image(&self) -> RgbImage;
}

pub trait FromRgbImage {
  fn from_rgb_image(image: &RgbImage, order: ChannelOrder) -> Self;
}

impl ToRgbImage for Frame {
  fn to_rgb_image(&self) -> RgbImage {
    let width = self.width as usize;
    let data = &self.data;
    let order = self.order;

    ImageBuffer::from_fn(self.width, self.height, |x, y| {
      let idx = (y as usize * width + x as usize) * COLOR_CHANNELS;
      match order {
        ChannelOrder::Rgb => Rgb([data[idx], data[idx + 1], data[idx + 2]]),
        ChannelOrder::Bgr => Rgb([data[idx + 2], data[idx + 1], data[idx]]),
      }
    })
  }
}

impl FromRgbImage for Frame {
  fn from_rgb_image(image: &RgbImage, order: ChannelOrder) -> Self {
    let (width, height) = image.dimensions();
    let frame = Frame {
      width,
      height,
      order: ChannelOrder::Rgb,
      data: image.as_raw().clone().into_boxed_slice(),
    };
    frame.into_order(order)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rejects_wrong_length() {
    let err = Frame::from_hwc(4, 2, ChannelOrder::Bgr, vec![0; 10]).unwrap_err();
    assert!(matches!(
      err,
      FrameError::LengthMismatch {
        expected: 24,
        actual: 10
      }
    ));
  }

  #[test]
  fn bgr_frame_reads_back_as_rgb() {
    let frame = Frame::filled(3, 2, ChannelOrder::Bgr, [10, 20, 30]);
    assert_eq!(frame.rgb_at(2, 1), Some([30, 20, 10]));
    assert_eq!(frame.to_rgb_image().get_pixel(0, 0).0, [30, 20, 10]);
    assert_eq!(frame.rgb_at(3, 0), None);
  }

  #[test]
  fn chw_tensor_is_rgb_planar_and_normalized() {
    let frame = Frame::filled(2, 2, ChannelOrder::Bgr, [0, 51, 255]);
    let chw = frame.to_chw_normalized();
    assert_eq!(chw.len(), 12);
    // R 平面来自 BGR 的第三个分量
    assert!(chw[..4].iter().all(|v| (*v - 1.0).abs() < 1e-6));
    assert!(chw[4..8].iter().all(|v| (*v - 0.2).abs() < 1e-6));
    assert!(chw[8..].iter().all(|v| v.abs() < 1e-6));
  }

  #[test]
  fn rgb_image_keeps_requested_order() {
    let image = RgbImage::from_pixel(2, 2, Rgb([1, 2, 3]));
    let frame = Frame::from_rgb_image(&image, ChannelOrder::Bgr);
    assert_eq!(frame.order(), ChannelOrder::Bgr);
    assert_eq!(&frame.as_hwc()[..3], &[3, 2, 1]);
  }
}
