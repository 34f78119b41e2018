// 该文件是 Guanzhao （观照） 项目的一部分。
// src/output/save_image_file.rs - 保存图像文件
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

use std::path::{Path, PathBuf};

use image::RgbImage;
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, detector::Detections, output::DisplaySurface};

/// 每次呈现都覆盖同一个文件，结束时文件中是最后一帧
pub struct SaveImageFileOutput {
  path: PathBuf,
  saved: usize,
}

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

impl FromUrlWithScheme for SaveImageFileOutput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(SaveImageFileError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    Ok(Self::new(uri.path()))
  }
}

impl SaveImageFileOutput {
  pub fn new<P: AsRef<Path>>(path: P) -> Self {
    Self {
      path: path.as_ref().to_path_buf(),
      saved: 0,
    }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn saved(&self) -> usize {
    self.saved
  }
}

impl DisplaySurface for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn present(&mut self, image: &RgbImage, _: Option<&Detections>) -> Result<(), Self::Error> {
    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    image.save(&self.path)?;
    self.saved += 1;

    info!("保存图像到文件: {}", self.path.display());

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn writes_last_presented_image() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("out.png");
    let url = Url::from_file_path(&path).unwrap();
    let url = Url::parse(&url.as_str().replacen("file", "image", 1)).unwrap();

    let mut output = SaveImageFileOutput::from_url(&url).unwrap();
    output.present(&RgbImage::new(4, 4), None).unwrap();
    output
      .present(&RgbImage::from_pixel(4, 4, image::Rgb([9, 9, 9])), None)
      .unwrap();

    assert_eq!(output.saved(), 2);
    let saved = image::open(&path).unwrap().into_rgb8();
    assert_eq!(saved.get_pixel(0, 0).0, [9, 9, 9]);
  }
}
