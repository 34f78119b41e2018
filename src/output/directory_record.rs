// 该文件是 Guanzhao （观照） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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

//! 按日期分目录保存画面：`<dir>/YYYY/MM/DD/HH-MM-SS-XXXX.png`。
//!
//! 查询参数：
//! - `always`：没有检测结果的帧也保存
//! - `record=name|id`：额外写出同名 `.txt`，每行一个检测项
//! - `every=N`：每 N 帧保存一次

use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, Utc};
use image::RgbImage;
use thiserror::Error;
use tracing::debug;

use crate::{
  FromUrl, FromUrlWithScheme,
  detector::Detections,
  model::WithLabel,
  output::DisplaySurface,
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordLabel {
  Name,
  Id,
}

pub struct DirectoryRecordOutput {
  directory: PathBuf,
  record: Option<RecordLabel>,
  always: bool,
  every: usize,
  presented: usize,
  frame_counter: u16,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let mut output = Self::new(uri.path());
    for (k, v) in uri.query_pairs() {
      match k.as_ref() {
        "record" if v == "id" => output.record = Some(RecordLabel::Id),
        "record" => output.record = Some(RecordLabel::Name),
        "always" => output.always = true,
        "every" => output.every = v.parse().unwrap_or(1).max(1),
        _ => {}
      }
    }

    Ok(output)
  }
}

impl DirectoryRecordOutput {
  pub fn new<P: AsRef<Path>>(directory: P) -> Self {
    Self {
      directory: directory.as_ref().to_path_buf(),
      record: None,
      always: false,
      every: 1,
      presented: 0,
      frame_counter: 0,
    }
  }

  pub fn always(mut self, always: bool) -> Self {
    self.always = always;
    self
  }

  fn frame_path(&mut self, now: DateTime<Utc>) -> Result<PathBuf, DirectoryRecordOutputError> {
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    self.frame_counter = self.frame_counter.wrapping_add(1);
    Ok(directory.join(format!(
      "{}-{:04X}.png",
      now.format("%H-%M-%S"),
      self.frame_counter
    )))
  }

  fn write_record(
    &self,
    label: RecordLabel,
    detections: Option<&Detections>,
    path: &Path,
  ) -> Result<(), DirectoryRecordOutputError> {
    let lines = detections
      .map(|d| {
        d.result
          .iter()
          .map(|item| {
            let name = match label {
              RecordLabel::Name => item.kind.to_label_str(),
              RecordLabel::Id => item.kind.to_label_id().to_string(),
            };
            format!(
              "{}, {:.4}, {:.1}, {:.1}, {:.1}, {:.1}",
              name, item.score, item.bbox[0], item.bbox[1], item.bbox[2], item.bbox[3]
            )
          })
          .collect::<Vec<_>>()
      })
      .unwrap_or_default();
    std::fs::write(path.with_extension("txt"), lines.join("\n"))?;
    Ok(())
  }
}

impl DisplaySurface for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn present(
    &mut self,
    image: &RgbImage,
    detections: Option<&Detections>,
  ) -> Result<(), Self::Error> {
    self.presented += 1;
    if (self.presented - 1) % self.every != 0 {
      return Ok(());
    }

    let has_result = detections.is_some_and(|d| d.rendered.boxes + d.rendered.people > 0);
    if !self.always && !has_result {
      return Ok(());
    }

    let path = self.frame_path(Utc::now())?;
    image.save(&path)?;
    if let Some(label) = self.record {
      self.write_record(label, detections, &path)?;
    }
    debug!("记录画面: {}", path.display());

    Ok(())
  }
}
