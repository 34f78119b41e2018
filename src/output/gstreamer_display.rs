// 该文件是 Guanzhao （观照） 项目的一部分。
// src/output/gstreamer_display.rs - GStreamer 窗口输出
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

//! 无图形界面时，用 `autovideosink` 打开一个窗口显示画面。
//!
//! URL：`gstdisplay://?fps=30&sink=autovideosink`

use std::collections::HashMap;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use image::RgbImage;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  detector::Detections,
  output::{DISPLAY_HEIGHT, DISPLAY_WIDTH, DisplaySurface},
};

#[derive(Error, Debug)]
pub enum GStreamerDisplayOutputError {
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  #[error("Failed to get appsrc element")]
  AppSrcNotFound,
  #[error("Failed to convert element to appsrc")]
  AppSrcConversionFailed,
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  #[error("Frame size {0}x{1} does not match the display")]
  FrameSize(u32, u32),
}

pub struct GStreamerDisplayOutput {
  pipeline: gst::Pipeline,
  appsrc: gst_app::AppSrc,
  fps: u64,
  frame_count: u64,
}

impl FromUrlWithScheme for GStreamerDisplayOutput {
  const SCHEME: &'static str = "gstdisplay";
}

pub fn display_pipeline_description(sink: &str) -> String {
  format!(
    "appsrc name=src is-live=true ! videoconvert ! {} sync=false",
    sink
  )
}

impl FromUrl for GStreamerDisplayOutput {
  type Error = GStreamerDisplayOutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(GStreamerDisplayOutputError::SchemeMismatch);
    }

    gst::init()?;

    let query: HashMap<_, _> = url.query_pairs().collect();
    let fps: i32 = query
      .get("fps")
      .and_then(|v| v.parse().ok())
      .filter(|v| *v > 0)
      .unwrap_or(30);
    let sink = query
      .get("sink")
      .map(|v| v.to_string())
      .unwrap_or_else(|| "autovideosink".to_string());

    let description = display_pipeline_description(&sink);
    info!("创建显示管道: {}", description);

    let pipeline = gst::parse::launch(&description)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerDisplayOutputError::PipelineError("Failed to create pipeline".into()))?;

    let appsrc = pipeline
      .by_name("src")
      .ok_or(GStreamerDisplayOutputError::AppSrcNotFound)?
      .downcast::<gst_app::AppSrc>()
      .map_err(|_| GStreamerDisplayOutputError::AppSrcConversionFailed)?;

    let caps = gst::Caps::builder("video/x-raw")
      .field("format", "RGB")
      .field("width", DISPLAY_WIDTH as i32)
      .field("height", DISPLAY_HEIGHT as i32)
      .field("framerate", gst::Fraction::new(fps, 1))
      .build();
    appsrc.set_caps(Some(&caps));
    appsrc.set_format(gst::Format::Time);

    pipeline.set_state(gst::State::Playing)?;

    Ok(GStreamerDisplayOutput {
      pipeline,
      appsrc,
      fps: fps as u64,
      frame_count: 0,
    })
  }
}

impl Drop for GStreamerDisplayOutput {
  fn drop(&mut self) {
    let _ = self.appsrc.end_of_stream();
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("停止显示管道失败: {}", e);
    }
    info!("显示窗口已关闭，共显示 {} 帧", self.frame_count);
  }
}

impl DisplaySurface for GStreamerDisplayOutput {
  type Error = GStreamerDisplayOutputError;

  fn present(&mut self, image: &RgbImage, _: Option<&Detections>) -> Result<(), Self::Error> {
    if image.dimensions() != (DISPLAY_WIDTH, DISPLAY_HEIGHT) {
      return Err(GStreamerDisplayOutputError::FrameSize(
        image.width(),
        image.height(),
      ));
    }

    let mut buffer = gst::Buffer::from_mut_slice(image.as_raw().clone());
    let duration = 1_000_000_000 / self.fps;
    if let Some(buffer) = buffer.get_mut() {
      buffer.set_pts(gst::ClockTime::from_nseconds(self.frame_count * duration));
      buffer.set_duration(gst::ClockTime::from_nseconds(duration));
    }
    self.frame_count += 1;

    self
      .appsrc
      .push_buffer(buffer)
      .map_err(|e| {
        GStreamerDisplayOutputError::PipelineError(format!("推送缓冲区失败: {:?}", e))
      })?;

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn pipeline_uses_requested_sink() {
    assert_eq!(
      display_pipeline_description("ximagesink"),
      "appsrc name=src is-live=true ! videoconvert ! ximagesink sync=false"
    );
  }
}
