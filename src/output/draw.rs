// 该文件是 Guanzhao （观照） 项目的一部分。
// src/output/draw.rs - 检测结果叠加绘制
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

use ab_glyph::{Font, FontRef, PxScale, ScaleFont};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_circle_mut, draw_hollow_rect_mut, draw_line_segment_mut, draw_text_mut},
  point::Point,
  rect::Rect,
};

use crate::{
  model::{DetectResult, Keypoint},
  output::contour::largest_external_contour,
};

// 颜色均为 RGB 顺序
pub const PERSON_BOX_COLOR: [u8; 3] = [255, 0, 255];
pub const OTHER_BOX_COLOR: [u8; 3] = [0, 0, 255];
pub const LABEL_COLOR: [u8; 3] = [255, 0, 0];
pub const STATUS_COLOR: [u8; 3] = [0, 255, 0];
pub const CONTOUR_COLOR: [u8; 3] = [255, 255, 0];
pub const SKELETON_COLOR: [u8; 3] = [0, 255, 255];

const PERSON_BOX_THICKNESS: i32 = 2;
const OTHER_BOX_THICKNESS: i32 = 1;
const CONTOUR_THICKNESS: i32 = 2;
const SKELETON_THICKNESS: i32 = 2;
const KEYPOINT_RADIUS: i32 = 8;
const MASK_THRESHOLD: f32 = 0.5;

const LABEL_FONT_SIZE: f32 = 16.0;
const STATUS_FONT_SIZE: f32 = 20.0;
const PEOPLE_ORIGIN: (i32, i32) = (10, 20);
const FPS_ORIGIN: (i32, i32) = (10, 50);

/// COCO 人体 17 个关键点之间的骨架连线
pub const SKELETON_EDGES: [(usize, usize); 15] = [
  (0, 1),
  (0, 2),
  (2, 4),
  (1, 3),
  (6, 8),
  (8, 10),
  (5, 7),
  (7, 9),
  (5, 11),
  (11, 13),
  (13, 15),
  (6, 12),
  (12, 14),
  (14, 16),
  (5, 6),
];

/// 每个关键点各自的颜色
pub const KEYPOINT_COLORS: [[u8; 3]; 17] = [
  [247, 212, 235],
  [233, 219, 240],
  [255, 221, 204],
  [255, 255, 204],
  [240, 240, 219],
  [245, 245, 214],
  [250, 236, 209],
  [207, 252, 252],
  [219, 240, 233],
  [223, 209, 250],
  [247, 212, 235],
  [207, 252, 252],
  [217, 242, 242],
  [209, 250, 223],
  [250, 250, 209],
  [209, 250, 209],
  [222, 237, 227],
];

/// 一次叠加绘制实际画出的内容
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderReport {
  pub boxes: usize,
  pub people: usize,
  pub contours: usize,
  pub keypoints: usize,
  pub skeleton_edges: usize,
}

pub struct Draw<'a> {
  font: FontRef<'a>,
  label_scale: PxScale,
  status_scale: PxScale,
}

impl<'a> Default for Draw<'a> {
  fn default() -> Self {
    let font_data = include_bytes!("../../assets/font.ttf");
    let font = FontRef::try_from_slice(font_data).expect("无法加载嵌入的字体文件");

    Self {
      font,
      label_scale: PxScale::from(LABEL_FONT_SIZE),
      status_scale: PxScale::from(STATUS_FONT_SIZE),
    }
  }
}

impl<'a> Draw<'a> {
  /// 在 `(x, y)` 处绘制文本，`y` 为基线位置
  pub fn text(
    &self,
    image: &mut RgbImage,
    text: &str,
    x: i32,
    y: i32,
    scale: PxScale,
    color: [u8; 3],
  ) {
    let ascent = self.font.as_scaled(scale).ascent().ceil() as i32;
    draw_text_mut(image, Rgb(color), x, y - ascent, scale, &self.font, text);
  }

  /// 绘制矩形框，向内加粗。图像外的边不绘制；完全落在图像外或退化的框返回 `None`，
  /// 否则返回限制在图像内的左上角，供标注文字使用。
  pub fn rect(
    &self,
    image: &mut RgbImage,
    bbox: &[f32; 4],
    color: [u8; 3],
    thickness: i32,
  ) -> Option<(i32, i32)> {
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 {
      return None;
    }

    // 超出图像的边收到图像外侧一个线宽处，仍不可见
    let margin = thickness.max(1);
    let x_min = (bbox[0].floor() as i32).clamp(-margin, w - 1 + margin);
    let y_min = (bbox[1].floor() as i32).clamp(-margin, h - 1 + margin);
    let x_max = (bbox[2].ceil() as i32).clamp(-margin, w - 1 + margin);
    let y_max = (bbox[3].ceil() as i32).clamp(-margin, h - 1 + margin);

    if x_min >= x_max || y_min >= y_max {
      return None;
    }
    if x_max < 0 || y_max < 0 || x_min >= w || y_min >= h {
      return None;
    }

    for t in 0..thickness {
      let width = x_max - x_min - 2 * t + 1;
      let height = y_max - y_min - 2 * t + 1;
      if width <= 0 || height <= 0 {
        break;
      }
      let rect = Rect::at(x_min + t, y_min + t).of_size(width as u32, height as u32);
      draw_hollow_rect_mut(image, rect, Rgb(color));
    }

    Some((x_min.max(0), y_min.max(0)))
  }

  pub fn line(
    &self,
    image: &mut RgbImage,
    from: (f32, f32),
    to: (f32, f32),
    color: [u8; 3],
    thickness: i32,
  ) {
    for t in 0..thickness.max(1) {
      let t = t as f32;
      draw_line_segment_mut(
        image,
        (from.0 + t, from.1),
        (to.0 + t, to.1),
        Rgb(color),
      );
      draw_line_segment_mut(
        image,
        (from.0, from.1 + t),
        (to.0, to.1 + t),
        Rgb(color),
      );
    }
  }

  /// 闭合折线
  pub fn polygon(
    &self,
    image: &mut RgbImage,
    points: &[Point<i32>],
    color: [u8; 3],
    thickness: i32,
  ) {
    if points.len() < 2 {
      return;
    }
    for (i, a) in points.iter().enumerate() {
      let b = points[(i + 1) % points.len()];
      self.line(
        image,
        (a.x as f32, a.y as f32),
        (b.x as f32, b.y as f32),
        color,
        thickness,
      );
    }
  }

  pub fn filled_circle(
    &self,
    image: &mut RgbImage,
    center: (i32, i32),
    radius: i32,
    color: [u8; 3],
  ) {
    draw_filled_circle_mut(image, center, radius, Rgb(color));
  }

  /// 左上角的人数与帧率
  pub fn status(&self, image: &mut RgbImage, people: Option<usize>, fps: f64) {
    if let Some(people) = people {
      self.text(
        image,
        &format!("people: {}", people),
        PEOPLE_ORIGIN.0,
        PEOPLE_ORIGIN.1,
        self.status_scale,
        STATUS_COLOR,
      );
    }
    self.text(
      image,
      &format!("fps: {}", rounded(fps, 4)),
      FPS_ORIGIN.0,
      FPS_ORIGIN.1,
      self.status_scale,
      STATUS_COLOR,
    );
  }

  /// 框检测结果：人用品红色粗框并标注置信度，其余类别用蓝色细框。
  /// `with_masks` 时额外为每个人绘制掩码的最大外轮廓。
  pub fn boxes(
    &self,
    image: &mut RgbImage,
    result: &DetectResult,
    threshold: f32,
    with_masks: bool,
  ) -> RenderReport {
    let mut report = RenderReport::default();

    for item in result.above(threshold) {
      if !item.kind.is_person() {
        if self
          .rect(image, &item.bbox, OTHER_BOX_COLOR, OTHER_BOX_THICKNESS)
          .is_some()
        {
          report.boxes += 1;
        }
        continue;
      }

      report.people += 1;
      if let Some((x, y)) = self.rect(image, &item.bbox, PERSON_BOX_COLOR, PERSON_BOX_THICKNESS) {
        report.boxes += 1;
        self.text(
          image,
          &format!("person {}", rounded(item.score as f64, 3)),
          x,
          y,
          self.label_scale,
          LABEL_COLOR,
        );
      }

      if with_masks && let Some(mask) = item.mask() {
        let binary = mask.binarize(MASK_THRESHOLD);
        let Some(contour) = largest_external_contour(&binary) else {
          continue;
        };
        let sx = image.width() as f32 / mask.width().max(1) as f32;
        let sy = image.height() as f32 / mask.height().max(1) as f32;
        let points = contour
          .iter()
          .map(|p| Point::new((p.x as f32 * sx) as i32, (p.y as f32 * sy) as i32))
          .collect::<Vec<_>>();
        self.polygon(image, &points, CONTOUR_COLOR, CONTOUR_THICKNESS);
        report.contours += 1;
      }
    }

    report
  }

  /// 姿态结果：关键点与骨架
  pub fn pose(
    &self,
    image: &mut RgbImage,
    result: &DetectResult,
    threshold: f32,
  ) -> RenderReport {
    let mut report = RenderReport::default();

    for item in result.above(threshold) {
      if !item.kind.is_person() {
        continue;
      }
      let Some(points) = item.keypoints() else {
        continue;
      };

      for (i, point) in points.iter().enumerate() {
        if !keypoint_visible(point) {
          continue;
        }
        let color = KEYPOINT_COLORS[i % KEYPOINT_COLORS.len()];
        self.filled_circle(
          image,
          (point.x as i32, point.y as i32),
          KEYPOINT_RADIUS,
          color,
        );
        report.keypoints += 1;
      }

      for (a, b) in visible_edges(points) {
        let (pa, pb) = (points[a], points[b]);
        self.line(
          image,
          (pa.x, pa.y),
          (pb.x, pb.y),
          SKELETON_COLOR,
          SKELETON_THICKNESS,
        );
        report.skeleton_edges += 1;
      }

      report.people += 1;
    }

    report
  }
}

/// 置信度为负的关键点不绘制
pub fn keypoint_visible(point: &Keypoint) -> bool {
  point.score >= 0.0
}

/// 两端关键点都可见的骨架连线
pub fn visible_edges(points: &[Keypoint]) -> impl Iterator<Item = (usize, usize)> + '_ {
  SKELETON_EDGES.iter().copied().filter(|&(a, b)| {
    matches!(
      (points.get(a), points.get(b)),
      (Some(pa), Some(pb)) if keypoint_visible(pa) && keypoint_visible(pb)
    )
  })
}

/// 保留 `places` 位小数并去掉末尾的 0，至少保留一位小数：`12.5`、`3.0`
pub fn rounded(value: f64, places: usize) -> String {
  let text = format!("{:.*}", places, value);
  if !text.contains('.') {
    return format!("{}.0", text);
  }
  let trimmed = text.trim_end_matches('0');
  if trimmed.ends_with('.') {
    format!("{}0", trimmed)
  } else {
    trimmed.to_string()
  }
}
