// 该文件是 Guanzhao （观照） 项目的一部分。
// src/output/contour.rs - 掩码轮廓
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

use image::GrayImage;
use imageproc::{
  contours::{BorderType, find_contours},
  point::Point,
};

/// 二值图中面积最大的外轮廓，没有前景时返回 `None`
pub fn largest_external_contour(binary: &GrayImage) -> Option<Vec<Point<i32>>> {
  find_contours::<i32>(binary)
    .into_iter()
    .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
    .map(|c| (polygon_area(&c.points), c.points))
    .max_by(|(a, _), (b, _)| a.total_cmp(b))
    .map(|(_, points)| points)
}

/// 鞋带公式求多边形面积
pub fn polygon_area(points: &[Point<i32>]) -> f64 {
  if points.len() < 3 {
    return 0.0;
  }
  let twice: i64 = points
    .iter()
    .zip(points.iter().cycle().skip(1))
    .map(|(a, b)| a.x as i64 * b.y as i64 - b.x as i64 * a.y as i64)
    .sum();
  twice.abs() as f64 / 2.0
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Luma;

  fn square(image: &mut GrayImage, x0: u32, y0: u32, size: u32) {
    for y in y0..y0 + size {
      for x in x0..x0 + size {
        image.put_pixel(x, y, Luma([255]));
      }
    }
  }

  #[test]
  fn picks_the_largest_blob() {
    let mut image = GrayImage::new(50, 50);
    square(&mut image, 2, 2, 4);
    square(&mut image, 20, 20, 20);
    let contour = largest_external_contour(&image).unwrap();
    assert!(contour.iter().all(|p| p.x >= 20 && p.y >= 20));
    assert!(contour.contains(&Point::new(20, 20)));
  }

  #[test]
  fn empty_mask_has_no_contour() {
    assert!(largest_external_contour(&GrayImage::new(8, 8)).is_none());
  }

  #[test]
  fn shoelace_area() {
    let points = [
      Point::new(0, 0),
      Point::new(4, 0),
      Point::new(4, 3),
      Point::new(0, 3),
    ];
    assert_eq!(polygon_area(&points), 12.0);
  }
}
