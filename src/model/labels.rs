// 该文件是 Guanzhao （观照） 项目的一部分。
// src/model/labels.rs - COCO 类别
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

use crate::model::WithLabel;

/// torchvision 检测模型使用的 91 类 COCO 类别表，下标即类别 ID
pub const COCO_CATEGORY_NAMES: [&str; 91] = [
  "__background__",
  "person",
  "bicycle",
  "car",
  "motorcycle",
  "airplane",
  "bus",
  "train",
  "truck",
  "boat",
  "traffic light",
  "fire hydrant",
  "N/A",
  "stop sign",
  "parking meter",
  "bench",
  "bird",
  "cat",
  "dog",
  "horse",
  "sheep",
  "cow",
  "elephant",
  "bear",
  "zebra",
  "giraffe",
  "N/A",
  "backpack",
  "umbrella",
  "N/A",
  "N/A",
  "handbag",
  "tie",
  "suitcase",
  "frisbee",
  "skis",
  "snowboard",
  "sports ball",
  "kite",
  "baseball bat",
  "baseball glove",
  "skateboard",
  "surfboard",
  "tennis racket",
  "bottle",
  "N/A",
  "wine glass",
  "cup",
  "fork",
  "knife",
  "spoon",
  "bowl",
  "banana",
  "apple",
  "sandwich",
  "orange",
  "broccoli",
  "carrot",
  "hot dog",
  "pizza",
  "donut",
  "cake",
  "chair",
  "couch",
  "potted plant",
  "bed",
  "N/A",
  "dining table",
  "N/A",
  "N/A",
  "toilet",
  "N/A",
  "tv",
  "laptop",
  "mouse",
  "remote",
  "keyboard",
  "cell phone",
  "microwave",
  "oven",
  "toaster",
  "sink",
  "refrigerator",
  "N/A",
  "book",
  "clock",
  "vase",
  "scissors",
  "teddy bear",
  "hair drier",
  "toothbrush",
];

pub const PERSON_CATEGORY: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CocoCategory(u32);

impl CocoCategory {
  pub fn is_person(&self) -> bool {
    self.0 == PERSON_CATEGORY
  }
}

impl WithLabel for CocoCategory {
  fn to_label_str(&self) -> String {
    match COCO_CATEGORY_NAMES.get(self.0 as usize) {
      Some(name) => name.to_string(),
      None => format!("class {}", self.0),
    }
  }

  fn from_label_id(id: u32) -> Self {
    CocoCategory(id)
  }

  fn to_label_id(&self) -> u32 {
    self.0
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn names_follow_torchvision_ids() {
    assert_eq!(CocoCategory::from_label_id(1).to_label_str(), "person");
    assert_eq!(CocoCategory::from_label_id(3).to_label_str(), "car");
    assert_eq!(CocoCategory::from_label_id(90).to_label_str(), "toothbrush");
    assert_eq!(CocoCategory::from_label_id(120).to_label_str(), "class 120");
    assert!(CocoCategory::from_label_id(PERSON_CATEGORY).is_person());
  }
}
