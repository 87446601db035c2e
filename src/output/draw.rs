// 该文件是 Chepai （车牌闸口） 项目的一部分。
// src/output/draw.rs - 车牌定位结果可视化
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

use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

use crate::gate::{FrameOutcome, FrameStatus};
use crate::session::Observation;

const BOX_THICKNESS: u32 = 2;
/// 放行时在框上方绘制的色条高度
const BANNER_HEIGHT: u32 = 6;

pub struct Draw {
  thickness: u32,
  emitted: Rgb<u8>,
  tracking: Rgb<u8>,
  rejected: Rgb<u8>,
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      thickness: BOX_THICKNESS,
      emitted: Rgb([0, 255, 0]),
      tracking: Rgb([255, 200, 0]),
      rejected: Rgb([255, 0, 0]),
    }
  }
}

impl Draw {
  fn color_of(&self, status: &FrameStatus) -> Rgb<u8> {
    match status {
      FrameStatus::Observed(Observation::Emit { .. }) => self.emitted,
      FrameStatus::Observed(_) => self.tracking,
      _ => self.rejected,
    }
  }

  /// 在帧上画出定位框；没有定位框时原样返回
  pub fn draw_outcome(&self, image: &mut RgbImage, outcome: &FrameOutcome) {
    let Some(bbox) = outcome
      .bbox
      .and_then(|b| b.clamp_to(image.width(), image.height()))
    else {
      return;
    };
    let color = self.color_of(&outcome.status);

    // 每一圈向内收缩 1 像素
    for t in 0..self.thickness {
      if bbox.width <= 2 * t || bbox.height <= 2 * t {
        break;
      }
      let rect = Rect::at((bbox.x + t) as i32, (bbox.y + t) as i32)
        .of_size(bbox.width - 2 * t, bbox.height - 2 * t);
      draw_hollow_rect_mut(image, rect, color);
    }

    if outcome.is_emitted() && bbox.y >= BANNER_HEIGHT {
      let banner = Rect::at(bbox.x as i32, (bbox.y - BANNER_HEIGHT) as i32)
        .of_size(bbox.width, BANNER_HEIGHT);
      draw_filled_rect_mut(image, banner, color);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::frame::BoundingBox;

  #[test]
  fn rejected_box_is_red() {
    let mut image = RgbImage::new(100, 60);
    let outcome = FrameOutcome {
      frame_index: 0,
      bbox: Some(BoundingBox::new(10, 20, 40, 20)),
      status: FrameStatus::Invalid {
        raw: "HELLO".to_string(),
      },
      entry: None,
    };
    Draw::default().draw_outcome(&mut image, &outcome);
    assert_eq!(image.get_pixel(10, 20).0, [255, 0, 0]);
    assert_eq!(image.get_pixel(11, 21).0, [255, 0, 0]);
    assert_eq!(image.get_pixel(30, 30).0, [0, 0, 0]);
  }

  #[test]
  fn no_box_leaves_image_untouched() {
    let mut image = RgbImage::new(10, 10);
    let outcome = FrameOutcome {
      frame_index: 0,
      bbox: None,
      status: FrameStatus::NotDetected,
      entry: None,
    };
    Draw::default().draw_outcome(&mut image, &outcome);
    assert!(image.pixels().all(|p| p.0 == [0, 0, 0]));
  }
}
