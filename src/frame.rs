// 该文件是 Chepai （车牌闸口） 项目的一部分。
// src/frame.rs - 帧与候选区域定义
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

use image::{GrayImage, RgbImage, imageops};

/// 帧数据，只在一次流水线处理中存活
#[derive(Debug, Clone)]
pub struct Frame {
  /// RGB 图像数据
  pub image: RgbImage,
  /// 帧索引
  pub index: u64,
  /// 时间戳（毫秒）
  pub timestamp_ms: u64,
}

impl Frame {
  pub fn new(image: RgbImage, index: u64, timestamp_ms: u64) -> Self {
    Self {
      image,
      index,
      timestamp_ms,
    }
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }

  pub fn to_gray(&self) -> GrayImage {
    imageops::grayscale(&self.image)
  }
}

/// 轴对齐的矩形框，像素坐标
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BoundingBox {
  pub x: u32,
  pub y: u32,
  pub width: u32,
  pub height: u32,
}

impl BoundingBox {
  pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
    Self {
      x,
      y,
      width,
      height,
    }
  }

  pub fn area(&self) -> u64 {
    self.width as u64 * self.height as u64
  }

  pub fn right(&self) -> u32 {
    self.x + self.width
  }

  pub fn bottom(&self) -> u32 {
    self.y + self.height
  }

  /// 裁剪到给定尺寸的图像范围内，完全落在外面时返回 None
  pub fn clamp_to(&self, width: u32, height: u32) -> Option<BoundingBox> {
    if self.x >= width || self.y >= height {
      return None;
    }
    let w = self.width.min(width - self.x);
    let h = self.height.min(height - self.y);
    if w == 0 || h == 0 {
      return None;
    }
    Some(BoundingBox::new(self.x, self.y, w, h))
  }
}

/// 候选车牌区域：矩形框及其包含的像素
#[derive(Debug, Clone)]
pub struct Region {
  pub bbox: BoundingBox,
  pub image: RgbImage,
}

impl Region {
  /// 从帧中裁出区域，矩形框会先被限制在帧内
  pub fn crop(frame: &RgbImage, bbox: BoundingBox) -> Option<Region> {
    let bbox = bbox.clamp_to(frame.width(), frame.height())?;
    let image = imageops::crop_imm(frame, bbox.x, bbox.y, bbox.width, bbox.height).to_image();
    Some(Region { bbox, image })
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn clamp_keeps_box_inside_frame() {
    let bbox = BoundingBox::new(90, 40, 30, 30);
    let clamped = bbox.clamp_to(100, 50).unwrap();
    assert_eq!(clamped, BoundingBox::new(90, 40, 10, 10));
    assert!(BoundingBox::new(100, 0, 5, 5).clamp_to(100, 50).is_none());
  }

  #[test]
  fn crop_copies_enclosed_pixels() {
    let mut image = RgbImage::new(20, 10);
    image.put_pixel(5, 5, image::Rgb([200, 10, 10]));
    let region = Region::crop(&image, BoundingBox::new(4, 4, 4, 4)).unwrap();
    assert_eq!(region.width(), 4);
    assert_eq!(region.image.get_pixel(1, 1).0, [200, 10, 10]);
  }
}
