// 该文件是 Chepai （车牌闸口） 项目的一部分。
// src/model/locator.rs - 车牌定位
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

use std::path::PathBuf;

use image::{GrayImage, RgbImage, imageops};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::cascade::{CascadeError, DetectParams, HaarCascade};
use crate::frame::BoundingBox;

/// 候选框检测器
pub trait PlateDetector {
  fn detect(&self, gray: &GrayImage) -> Vec<BoundingBox>;
}

impl<D: PlateDetector + ?Sized> PlateDetector for Box<D> {
  fn detect(&self, gray: &GrayImage) -> Vec<BoundingBox> {
    (**self).detect(gray)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocatorConfig {
  /// 级联模型 XML 路径
  pub cascade: PathBuf,
  pub scale_factor: f64,
  pub min_neighbors: u32,
  pub min_area: u64,
  pub max_area: u64,
  pub min_size: Option<(u32, u32)>,
  pub max_size: Option<(u32, u32)>,
}

impl Default for LocatorConfig {
  fn default() -> Self {
    Self {
      cascade: PathBuf::from("model/haarcascade_russian_plate_number.xml"),
      scale_factor: 1.1,
      min_neighbors: 4,
      min_area: 500,
      max_area: 120_000,
      min_size: None,
      max_size: None,
    }
  }
}

impl LocatorConfig {
  pub fn detect_params(&self) -> DetectParams {
    DetectParams {
      scale_factor: self.scale_factor,
      min_neighbors: self.min_neighbors,
      min_size: self.min_size,
      max_size: self.max_size,
    }
  }
}

/// 基于 Haar 级联模型的检测器
#[derive(Debug, Clone)]
pub struct HaarCascadeDetector {
  cascade: HaarCascade,
  params: DetectParams,
}

impl HaarCascadeDetector {
  pub fn new(cascade: HaarCascade, params: DetectParams) -> Self {
    Self { cascade, params }
  }

  pub fn from_config(config: &LocatorConfig) -> Result<Self, CascadeError> {
    let cascade = HaarCascade::from_file(&config.cascade)?;
    Ok(Self::new(cascade, config.detect_params()))
  }
}

impl PlateDetector for HaarCascadeDetector {
  fn detect(&self, gray: &GrayImage) -> Vec<BoundingBox> {
    self.cascade.detect_multi_scale(gray, &self.params)
  }
}

/// 在检测结果中挑选面积最大的框，并按面积区间过滤
pub struct PlateLocator<D> {
  detector: D,
  min_area: u64,
  max_area: u64,
}

impl<D: PlateDetector> PlateLocator<D> {
  pub fn new(detector: D, min_area: u64, max_area: u64) -> Self {
    Self {
      detector,
      min_area,
      max_area,
    }
  }

  pub fn with_config(detector: D, config: &LocatorConfig) -> Self {
    Self::new(detector, config.min_area, config.max_area)
  }

  pub fn detector(&self) -> &D {
    &self.detector
  }

  pub fn area_in_band(&self, area: u64) -> bool {
    (self.min_area..=self.max_area).contains(&area)
  }

  /// 返回的矩形框已限制在图像范围内
  pub fn locate(&self, image: &RgbImage) -> Option<BoundingBox> {
    let gray = imageops::grayscale(image);
    self.locate_gray(&gray)
  }

  pub fn locate_gray(&self, gray: &GrayImage) -> Option<BoundingBox> {
    let boxes = self.detector.detect(gray);
    debug!("检测到 {} 个候选框", boxes.len());
    let (w, h) = gray.dimensions();
    let largest = boxes
      .into_iter()
      .filter_map(|b| b.clamp_to(w, h))
      .max_by_key(|b| b.area())?;
    let area = largest.area();
    if !self.area_in_band(area) {
      debug!(
        "最大候选框面积 {} 不在 [{}, {}] 范围内",
        area, self.min_area, self.max_area
      );
      return None;
    }
    Some(largest)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  struct Fixed(Vec<BoundingBox>);

  impl PlateDetector for Fixed {
    fn detect(&self, _gray: &GrayImage) -> Vec<BoundingBox> {
      self.0.clone()
    }
  }

  #[test]
  fn largest_box_wins() {
    let locator = PlateLocator::new(
      Fixed(vec![
        BoundingBox::new(0, 0, 30, 20),
        BoundingBox::new(50, 50, 60, 20),
        BoundingBox::new(10, 10, 40, 20),
      ]),
      500,
      120_000,
    );
    let image = RgbImage::new(200, 200);
    assert_eq!(locator.locate(&image), Some(BoundingBox::new(50, 50, 60, 20)));
  }

  #[test]
  fn area_outside_band_is_rejected() {
    let image = RgbImage::new(400, 400);
    let small = PlateLocator::new(Fixed(vec![BoundingBox::new(0, 0, 20, 20)]), 500, 120_000);
    assert_eq!(small.locate(&image), None);

    let large = PlateLocator::new(Fixed(vec![BoundingBox::new(0, 0, 400, 400)]), 500, 120_000);
    assert_eq!(large.locate(&image), None);
  }

  #[test]
  fn largest_box_too_big_does_not_fall_back() {
    let image = RgbImage::new(400, 400);
    let locator = PlateLocator::new(
      Fixed(vec![
        BoundingBox::new(0, 0, 400, 400),
        BoundingBox::new(0, 0, 60, 20),
      ]),
      500,
      120_000,
    );
    assert_eq!(locator.locate(&image), None);
  }

  #[test]
  fn no_detection_yields_none() {
    let locator = PlateLocator::new(Fixed(Vec::new()), 500, 120_000);
    assert_eq!(locator.locate(&RgbImage::new(10, 10)), None);
  }

  #[test]
  fn area_is_checked_after_clamping() {
    // 原始面积 4000，限制在图像内后只剩 20x20
    let locator = PlateLocator::new(Fixed(vec![BoundingBox::new(180, 180, 100, 40)]), 500, 120_000);
    assert_eq!(locator.locate(&RgbImage::new(200, 200)), None);

    let inside = PlateLocator::new(Fixed(vec![BoundingBox::new(150, 180, 100, 40)]), 500, 120_000);
    assert_eq!(
      inside.locate(&RgbImage::new(200, 200)),
      Some(BoundingBox::new(150, 180, 50, 20))
    );
  }
}
