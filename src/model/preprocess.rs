// 该文件是 Chepai （车牌闸口） 项目的一部分。
// src/model/preprocess.rs - 车牌区域预处理
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

//! # 区域预处理
//!
//! 把裁出的车牌区域整理成适合 OCR 的二值图，依次执行：
//!
//! 1. 灰度化，按 `scale_height` 放大
//! 2. 双边滤波去噪
//! 3. CLAHE 局部对比度增强
//! 4. 顶帽 / 黑帽增强
//! 5. 3x3 锐化
//! 6. 自适应阈值（反相二值，笔画为前景）
//! 7. 小核开运算去除噪点
//! 8. 可选：裁剪到最大的笔画轮廓
//!
//! 最终图像为白底黑字。

use image::{GrayImage, Luma, RgbImage, imageops};
use imageproc::{
  contours::{BorderType, find_contours},
  contrast::adaptive_threshold,
  distance_transform::Norm,
  filter::{
    bilateral::{GaussianEuclideanColorDistance, bilateral_filter},
    filter_clamped,
  },
  kernel::Kernel,
  morphology::{self, Mask, grayscale_close, grayscale_dilate, grayscale_open},
};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
  pub min_region_width: u32,
  pub min_region_height: u32,
  /// 滤波前把区域放大到的高度，0 表示保持原尺寸
  pub scale_height: u32,
  pub bilateral_radius: u8,
  pub bilateral_sigma_color: f32,
  pub bilateral_sigma_space: f32,
  pub clahe_clip_limit: f32,
  pub clahe_tiles: (u32, u32),
  /// 顶帽结构元半径，0 表示跳过
  pub tophat_radius: u8,
  pub sharpen_kernel: [f32; 9],
  pub threshold_radius: u32,
  pub threshold_offset: i32,
  /// 开运算半径，0 表示跳过
  pub opening_radius: u8,
  pub crop_to_contour: bool,
  pub contour_padding: u32,
}

impl Default for PreprocessConfig {
  fn default() -> Self {
    Self {
      min_region_width: 30,
      min_region_height: 10,
      scale_height: 96,
      bilateral_radius: 4,
      bilateral_sigma_color: 17.0,
      bilateral_sigma_space: 17.0,
      clahe_clip_limit: 2.0,
      clahe_tiles: (8, 8),
      tophat_radius: 8,
      sharpen_kernel: [0.0, -1.0, 0.0, -1.0, 5.0, -1.0, 0.0, -1.0, 0.0],
      threshold_radius: 15,
      threshold_offset: 10,
      opening_radius: 1,
      crop_to_contour: true,
      contour_padding: 6,
    }
  }
}

#[derive(Debug, Clone, Default)]
pub struct Preprocessor {
  config: PreprocessConfig,
}

impl Preprocessor {
  pub fn new(config: PreprocessConfig) -> Self {
    Self { config }
  }

  pub fn config(&self) -> &PreprocessConfig {
    &self.config
  }

  /// 区域是否满足最小尺寸要求
  pub fn accepts(&self, width: u32, height: u32) -> bool {
    width >= self.config.min_region_width && height >= self.config.min_region_height
  }

  /// 区域过小时返回 None
  pub fn prepare(&self, region: &RgbImage) -> Option<GrayImage> {
    let (w, h) = region.dimensions();
    if !self.accepts(w, h) {
      debug!(
        "区域 {}x{} 小于最小尺寸 {}x{}",
        w, h, self.config.min_region_width, self.config.min_region_height
      );
      return None;
    }
    Some(self.process_gray(imageops::grayscale(region)))
  }

  pub fn process_gray(&self, gray: GrayImage) -> GrayImage {
    let cfg = &self.config;

    let gray = upscale(gray, cfg.scale_height);
    let gray = bilateral(
      &gray,
      cfg.bilateral_radius,
      cfg.bilateral_sigma_color,
      cfg.bilateral_sigma_space,
    );
    let gray = clahe(&gray, cfg.clahe_tiles.0, cfg.clahe_tiles.1, cfg.clahe_clip_limit);
    let gray = tophat_enhance(&gray, cfg.tophat_radius);
    let gray = sharpen(&gray, &cfg.sharpen_kernel);

    let mut ink = adaptive_threshold_inv(&gray, cfg.threshold_radius, cfg.threshold_offset);
    if cfg.opening_radius > 0 {
      ink = morphology::open(&ink, Norm::LInf, cfg.opening_radius);
    }
    if cfg.crop_to_contour {
      ink = crop_to_largest_contour(ink, cfg.contour_padding);
    }

    imageops::invert(&mut ink);
    ink
  }
}

fn upscale(gray: GrayImage, target_height: u32) -> GrayImage {
  let (w, h) = gray.dimensions();
  if target_height == 0 || h == 0 || h == target_height {
    return gray;
  }
  let target_width = ((w as f64 * target_height as f64 / h as f64).round() as u32).max(1);
  imageops::resize(&gray, target_width, target_height, imageops::FilterType::CatmullRom)
}

/// 双边滤波，颜色权重为灰度差的高斯核
pub fn bilateral(gray: &GrayImage, radius: u8, sigma_color: f32, sigma_space: f32) -> GrayImage {
  if radius == 0 || sigma_color <= 0.0 || sigma_space <= 0.0 {
    return gray.clone();
  }
  bilateral_filter(
    gray,
    radius,
    sigma_space,
    GaussianEuclideanColorDistance::new(sigma_color),
  )
}

/// 限制对比度的自适应直方图均衡，块间双线性插值
pub fn clahe(gray: &GrayImage, tiles_x: u32, tiles_y: u32, clip_limit: f32) -> GrayImage {
  let (w, h) = gray.dimensions();
  if w == 0 || h == 0 || tiles_x == 0 || tiles_y == 0 {
    return gray.clone();
  }
  let tile_w = w / tiles_x;
  let tile_h = h / tiles_y;
  if tile_w == 0 || tile_h == 0 {
    return gray.clone();
  }

  let mut maps = vec![[0u8; 256]; (tiles_x * tiles_y) as usize];
  for ty in 0..tiles_y {
    for tx in 0..tiles_x {
      let x0 = tx * tile_w;
      let y0 = ty * tile_h;
      let x1 = if tx == tiles_x - 1 { w } else { x0 + tile_w };
      let y1 = if ty == tiles_y - 1 { h } else { y0 + tile_h };
      let pixels = (x1 - x0) * (y1 - y0);

      let mut hist = [0u32; 256];
      for y in y0..y1 {
        for x in x0..x1 {
          hist[gray.get_pixel(x, y)[0] as usize] += 1;
        }
      }

      let clip = ((clip_limit * pixels as f32 / 256.0) as u32).max(1);
      let mut excess = 0u32;
      for bin in hist.iter_mut() {
        if *bin > clip {
          excess += *bin - clip;
          *bin = clip;
        }
      }
      let per_bin = excess / 256;
      let remainder = (excess % 256) as usize;
      for (i, bin) in hist.iter_mut().enumerate() {
        *bin += per_bin + u32::from(i < remainder);
      }

      let mut cdf = [0u32; 256];
      let mut running = 0u32;
      for (i, bin) in hist.iter().enumerate() {
        running += bin;
        cdf[i] = running;
      }
      let cdf_min = cdf.iter().copied().find(|&v| v > 0).unwrap_or(0);
      let denom = cdf[255].saturating_sub(cdf_min);

      let map = &mut maps[(ty * tiles_x + tx) as usize];
      for (i, slot) in map.iter_mut().enumerate() {
        *slot = if denom == 0 {
          i as u8
        } else {
          let v = cdf[i].saturating_sub(cdf_min) as f32 / denom as f32 * 255.0;
          v.min(255.0) as u8
        };
      }
    }
  }

  // 像素落在相邻四个块中心之间，按距离插值
  let tw = tile_w as f32;
  let th = tile_h as f32;
  GrayImage::from_fn(w, h, |x, y| {
    let v = gray.get_pixel(x, y)[0] as usize;
    let fx = ((x as f32 + 0.5) / tw - 0.5).clamp(0.0, (tiles_x - 1) as f32);
    let fy = ((y as f32 + 0.5) / th - 0.5).clamp(0.0, (tiles_y - 1) as f32);
    let tx0 = fx.floor() as u32;
    let ty0 = fy.floor() as u32;
    let tx1 = (tx0 + 1).min(tiles_x - 1);
    let ty1 = (ty0 + 1).min(tiles_y - 1);
    let ax = fx - tx0 as f32;
    let ay = fy - ty0 as f32;

    let m = |tx: u32, ty: u32| maps[(ty * tiles_x + tx) as usize][v] as f32;
    let top = m(tx0, ty0) * (1.0 - ax) + m(tx1, ty0) * ax;
    let bottom = m(tx0, ty1) * (1.0 - ax) + m(tx1, ty1) * ax;
    Luma([(top * (1.0 - ay) + bottom * ay).round().clamp(0.0, 255.0) as u8])
  })
}

/// 以 (rx, ry) 为半径的矩形结构元
fn rect_mask(rx: u8, ry: u8) -> Mask {
  let shape = GrayImage::from_pixel(2 * rx as u32 + 1, 2 * ry as u32 + 1, Luma([255]));
  Mask::from_image(&shape, rx, ry)
}

/// gray + tophat - blackhat：亮细节更亮，暗笔画更暗
pub fn tophat_enhance(gray: &GrayImage, radius: u8) -> GrayImage {
  if radius == 0 {
    return gray.clone();
  }
  let mask = Mask::square(radius);
  let opened = grayscale_open(gray, &mask);
  let closed = grayscale_close(gray, &mask);

  GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
    let g = gray.get_pixel(x, y)[0] as i32;
    let tophat = g - opened.get_pixel(x, y)[0] as i32;
    let blackhat = closed.get_pixel(x, y)[0] as i32 - g;
    Luma([(g + tophat - blackhat).clamp(0, 255) as u8])
  })
}

/// 3x3 卷积，边缘像素按最近邻延拓
pub fn sharpen(gray: &GrayImage, kernel: &[f32; 9]) -> GrayImage {
  filter_clamped::<_, f32, u8>(gray, Kernel::new(&kernel[..], 3, 3))
}

/// 反相二值化：低于局部均值减 offset 的像素为前景 255
pub fn adaptive_threshold_inv(gray: &GrayImage, radius: u32, offset: i32) -> GrayImage {
  let mut ink = adaptive_threshold(gray, radius.max(1), offset);
  imageops::invert(&mut ink);
  ink
}

/// 把前景笔画横向连成文本行，取外轮廓包围盒最大的一块
fn crop_to_largest_contour(ink: GrayImage, padding: u32) -> GrayImage {
  let (w, h) = ink.dimensions();
  let reach = (h / 3).clamp(1, u8::MAX as u32) as u8;
  let joined = grayscale_dilate(&ink, &rect_mask(reach, 1));
  let contours = find_contours::<u32>(&joined);

  let best = contours
    .iter()
    .filter(|c| c.border_type == BorderType::Outer && !c.points.is_empty())
    .map(|c| {
      let (mut x0, mut y0, mut x1, mut y1) = (u32::MAX, u32::MAX, 0u32, 0u32);
      for p in &c.points {
        x0 = x0.min(p.x);
        y0 = y0.min(p.y);
        x1 = x1.max(p.x);
        y1 = y1.max(p.y);
      }
      (x0, y0, x1, y1)
    })
    .max_by_key(|(x0, y0, x1, y1)| (x1 - x0 + 1) as u64 * (y1 - y0 + 1) as u64);

  let Some((x0, y0, x1, y1)) = best else {
    return ink;
  };
  let x0 = x0.saturating_sub(padding);
  let y0 = y0.saturating_sub(padding);
  let x1 = (x1 + padding).min(w - 1);
  let y1 = (y1 + padding).min(h - 1);
  debug!("裁剪到轮廓 ({}, {}) - ({}, {})", x0, y0, x1, y1);
  imageops::crop_imm(&ink, x0, y0, x1 - x0 + 1, y1 - y0 + 1).to_image()
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  /// 白底上画几根黑色竖条，近似车牌字符
  fn synthetic_plate(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
      let in_band = y > height / 4 && y < height * 3 / 4;
      let in_stroke = (x / 6) % 3 == 1 && x > width / 8 && x < width * 7 / 8;
      if in_band && in_stroke {
        Rgb([20, 20, 20])
      } else {
        Rgb([230, 230, 230])
      }
    })
  }

  #[test]
  fn small_regions_are_rejected() {
    let pre = Preprocessor::default();
    assert!(pre.prepare(&RgbImage::new(29, 40)).is_none());
    assert!(pre.prepare(&RgbImage::new(100, 9)).is_none());
    assert!(pre.accepts(30, 10));
  }

  #[test]
  fn output_is_binary_and_scaled() {
    let pre = Preprocessor::new(PreprocessConfig {
      crop_to_contour: false,
      ..PreprocessConfig::default()
    });
    let out = pre.prepare(&synthetic_plate(120, 32)).unwrap();
    assert_eq!(out.height(), 96);
    assert_eq!(out.width(), 360);
    assert!(out.pixels().all(|p| p[0] == 0 || p[0] == 255));
  }

  #[test]
  fn strokes_become_black_ink_on_white() {
    let pre = Preprocessor::default();
    let out = pre.prepare(&synthetic_plate(120, 32)).unwrap();
    let black = out.pixels().filter(|p| p[0] == 0).count();
    let white = out.pixels().filter(|p| p[0] == 255).count();
    assert!(black > 0, "没有笔画");
    assert!(white > black, "背景应为白色");
  }

  #[test]
  fn blank_region_has_no_ink() {
    let pre = Preprocessor::default();
    let blank = RgbImage::from_pixel(80, 24, Rgb([200, 200, 200]));
    let out = pre.prepare(&blank).unwrap();
    assert!(out.pixels().all(|p| p[0] == 255));
  }

  #[test]
  fn clahe_keeps_uniform_image_uniform() {
    let gray = GrayImage::from_pixel(64, 64, Luma([128]));
    let out = clahe(&gray, 8, 8, 2.0);
    let first = out.get_pixel(0, 0)[0];
    assert!(out.pixels().all(|p| p[0] == first));
  }

  #[test]
  fn bilateral_preserves_edges() {
    let gray = GrayImage::from_fn(20, 10, |x, _| if x < 10 { Luma([0]) } else { Luma([255]) });
    let out = bilateral(&gray, 3, 10.0, 5.0);
    assert!(out.get_pixel(8, 5)[0] < 5);
    assert!(out.get_pixel(11, 5)[0] > 250);
  }

  #[test]
  fn identity_kernel_keeps_pixels() {
    let gray = GrayImage::from_fn(12, 8, |x, y| Luma([(x * 20 + y) as u8]));
    let identity = [0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0];
    assert_eq!(sharpen(&gray, &identity), gray);
  }

  #[test]
  fn dark_stroke_becomes_foreground() {
    let gray = GrayImage::from_fn(40, 20, |x, _| if (18..22).contains(&x) { Luma([30]) } else { Luma([220]) });
    let ink = adaptive_threshold_inv(&gray, 5, 10);
    assert_eq!(ink.get_pixel(20, 10)[0], 255);
    assert_eq!(ink.get_pixel(5, 10)[0], 0);

    let enhanced = tophat_enhance(&gray, 3);
    assert!(enhanced.get_pixel(20, 10)[0] <= 30);
  }
}
