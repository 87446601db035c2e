// 该文件是 Chepai （车牌闸口） 项目的一部分。
// src/model/cascade.rs - Haar 级联分类器
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

//! # Haar 级联检测
//!
//! 读取 OpenCV `opencv-cascade-classifier` 格式（BOOST + HAAR）的 XML 模型，
//! 在灰度图像金字塔上滑窗评估，最后按 OpenCV `groupRectangles` 的规则
//! 合并相邻窗口。
//!
//! 只支持直立特征（`tilted = 0`），旧版 `<size>` 格式的模型会被拒绝。

use std::path::Path;

use image::{GrayImage, ImageBuffer, Luma, imageops};
use imageproc::integral_image::{integral_image, integral_squared_image};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::frame::BoundingBox;

/// OpenCV 默认的合并阈值
const GROUP_EPS: f64 = 0.2;

#[derive(Error, Debug)]
pub enum CascadeError {
  #[error("模型加载错误: {0}")]
  ModelLoadError(#[from] std::io::Error),
  #[error("XML 解析错误: {0}")]
  XmlError(#[from] quick_xml::DeError),
  #[error("模型无效: {0}")]
  ModelInvalid(String),
  #[error("不支持的模型: {0}")]
  Unsupported(String),
}

impl CascadeError {
  fn invalid(msg: impl Into<String>) -> Self {
    CascadeError::ModelInvalid(msg.into())
  }
}

// ---- XML 结构 ----

#[derive(Debug, Deserialize)]
struct CascadeDocument {
  cascade: CascadeXml,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CascadeXml {
  stage_type: String,
  feature_type: String,
  height: u32,
  width: u32,
  stages: Items<StageXml>,
  features: Items<FeatureXml>,
}

#[derive(Debug, Deserialize)]
struct Items<T> {
  #[serde(rename = "_", default = "Vec::new")]
  items: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StageXml {
  stage_threshold: f64,
  weak_classifiers: Items<WeakXml>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WeakXml {
  internal_nodes: String,
  leaf_values: String,
}

#[derive(Debug, Deserialize)]
struct FeatureXml {
  rects: Items<String>,
  #[serde(default)]
  tilted: u8,
}

// ---- 运行时结构 ----

#[derive(Debug, Clone, Copy, PartialEq)]
struct WeightedRect {
  x: u32,
  y: u32,
  width: u32,
  height: u32,
  weight: f64,
}

#[derive(Debug, Clone, PartialEq)]
struct Feature {
  rects: Vec<WeightedRect>,
}

/// 决策树节点；left/right 小于等于 0 时表示叶子下标的相反数
#[derive(Debug, Clone, Copy, PartialEq)]
struct Node {
  left: i32,
  right: i32,
  feature: usize,
  threshold: f64,
}

#[derive(Debug, Clone, PartialEq)]
struct WeakClassifier {
  nodes: Vec<Node>,
  leaves: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
struct Stage {
  threshold: f64,
  classifiers: Vec<WeakClassifier>,
}

/// 多尺度检测参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectParams {
  /// 金字塔相邻两层的缩放比例，必须大于 1
  pub scale_factor: f64,
  /// 一个结果至少需要的相邻窗口数
  pub min_neighbors: u32,
  /// 最小检测尺寸（宽, 高），默认为模型窗口大小
  pub min_size: Option<(u32, u32)>,
  /// 最大检测尺寸（宽, 高），默认为图像大小
  pub max_size: Option<(u32, u32)>,
}

impl Default for DetectParams {
  fn default() -> Self {
    Self {
      scale_factor: 1.1,
      min_neighbors: 4,
      min_size: None,
      max_size: None,
    }
  }
}

type IntegralImage = ImageBuffer<Luma<u64>, Vec<u64>>;

/// 已加载的 Haar 级联模型
#[derive(Debug, Clone, PartialEq)]
pub struct HaarCascade {
  width: u32,
  height: u32,
  stages: Vec<Stage>,
  features: Vec<Feature>,
}

fn parse_numbers<T: std::str::FromStr>(text: &str, what: &str) -> Result<Vec<T>, CascadeError> {
  text
    .split_whitespace()
    .map(|t| {
      t.parse::<T>()
        .map_err(|_| CascadeError::invalid(format!("{} 中存在无法解析的数值 '{}'", what, t)))
    })
    .collect()
}

impl HaarCascade {
  pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CascadeError> {
    let path = path.as_ref();
    info!("加载级联模型: {}", path.display());
    let xml = std::fs::read_to_string(path)?;
    Self::from_xml(&xml)
  }

  pub fn from_xml(xml: &str) -> Result<Self, CascadeError> {
    let doc: CascadeDocument = quick_xml::de::from_str(xml)?;
    let cascade = doc.cascade;

    if !cascade.stage_type.trim().eq_ignore_ascii_case("BOOST") {
      return Err(CascadeError::Unsupported(format!(
        "stageType = {}",
        cascade.stage_type.trim()
      )));
    }
    if !cascade.feature_type.trim().eq_ignore_ascii_case("HAAR") {
      return Err(CascadeError::Unsupported(format!(
        "featureType = {}",
        cascade.feature_type.trim()
      )));
    }
    if cascade.width < 3 || cascade.height < 3 {
      return Err(CascadeError::invalid(format!(
        "窗口尺寸过小: {}x{}",
        cascade.width, cascade.height
      )));
    }

    let mut features = Vec::with_capacity(cascade.features.items.len());
    for (idx, f) in cascade.features.items.iter().enumerate() {
      if f.tilted != 0 {
        return Err(CascadeError::Unsupported(format!("特征 {} 为倾斜特征", idx)));
      }
      let mut rects = Vec::with_capacity(f.rects.items.len());
      for r in &f.rects.items {
        let v: Vec<f64> = parse_numbers(r, "rects")?;
        if v.len() != 5 {
          return Err(CascadeError::invalid(format!("特征 {} 的矩形格式错误", idx)));
        }
        let rect = WeightedRect {
          x: v[0] as u32,
          y: v[1] as u32,
          width: v[2] as u32,
          height: v[3] as u32,
          weight: v[4],
        };
        if rect.x + rect.width > cascade.width || rect.y + rect.height > cascade.height {
          return Err(CascadeError::invalid(format!("特征 {} 超出检测窗口", idx)));
        }
        rects.push(rect);
      }
      features.push(Feature { rects });
    }

    let mut stages = Vec::with_capacity(cascade.stages.items.len());
    for (sidx, s) in cascade.stages.items.iter().enumerate() {
      let mut classifiers = Vec::with_capacity(s.weak_classifiers.items.len());
      for w in &s.weak_classifiers.items {
        let raw: Vec<f64> = parse_numbers(&w.internal_nodes, "internalNodes")?;
        if raw.is_empty() || raw.len() % 4 != 0 {
          return Err(CascadeError::invalid(format!("阶段 {} 的节点数据长度错误", sidx)));
        }
        let nodes: Vec<Node> = raw
          .chunks(4)
          .map(|c| Node {
            left: c[0] as i32,
            right: c[1] as i32,
            feature: c[2] as usize,
            threshold: c[3],
          })
          .collect();
        let leaves: Vec<f64> = parse_numbers(&w.leaf_values, "leafValues")?;

        for node in &nodes {
          if node.feature >= features.len() {
            return Err(CascadeError::invalid(format!(
              "阶段 {} 引用了不存在的特征 {}",
              sidx, node.feature
            )));
          }
          for child in [node.left, node.right] {
            let ok = if child <= 0 {
              ((-child) as usize) < leaves.len()
            } else {
              (child as usize) < nodes.len()
            };
            if !ok {
              return Err(CascadeError::invalid(format!("阶段 {} 的决策树结构错误", sidx)));
            }
          }
        }
        classifiers.push(WeakClassifier { nodes, leaves });
      }
      stages.push(Stage {
        threshold: s.stage_threshold,
        classifiers,
      });
    }

    if stages.is_empty() {
      return Err(CascadeError::invalid("模型没有任何阶段"));
    }

    debug!(
      "级联模型: 窗口 {}x{}, {} 个阶段, {} 个特征",
      cascade.width,
      cascade.height,
      stages.len(),
      features.len()
    );

    Ok(HaarCascade {
      width: cascade.width,
      height: cascade.height,
      stages,
      features,
    })
  }

  pub fn window_size(&self) -> (u32, u32) {
    (self.width, self.height)
  }

  pub fn stage_count(&self) -> usize {
    self.stages.len()
  }

  /// 在灰度图上做多尺度检测，返回合并后的矩形
  pub fn detect_multi_scale(&self, gray: &GrayImage, params: &DetectParams) -> Vec<BoundingBox> {
    let raw = self.detect_raw(gray, params);
    debug!("级联检测原始窗口数: {}", raw.len());
    group_rectangles(&raw, params.min_neighbors, GROUP_EPS)
  }

  /// 不做合并的原始命中窗口
  pub fn detect_raw(&self, gray: &GrayImage, params: &DetectParams) -> Vec<BoundingBox> {
    let (img_w, img_h) = gray.dimensions();
    let mut hits = Vec::new();
    if params.scale_factor <= 1.0 || img_w < self.width || img_h < self.height {
      return hits;
    }

    let (min_w, min_h) = params.min_size.unwrap_or((self.width, self.height));
    let (max_w, max_h) = params.max_size.unwrap_or((img_w, img_h));

    let mut factor = 1.0f64;
    loop {
      let win_w = (self.width as f64 * factor).round() as u32;
      let win_h = (self.height as f64 * factor).round() as u32;
      let scaled_w = (img_w as f64 / factor).round() as u32;
      let scaled_h = (img_h as f64 / factor).round() as u32;

      if scaled_w < self.width || scaled_h < self.height {
        break;
      }
      if win_w > max_w || win_h > max_h {
        break;
      }

      if win_w >= min_w && win_h >= min_h {
        let scaled;
        let layer = if factor == 1.0 {
          gray
        } else {
          scaled = imageops::resize(gray, scaled_w, scaled_h, imageops::FilterType::Triangle);
          &scaled
        };

        let sum: IntegralImage = integral_image(layer);
        let sq: IntegralImage = integral_squared_image(layer);
        let step = if factor > 2.0 { 1 } else { 2 };

        for y in (0..=scaled_h - self.height).step_by(step) {
          for x in (0..=scaled_w - self.width).step_by(step) {
            if self.evaluate(&sum, &sq, x, y) {
              hits.push(BoundingBox::new(
                (x as f64 * factor).round() as u32,
                (y as f64 * factor).round() as u32,
                win_w,
                win_h,
              ));
            }
          }
        }
      }

      factor *= params.scale_factor;
    }

    hits
  }

  /// 评估以 (x, y) 为左上角的窗口是否通过所有阶段
  fn evaluate(&self, sum: &IntegralImage, sq: &IntegralImage, x: u32, y: u32) -> bool {
    // 方差归一化使用去掉一圈边框的内部区域
    let nw = self.width - 2;
    let nh = self.height - 2;
    let area = (nw as f64) * (nh as f64);
    let s = rect_sum(sum, x + 1, y + 1, nw, nh) as f64;
    let sq_s = rect_sum(sq, x + 1, y + 1, nw, nh) as f64;
    let nf = area * sq_s - s * s;
    let nf = if nf > 0.0 { nf.sqrt() } else { 1.0 };

    for stage in &self.stages {
      let mut acc = 0.0;
      for weak in &stage.classifiers {
        let mut idx = 0usize;
        loop {
          let node = &weak.nodes[idx];
          let value = self.feature_value(node.feature, sum, x, y) / nf;
          let next = if value < node.threshold {
            node.left
          } else {
            node.right
          };
          if next <= 0 {
            acc += weak.leaves[(-next) as usize];
            break;
          }
          idx = next as usize;
        }
      }
      if acc < stage.threshold {
        return false;
      }
    }
    true
  }

  fn feature_value(&self, feature: usize, sum: &IntegralImage, x: u32, y: u32) -> f64 {
    self.features[feature]
      .rects
      .iter()
      .map(|r| r.weight * rect_sum(sum, x + r.x, y + r.y, r.width, r.height) as f64)
      .sum()
  }
}

/// 积分图上的矩形求和，积分图比原图多一行一列
fn rect_sum(ii: &IntegralImage, x: u32, y: u32, w: u32, h: u32) -> u64 {
  let a = ii.get_pixel(x, y)[0];
  let b = ii.get_pixel(x + w, y)[0];
  let c = ii.get_pixel(x, y + h)[0];
  let d = ii.get_pixel(x + w, y + h)[0];
  (d + a).wrapping_sub(b).wrapping_sub(c)
}

fn similar(a: &BoundingBox, b: &BoundingBox, eps: f64) -> bool {
  let delta = eps * (a.width.min(b.width) as f64 + a.height.min(b.height) as f64) * 0.5;
  let close = |p: u32, q: u32| (p as f64 - q as f64).abs() <= delta;
  close(a.x, b.x) && close(a.y, b.y) && close(a.right(), b.right()) && close(a.bottom(), b.bottom())
}

fn find_root(parent: &mut [usize], mut i: usize) -> usize {
  while parent[i] != i {
    parent[i] = parent[parent[i]];
    i = parent[i];
  }
  i
}

/// 按 OpenCV `groupRectangles` 规则合并相似矩形
///
/// `min_neighbors` 为 0 时原样返回。
pub fn group_rectangles(rects: &[BoundingBox], min_neighbors: u32, eps: f64) -> Vec<BoundingBox> {
  if min_neighbors == 0 || rects.is_empty() {
    return rects.to_vec();
  }

  let n = rects.len();
  let mut parent: Vec<usize> = (0..n).collect();
  for i in 0..n {
    for j in (i + 1)..n {
      if similar(&rects[i], &rects[j], eps) {
        let ri = find_root(&mut parent, i);
        let rj = find_root(&mut parent, j);
        if ri != rj {
          parent[rj] = ri;
        }
      }
    }
  }

  // 每个类的坐标累加和计数
  let mut classes: Vec<(usize, [u64; 4], u32)> = Vec::new();
  for (i, r) in rects.iter().enumerate() {
    let root = find_root(&mut parent, i);
    let pos = match classes.iter().position(|c| c.0 == root) {
      Some(pos) => pos,
      None => {
        classes.push((root, [0; 4], 0));
        classes.len() - 1
      }
    };
    let entry = &mut classes[pos];
    entry.1[0] += r.x as u64;
    entry.1[1] += r.y as u64;
    entry.1[2] += r.width as u64;
    entry.1[3] += r.height as u64;
    entry.2 += 1;
  }

  let averaged: Vec<(BoundingBox, u32)> = classes
    .iter()
    .filter(|(_, _, count)| *count > min_neighbors)
    .map(|(_, s, count)| {
      let c = *count as f64;
      let avg = |v: u64| (v as f64 / c).round() as u32;
      (BoundingBox::new(avg(s[0]), avg(s[1]), avg(s[2]), avg(s[3])), *count)
    })
    .collect();

  // 去掉被邻居更多的大矩形包含的小矩形
  let mut result = Vec::with_capacity(averaged.len());
  for (i, (r1, n1)) in averaged.iter().enumerate() {
    let swallowed = averaged.iter().enumerate().any(|(j, (r2, n2))| {
      if i == j {
        return false;
      }
      let dx = (r2.width as f64 * eps).round() as i64;
      let dy = (r2.height as f64 * eps).round() as i64;
      let inside = r1.x as i64 >= r2.x as i64 - dx
        && r1.y as i64 >= r2.y as i64 - dy
        && r1.right() as i64 <= r2.right() as i64 + dx
        && r1.bottom() as i64 <= r2.bottom() as i64 + dy;
      r1 != r2 && inside && (*n2 > (*n1).max(3) || *n1 < 3)
    });
    if !swallowed {
      result.push(*r1);
    }
  }
  result
}
