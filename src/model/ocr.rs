// 该文件是 Chepai （车牌闸口） 项目的一部分。
// src/model/ocr.rs - 文字识别
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

//! # 文字识别
//!
//! `TextEngine` 是 OCR 引擎的接口，`TextRecognizer` 在其上按顺序尝试
//! 多个页面分割模式，每个模式内按置信度从高到低取第一个满足条件的结果。

use std::fmt;
use std::path::PathBuf;

use image::GrayImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::process::ProcessError;

mod tesseract_cli;
pub use self::tesseract_cli::TesseractCli;

#[cfg(feature = "leptess")]
mod leptess_engine;
#[cfg(feature = "leptess")]
pub use self::leptess_engine::LeptessEngine;

/// 车牌字符白名单
pub const PLATE_WHITELIST: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

#[derive(Error, Debug)]
pub enum OcrError {
  #[error("OCR 引擎不可用: {0}")]
  EngineUnavailable(String),
  #[error("OCR 进程错误: {0}")]
  Process(#[from] ProcessError),
  #[error("OCR 引擎返回错误: {0}")]
  EngineFailed(String),
  #[error("图像编码错误: {0}")]
  Encode(#[from] image::ImageError),
  #[error("不支持的页面分割模式: {0}")]
  UnsupportedMode(u8),
}

/// Tesseract 页面分割模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum SegmentationMode {
  Auto,
  SingleBlock,
  SingleLine,
  SingleWord,
  SparseText,
  RawLine,
}

impl SegmentationMode {
  pub fn code(self) -> u8 {
    match self {
      SegmentationMode::Auto => 3,
      SegmentationMode::SingleBlock => 6,
      SegmentationMode::SingleLine => 7,
      SegmentationMode::SingleWord => 8,
      SegmentationMode::SparseText => 11,
      SegmentationMode::RawLine => 13,
    }
  }
}

impl TryFrom<u8> for SegmentationMode {
  type Error = OcrError;

  fn try_from(value: u8) -> Result<Self, Self::Error> {
    Ok(match value {
      3 => SegmentationMode::Auto,
      6 => SegmentationMode::SingleBlock,
      7 => SegmentationMode::SingleLine,
      8 => SegmentationMode::SingleWord,
      11 => SegmentationMode::SparseText,
      13 => SegmentationMode::RawLine,
      other => return Err(OcrError::UnsupportedMode(other)),
    })
  }
}

impl From<SegmentationMode> for u8 {
  fn from(mode: SegmentationMode) -> Self {
    mode.code()
  }
}

impl fmt::Display for SegmentationMode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "psm {}", self.code())
  }
}

/// 一条识别结果，置信度范围 [0, 1]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextCandidate {
  pub text: String,
  pub confidence: f32,
}

impl TextCandidate {
  pub fn new(text: impl Into<String>, confidence: f32) -> Self {
    Self {
      text: text.into(),
      confidence,
    }
  }
}

pub trait TextEngine {
  fn read_text(
    &self,
    image: &GrayImage,
    mode: SegmentationMode,
  ) -> Result<Vec<TextCandidate>, OcrError>;
}

impl<E: TextEngine + ?Sized> TextEngine for Box<E> {
  fn read_text(
    &self,
    image: &GrayImage,
    mode: SegmentationMode,
  ) -> Result<Vec<TextCandidate>, OcrError> {
    (**self).read_text(image, mode)
  }
}

/// 三个字符及以下的识别结果一律视为未识别
pub const MIN_TEXT_LEN: usize = 4;

/// 一次识别尝试及其接受条件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrStrategy {
  pub mode: SegmentationMode,
  /// 去掉首尾空白后的最少字符数
  pub min_len: usize,
  pub min_confidence: f32,
}

impl Default for OcrStrategy {
  fn default() -> Self {
    Self::new(SegmentationMode::SingleLine)
  }
}

impl OcrStrategy {
  pub fn new(mode: SegmentationMode) -> Self {
    Self {
      mode,
      min_len: MIN_TEXT_LEN,
      min_confidence: 0.0,
    }
  }

  pub fn accepts(&self, candidate: &TextCandidate) -> bool {
    candidate.text.trim().chars().count() >= self.min_len
      && candidate.confidence >= self.min_confidence
  }

  pub fn default_list() -> Vec<OcrStrategy> {
    [
      SegmentationMode::SingleLine,
      SegmentationMode::SingleWord,
      SegmentationMode::SingleBlock,
      SegmentationMode::RawLine,
    ]
    .into_iter()
    .map(OcrStrategy::new)
    .collect()
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
  #[default]
  TesseractCli,
  Leptess,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
  pub engine: EngineKind,
  /// tesseract 可执行文件
  pub program: PathBuf,
  pub language: String,
  pub whitelist: String,
  pub timeout_ms: u64,
  pub strategies: Vec<OcrStrategy>,
}

impl Default for OcrConfig {
  fn default() -> Self {
    Self {
      engine: EngineKind::TesseractCli,
      program: PathBuf::from("tesseract"),
      language: "eng".to_string(),
      whitelist: PLATE_WHITELIST.to_string(),
      timeout_ms: 5_000,
      strategies: OcrStrategy::default_list(),
    }
  }
}

impl OcrConfig {
  /// 按配置创建引擎，并在启动时确认其可用
  pub fn build_engine(&self) -> Result<Box<dyn TextEngine>, OcrError> {
    match self.engine {
      EngineKind::TesseractCli => {
        let engine = TesseractCli::from_config(self);
        engine.probe()?;
        Ok(Box::new(engine))
      }
      #[cfg(feature = "leptess")]
      EngineKind::Leptess => Ok(Box::new(LeptessEngine::new(&self.language, &self.whitelist)?)),
      #[cfg(not(feature = "leptess"))]
      EngineKind::Leptess => Err(OcrError::EngineUnavailable(
        "未启用 leptess 特性".to_string(),
      )),
    }
  }
}

pub struct TextRecognizer<E> {
  engine: E,
  strategies: Vec<OcrStrategy>,
}

impl<E: TextEngine> TextRecognizer<E> {
  pub fn new(engine: E, strategies: Vec<OcrStrategy>) -> Self {
    Self { engine, strategies }
  }

  pub fn with_default_strategies(engine: E) -> Self {
    Self::new(engine, OcrStrategy::default_list())
  }

  pub fn strategies(&self) -> &[OcrStrategy] {
    &self.strategies
  }

  /// 没有任何策略得到可接受的结果时返回 None
  pub fn recognize(&self, image: &GrayImage) -> Result<Option<TextCandidate>, OcrError> {
    for strategy in &self.strategies {
      let mut candidates = self.engine.read_text(image, strategy.mode)?;
      candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
      debug!("{}: {} 条候选", strategy.mode, candidates.len());

      if let Some(found) = candidates.into_iter().find(|c| strategy.accepts(c)) {
        debug!(
          "{} 识别结果: '{}' ({:.2})",
          strategy.mode, found.text, found.confidence
        );
        return Ok(Some(TextCandidate {
          text: found.text.trim().to_string(),
          confidence: found.confidence,
        }));
      }
    }
    Ok(None)
  }
}
