// 该文件是 Chepai （车牌闸口） 项目的一部分。
// src/config.rs - 流水线配置
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

//! TOML 配置文件，每个字段都有默认值，缺省的段落按默认值处理。
//!
//! ```text
//! [locator]
//! cascade = "model/haarcascade_russian_plate_number.xml"
//! min_neighbors = 4
//!
//! [stabilizer]
//! window = 5
//! tie_break = "first_seen"
//!
//! [allocator]
//! program = "./parking"
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::allocator::AllocatorConfig;
use crate::gate::{Confirm, EntryGate, SinkConfig};
use crate::model::normalize::{DEFAULT_PLATE_GRAMMAR, DEFAULT_REJECT_PHRASES};
use crate::model::ocr::{MIN_TEXT_LEN, OcrConfig};
use crate::model::{
  CascadeError, ConfusionTable, HaarCascadeDetector, LocatorConfig, NormalizeError, OcrError,
  PlateLocator, PlateNormalizer, PlateReader, PreprocessConfig, Preprocessor, TextEngine,
  TextRecognizer,
};
use crate::session::StabilizerConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("配置解析错误: {0}")]
  Parse(#[from] toml::de::Error),
  #[error("配置序列化错误: {0}")]
  Serialize(#[from] toml::ser::Error),
  #[error("配置无效: {0}")]
  Invalid(String),
  #[error("级联分类器加载失败: {0}")]
  Cascade(#[from] CascadeError),
  #[error("OCR 引擎不可用: {0}")]
  Ocr(#[from] OcrError),
  #[error("车牌规则无效: {0}")]
  Normalize(#[from] NormalizeError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlateConfig {
  /// 车牌语法正则
  pub grammar: String,
  pub corrections: ConfusionTable,
  pub reject_phrases: Vec<String>,
}

impl Default for PlateConfig {
  fn default() -> Self {
    Self {
      grammar: DEFAULT_PLATE_GRAMMAR.to_string(),
      corrections: ConfusionTable::default(),
      reject_phrases: DEFAULT_REJECT_PHRASES.iter().map(|s| s.to_string()).collect(),
    }
  }
}

impl PlateConfig {
  pub fn build(&self) -> Result<PlateNormalizer, NormalizeError> {
    PlateNormalizer::new(
      &self.grammar,
      self.corrections.clone(),
      self.reject_phrases.clone(),
    )
  }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
  pub locator: LocatorConfig,
  pub preprocess: PreprocessConfig,
  pub ocr: OcrConfig,
  pub plate: PlateConfig,
  pub stabilizer: StabilizerConfig,
  pub sink: SinkConfig,
  pub allocator: AllocatorConfig,
}

pub type DefaultReader = PlateReader<HaarCascadeDetector, Box<dyn TextEngine>>;

impl PipelineConfig {
  /// 检查取值范围，不访问文件系统
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.stabilizer.window == 0 {
      return Err(ConfigError::Invalid("stabilizer.window 必须大于 0".to_string()));
    }
    if self.locator.scale_factor <= 1.0 {
      return Err(ConfigError::Invalid(format!(
        "locator.scale_factor 必须大于 1, 当前为 {}",
        self.locator.scale_factor
      )));
    }
    if self.locator.min_area > self.locator.max_area {
      return Err(ConfigError::Invalid(format!(
        "locator.min_area ({}) 大于 max_area ({})",
        self.locator.min_area, self.locator.max_area
      )));
    }
    if self.ocr.strategies.is_empty() {
      return Err(ConfigError::Invalid("ocr.strategies 不能为空".to_string()));
    }
    if let Some(s) = self.ocr.strategies.iter().find(|s| s.min_len < MIN_TEXT_LEN) {
      return Err(ConfigError::Invalid(format!(
        "ocr.strategies 中 {} 的 min_len ({}) 小于 {}",
        s.mode, s.min_len, MIN_TEXT_LEN
      )));
    }
    if let Some(votes) = self.stabilizer.min_votes
      && (votes == 0 || votes > self.stabilizer.window)
    {
      return Err(ConfigError::Invalid(format!(
        "stabilizer.min_votes ({}) 必须在 1 到 window ({}) 之间",
        votes, self.stabilizer.window
      )));
    }
    self.plate.build()?;
    Ok(())
  }

  /// 加载级联分类器、启动 OCR 引擎并组装读取器
  pub fn build_reader(&self) -> Result<DefaultReader, ConfigError> {
    self.validate()?;
    let detector = HaarCascadeDetector::from_config(&self.locator)?;
    let locator = PlateLocator::with_config(detector, &self.locator);
    let engine = self.ocr.build_engine()?;
    let recognizer = TextRecognizer::new(engine, self.ocr.strategies.clone());
    Ok(PlateReader::new(
      locator,
      Preprocessor::new(self.preprocess.clone()),
      recognizer,
      self.plate.build()?,
    ))
  }

  pub fn build_gate(
    &self,
    confirm: Box<dyn Confirm>,
  ) -> Result<EntryGate<DefaultReader>, ConfigError> {
    let reader = self.build_reader()?;
    Ok(
      EntryGate::new(reader, self.stabilizer.clone(), &self.sink)
        .with_allocator(self.allocator.build())
        .with_confirm(confirm),
    )
  }
}

pub fn load_config(path: &Path) -> Result<PipelineConfig, ConfigError> {
  let content = std::fs::read_to_string(path)?;
  let config: PipelineConfig = toml::from_str(&content)?;
  config.validate()?;
  info!("已加载配置: {}", path.display());
  Ok(config)
}

pub fn save_config(config: &PipelineConfig, path: &Path) -> Result<(), ConfigError> {
  let content = toml::to_string_pretty(config)?;
  std::fs::write(path, content)?;
  Ok(())
}
