// 该文件是 Chepai （车牌闸口） 项目的一部分。
// src/model/ocr/leptess_engine.rs - 进程内 Tesseract
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

use std::io::Cursor;
use std::sync::Mutex;

use image::{GrayImage, ImageFormat};
use leptess::{LepTess, Variable};
use tracing::{debug, info};

use super::{OcrError, SegmentationMode, TextCandidate, TextEngine};

/// LepTess 需要可变借用，这里用互斥锁包一层
pub struct LeptessEngine {
  inner: Mutex<LepTess>,
}

impl LeptessEngine {
  pub fn new(language: &str, whitelist: &str) -> Result<Self, OcrError> {
    info!("初始化 Tesseract ({})", language);
    let mut lt = LepTess::new(None, language)
      .map_err(|e| OcrError::EngineUnavailable(e.to_string()))?;
    if !whitelist.is_empty() {
      lt.set_variable(Variable::TesseditCharWhitelist, whitelist)
        .map_err(|e| OcrError::EngineUnavailable(e.to_string()))?;
    }
    Ok(Self {
      inner: Mutex::new(lt),
    })
  }
}

impl TextEngine for LeptessEngine {
  fn read_text(
    &self,
    image: &GrayImage,
    mode: SegmentationMode,
  ) -> Result<Vec<TextCandidate>, OcrError> {
    let mut png = Vec::new();
    image.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;

    let mut lt = self
      .inner
      .lock()
      .map_err(|_| OcrError::EngineFailed("引擎锁已损坏".to_string()))?;
    lt.set_variable(Variable::TesseditPagesegMode, &mode.code().to_string())
      .map_err(|e| OcrError::EngineFailed(e.to_string()))?;
    lt.set_image_from_mem(&png)
      .map_err(|e| OcrError::EngineFailed(e.to_string()))?;

    let text = lt
      .get_utf8_text()
      .map_err(|e| OcrError::EngineFailed(e.to_string()))?;
    let confidence = (lt.mean_text_conf() as f32 / 100.0).clamp(0.0, 1.0);
    debug!("leptess {}: '{}' ({:.2})", mode, text.trim(), confidence);

    Ok(
      text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|l| TextCandidate::new(l, confidence))
        .collect(),
    )
  }
}
