// 该文件是 Chepai （车牌闸口） 项目的一部分。
// src/model/reader.rs - 单帧车牌读取
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

use thiserror::Error;
use tracing::debug;

use super::{
  Model,
  locator::{PlateDetector, PlateLocator},
  normalize::{NormalizeError, PlateNormalizer, PlateString},
  ocr::{OcrError, TextEngine, TextRecognizer},
  preprocess::Preprocessor,
};
use crate::frame::{BoundingBox, Frame, Region};

#[derive(Error, Debug)]
pub enum ReaderError {
  #[error(transparent)]
  Ocr(#[from] OcrError),
}

/// 单帧的读取结果
#[derive(Debug, Clone)]
pub enum PlateReading {
  /// 没有候选区域
  NoDetection,
  /// 区域小于预处理的最小尺寸
  RegionTooSmall { bbox: BoundingBox },
  /// OCR 没有给出可接受的文本
  TextNotDetected { bbox: BoundingBox },
  /// 文本未通过规范化
  Invalid {
    bbox: BoundingBox,
    raw: String,
    reason: NormalizeError,
  },
  Valid {
    plate: PlateString,
    raw: String,
    confidence: f32,
    region: Region,
  },
}

impl PlateReading {
  pub fn bbox(&self) -> Option<BoundingBox> {
    match self {
      PlateReading::NoDetection => None,
      PlateReading::RegionTooSmall { bbox }
      | PlateReading::TextNotDetected { bbox }
      | PlateReading::Invalid { bbox, .. } => Some(*bbox),
      PlateReading::Valid { region, .. } => Some(region.bbox),
    }
  }

  pub fn plate(&self) -> Option<&PlateString> {
    match self {
      PlateReading::Valid { plate, .. } => Some(plate),
      _ => None,
    }
  }
}

/// 定位、预处理、识别、规范化组成的单帧流水线
pub struct PlateReader<D, E> {
  locator: PlateLocator<D>,
  preprocessor: Preprocessor,
  recognizer: TextRecognizer<E>,
  normalizer: PlateNormalizer,
}

impl<D: PlateDetector, E: TextEngine> PlateReader<D, E> {
  pub fn new(
    locator: PlateLocator<D>,
    preprocessor: Preprocessor,
    recognizer: TextRecognizer<E>,
    normalizer: PlateNormalizer,
  ) -> Self {
    Self {
      locator,
      preprocessor,
      recognizer,
      normalizer,
    }
  }

  pub fn normalizer(&self) -> &PlateNormalizer {
    &self.normalizer
  }
}

impl<D: PlateDetector, E: TextEngine> Model for PlateReader<D, E> {
  type Input = Frame;
  type Output = PlateReading;
  type Error = ReaderError;

  fn infer(&self, frame: &Frame) -> Result<PlateReading, ReaderError> {
    let Some(bbox) = self.locator.locate(&frame.image) else {
      return Ok(PlateReading::NoDetection);
    };
    let Some(region) = Region::crop(&frame.image, bbox) else {
      return Ok(PlateReading::NoDetection);
    };
    let Some(prepared) = self.preprocessor.prepare(&region.image) else {
      return Ok(PlateReading::RegionTooSmall { bbox: region.bbox });
    };
    let Some(candidate) = self.recognizer.recognize(&prepared)? else {
      debug!("帧 {}: 未识别到文本", frame.index);
      return Ok(PlateReading::TextNotDetected { bbox: region.bbox });
    };

    match self.normalizer.normalize(&candidate.text) {
      Ok(plate) => Ok(PlateReading::Valid {
        plate,
        raw: candidate.text,
        confidence: candidate.confidence,
        region,
      }),
      Err(reason) => {
        debug!("帧 {}: '{}' 无效: {}", frame.index, candidate.text, reason);
        Ok(PlateReading::Invalid {
          bbox: region.bbox,
          raw: candidate.text,
          reason,
        })
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use image::{GrayImage, RgbImage};

  use super::*;
  use crate::model::{OcrStrategy, PreprocessConfig, SegmentationMode, TextCandidate};

  struct At(Option<BoundingBox>);

  impl PlateDetector for At {
    fn detect(&self, _gray: &GrayImage) -> Vec<BoundingBox> {
      self.0.into_iter().collect()
    }
  }

  struct Says(&'static str);

  impl TextEngine for Says {
    fn read_text(
      &self,
      _image: &GrayImage,
      _mode: SegmentationMode,
    ) -> Result<Vec<TextCandidate>, OcrError> {
      Ok(vec![TextCandidate::new(self.0, 0.9)])
    }
  }

  fn reader(bbox: Option<BoundingBox>, text: &'static str) -> PlateReader<At, Says> {
    PlateReader::new(
      PlateLocator::new(At(bbox), 500, 120_000),
      Preprocessor::new(PreprocessConfig {
        scale_height: 0,
        ..PreprocessConfig::default()
      }),
      TextRecognizer::new(Says(text), vec![OcrStrategy::new(SegmentationMode::SingleLine)]),
      PlateNormalizer::default(),
    )
  }

  fn frame() -> Frame {
    Frame::new(RgbImage::new(320, 240), 0, 0)
  }

  #[test]
  fn valid_plate_flows_through() {
    let r = reader(Some(BoundingBox::new(10, 10, 100, 30)), "ka 01 ab 1234");
    let reading = r.infer(&frame()).unwrap();
    assert_eq!(reading.plate().map(|p| p.as_str()), Some("KA01AB1234"));
    assert_eq!(reading.bbox(), Some(BoundingBox::new(10, 10, 100, 30)));
  }

  #[test]
  fn no_box_is_no_detection() {
    let r = reader(None, "KA01AB1234");
    assert!(matches!(r.infer(&frame()).unwrap(), PlateReading::NoDetection));
  }

  #[test]
  fn narrow_region_is_too_small() {
    // 面积 540 在区间内，但宽度小于 30
    let r = reader(Some(BoundingBox::new(10, 10, 20, 27)), "KA01AB1234");
    assert!(matches!(
      r.infer(&frame()).unwrap(),
      PlateReading::RegionTooSmall { .. }
    ));
  }

  #[test]
  fn short_text_is_not_detected() {
    let r = reader(Some(BoundingBox::new(10, 10, 100, 30)), "KA0");
    assert!(matches!(
      r.infer(&frame()).unwrap(),
      PlateReading::TextNotDetected { .. }
    ));
  }

  #[test]
  fn grammar_failure_is_invalid() {
    let r = reader(Some(BoundingBox::new(10, 10, 100, 30)), "HELLO WORLD");
    assert!(matches!(
      r.infer(&frame()).unwrap(),
      PlateReading::Invalid { .. }
    ));
  }
}
