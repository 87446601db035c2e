// 该文件是 Chepai （车牌闸口） 项目的一部分。
// tests/upload_entry.rs - 上传入场集成测试
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

#![cfg(feature = "upload_input")]

use std::io::Cursor;

use base64::Engine;
use image::{GrayImage, RgbImage};

use chepai::FromUrl;
use chepai::allocator::ProcessAllocator;
use chepai::frame::BoundingBox;
use chepai::gate::{EntryGate, SinkConfig};
use chepai::input::{InputError, InputWrapper, UploadError, UploadInput};
use chepai::model::{
  OcrError, OcrStrategy, PlateDetector, PlateLocator, PlateNormalizer, PlateReader,
  PreprocessConfig, Preprocessor, SegmentationMode, TextCandidate, TextEngine, TextRecognizer,
};
use chepai::output::{EntryResponse, LogSchema, PLATE_NOT_DETECTED, read_records};
use chepai::session::StabilizerConfig;

struct Centre;

impl PlateDetector for Centre {
  fn detect(&self, gray: &GrayImage) -> Vec<BoundingBox> {
    let (w, h) = gray.dimensions();
    vec![BoundingBox::new(w / 4, h / 3, w / 2, h / 4)]
  }
}

struct Reads(&'static str);

impl TextEngine for Reads {
  fn read_text(
    &self,
    _image: &GrayImage,
    _mode: SegmentationMode,
  ) -> Result<Vec<TextCandidate>, OcrError> {
    if self.0.is_empty() {
      return Ok(Vec::new());
    }
    Ok(vec![TextCandidate::new(self.0, 0.7)])
  }
}

fn upload_body() -> String {
  let mut bytes = Vec::new();
  RgbImage::from_pixel(320, 240, image::Rgb([200, 200, 200]))
    .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Jpeg)
    .unwrap();
  format!(
    "{{\"image\":\"data:image/jpeg;base64,{}\"}}",
    base64::engine::general_purpose::STANDARD.encode(bytes)
  )
}

fn gate(dir: &std::path::Path, text: &'static str) -> EntryGate<PlateReader<Centre, Reads>> {
  let reader = PlateReader::new(
    PlateLocator::new(Centre, 500, 120_000),
    Preprocessor::new(PreprocessConfig::default()),
    TextRecognizer::new(Reads(text), vec![OcrStrategy::new(SegmentationMode::SingleLine)]),
    PlateNormalizer::default(),
  );
  let sink = SinkConfig {
    log_path: dir.join("vehicle_logs.csv"),
    schema: LogSchema::Compact,
    snapshots: false,
    ..SinkConfig::default()
  };
  EntryGate::new(reader, StabilizerConfig::single_shot(), &sink)
}

#[test]
fn uploaded_image_is_allocated_a_slot() {
  let dir = tempfile::tempdir().unwrap();
  let body_path = dir.path().join("body.json");
  std::fs::write(&body_path, upload_body()).unwrap();

  let url = url::Url::from_file_path(&body_path).unwrap();
  let url = url::Url::parse(&url.as_str().replacen("file:", "upload:", 1)).unwrap();
  let mut input = InputWrapper::from_url(&url).unwrap();
  let frame = input.next().unwrap();
  assert!(input.next().is_none());

  let gate = gate(dir.path(), "TN 09 BC 5678").with_allocator(Box::new(
    ProcessAllocator::new("sh").with_args([
      "-c",
      r#"echo "{\"plate\":\"$1\",\"slot\":\"b2\",\"path\":[\"ENTRY\",\"N1\",\"b2\"]}""#,
      "sh",
    ]),
  ));
  let outcome = gate.process_frame(&frame).unwrap();
  let response = EntryResponse::from_outcome(&outcome).unwrap();
  assert_eq!(response.plate_number.as_deref(), Some("TN09BC5678"));
  assert_eq!(response.slot.as_deref(), Some("b2"));
  assert_eq!(
    response.path,
    Some(vec!["ENTRY".to_string(), "N1".to_string(), "b2".to_string()])
  );
  assert!(!response.is_error());

  let records = read_records(dir.path().join("vehicle_logs.csv")).unwrap();
  assert_eq!(records.len(), 1);
  assert_eq!(records[0].slot, "b2");
}

#[test]
fn unreadable_plate_asks_for_retake() {
  let dir = tempfile::tempdir().unwrap();
  let frame = UploadInput::from_body(&upload_body())
    .unwrap()
    .next()
    .unwrap();
  let outcome = gate(dir.path(), "").process_frame(&frame).unwrap();
  let response = EntryResponse::from_outcome(&outcome).unwrap();
  assert_eq!(response.error.as_deref(), Some(PLATE_NOT_DETECTED));
  assert!(!dir.path().join("vehicle_logs.csv").exists());
}

#[test]
fn malformed_upload_is_rejected() {
  assert!(matches!(
    UploadInput::from_body("{\"image\": \"no-comma-here\"}"),
    Err(UploadError::InvalidImageData)
  ));

  let dir = tempfile::tempdir().unwrap();
  let body_path = dir.path().join("body.txt");
  std::fs::write(&body_path, "data:image/png;base64,AAAA").unwrap();
  let url = url::Url::parse(&format!("upload://{}", body_path.display())).unwrap();
  assert!(matches!(
    InputWrapper::from_url(&url),
    Err(InputError::UploadError(UploadError::DecodeFailed))
  ));
}
