// 该文件是 Chepai （车牌闸口） 项目的一部分。
// src/output/json_output.rs - JSON 行输出
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

use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  gate::{FrameOutcome, FrameStatus},
  output::{Render, TIMESTAMP_FORMAT},
  url_file_path,
};

pub const PLATE_NOT_DETECTED: &str = "Plate number not detected. Please retake the photo.";
pub const ALLOCATION_FAILED: &str = "Parking allocation failed";

#[derive(Error, Debug)]
pub enum JsonOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 编码错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("输出锁已损坏")]
  Poisoned,
}

/// 一次入场请求的应答
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EntryResponse {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub plate_number: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub slot: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub time: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub path: Option<Vec<String>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

impl EntryResponse {
  pub fn error(message: impl Into<String>) -> Self {
    Self {
      error: Some(message.into()),
      ..Self::default()
    }
  }

  pub fn is_error(&self) -> bool {
    self.error.is_some()
  }

  /// 由单帧结果生成应答；仍在累积或被去重的帧没有应答
  pub fn from_outcome(outcome: &FrameOutcome) -> Option<Self> {
    if let Some(entry) = &outcome.entry {
      let record = &entry.record;
      let mut response = EntryResponse {
        plate_number: Some(record.plate.clone()),
        slot: Some(record.slot.clone()),
        time: Some(record.timestamp.format(TIMESTAMP_FORMAT).to_string()),
        path: Some(record.path.clone()),
        error: None,
      };
      if entry.confirmed && !entry.allocation.is_assigned() {
        response.error = Some(ALLOCATION_FAILED.to_string());
      }
      return Some(response);
    }

    match &outcome.status {
      FrameStatus::NotDetected
      | FrameStatus::RegionTooSmall
      | FrameStatus::TextNotDetected
      | FrameStatus::Invalid { .. } => Some(Self::error(PLATE_NOT_DETECTED)),
      FrameStatus::Failed(reason) => Some(Self::error(reason.clone())),
      FrameStatus::Observed(_) => None,
    }
  }
}

/// 把应答逐行写成 JSON
///
/// `json:///-` 写到标准输出；默认只写放行记录，`?always` 同时写失败应答。
pub struct JsonOutput {
  writer: Mutex<Box<dyn Write + Send>>,
  always: bool,
}

impl FromUrlWithScheme for JsonOutput {
  const SCHEME: &'static str = "json";
}

impl FromUrl for JsonOutput {
  type Error = JsonOutputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(JsonOutputError::SchemeMismatch);
    }
    let always = url.query_pairs().any(|(k, _)| k == "always");

    let path = url_file_path(url);
    let writer: Box<dyn Write + Send> = if path.as_os_str() == "/-" || path.as_os_str() == "-" {
      Box::new(std::io::stdout())
    } else {
      if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
      {
        std::fs::create_dir_all(parent)?;
      }
      Box::new(OpenOptions::new().create(true).append(true).open(&path)?)
    };

    Ok(Self::new(writer, always))
  }
}

impl JsonOutput {
  pub fn new(writer: Box<dyn Write + Send>, always: bool) -> Self {
    Self {
      writer: Mutex::new(writer),
      always,
    }
  }

  pub fn write_response(&self, response: &EntryResponse) -> Result<(), JsonOutputError> {
    let mut line = serde_json::to_vec(response)?;
    line.push(b'\n');
    let mut writer = self.writer.lock().map_err(|_| JsonOutputError::Poisoned)?;
    writer.write_all(&line)?;
    writer.flush()?;
    Ok(())
  }
}

impl Render<Frame, FrameOutcome> for JsonOutput {
  type Error = JsonOutputError;

  fn render_result(&self, _frame: &Frame, result: &FrameOutcome) -> Result<(), Self::Error> {
    if !result.is_emitted() && !self.always {
      return Ok(());
    }
    match EntryResponse::from_outcome(result) {
      Some(response) => self.write_response(&response),
      None => Ok(()),
    }
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use chrono::NaiveDate;
  use image::RgbImage;

  use super::*;
  use crate::allocator::Allocation;
  use crate::gate::Entry;
  use crate::output::VehicleRecord;
  use crate::session::Observation;

  #[derive(Clone, Default)]
  struct Shared(Arc<std::sync::Mutex<Vec<u8>>>);

  impl Write for Shared {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
      self.0.lock().unwrap().extend_from_slice(buf);
      Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
      Ok(())
    }
  }

  fn emitted(allocation: Allocation) -> FrameOutcome {
    let record = VehicleRecord {
      timestamp: NaiveDate::from_ymd_opt(2026, 3, 14)
        .unwrap()
        .and_hms_opt(9, 26, 53)
        .unwrap(),
      plate: "KA01AB1234".to_string(),
      slot: allocation.slot().to_string(),
      gate: "Entry".to_string(),
      path: allocation.path().to_vec(),
      status: "IN".to_string(),
    };
    FrameOutcome {
      frame_index: 3,
      bbox: None,
      status: FrameStatus::Observed(Observation::Unchanged),
      entry: Some(Entry {
        record,
        allocation,
        snapshot: None,
        confirmed: true,
      }),
    }
  }

  #[test]
  fn emitted_entry_becomes_response() {
    let outcome = emitted(Allocation::Assigned {
      slot: "a1".to_string(),
      path: vec!["ENTRY".to_string(), "a1".to_string()],
    });
    let response = EntryResponse::from_outcome(&outcome).unwrap();
    assert_eq!(response.plate_number.as_deref(), Some("KA01AB1234"));
    assert_eq!(response.slot.as_deref(), Some("a1"));
    assert_eq!(response.time.as_deref(), Some("2026-03-14 09:26:53"));
    assert!(!response.is_error());
  }

  #[test]
  fn failed_allocation_is_reported() {
    let outcome = emitted(Allocation::Unavailable {
      reason: "exit 1".to_string(),
    });
    let response = EntryResponse::from_outcome(&outcome).unwrap();
    assert_eq!(response.slot.as_deref(), Some("N/A"));
    assert_eq!(response.error.as_deref(), Some(ALLOCATION_FAILED));
  }

  #[test]
  fn writes_only_emissions_unless_always() {
    let buffer = Shared::default();
    let output = JsonOutput::new(Box::new(buffer.clone()), false);
    let frame = crate::frame::Frame::new(RgbImage::new(4, 4), 0, 0);
    let miss = FrameOutcome {
      frame_index: 0,
      bbox: None,
      status: FrameStatus::NotDetected,
      entry: None,
    };
    output.render_result(&frame, &miss).unwrap();
    assert!(buffer.0.lock().unwrap().is_empty());

    let always = JsonOutput::new(Box::new(buffer.clone()), true);
    always.render_result(&frame, &miss).unwrap();
    let text = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
    assert_eq!(
      text,
      "{\"error\":\"Plate number not detected. Please retake the photo.\"}\n"
    );
  }
}
