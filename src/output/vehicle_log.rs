// 该文件是 Chepai （车牌闸口） 项目的一部分。
// src/output/vehicle_log.rs - 车辆进出记录
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

//! CSV 车辆记录，只追加。
//!
//! 两种列布局：
//!
//! ```text
//! Full:    timestamp,plate,slot,gate,path,status     （无表头）
//! Compact: Plate,slot,Timestamp                      （首行表头）
//! ```
//!
//! 读取时两种布局都能识别，表头可有可无。

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::allocator::SLOT_UNAVAILABLE;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
/// path 列中路径点之间的分隔符
pub const PATH_SEPARATOR: &str = " → ";
const COMPACT_HEADER: [&str; 3] = ["Plate", "slot", "Timestamp"];

#[derive(Error, Debug)]
pub enum VehicleLogError {
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("CSV 错误: {0}")]
  Csv(#[from] csv::Error),
  #[error("第 {line} 行格式错误: {reason}")]
  Malformed { line: u64, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogSchema {
  #[default]
  Full,
  Compact,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VehicleRecord {
  pub timestamp: NaiveDateTime,
  pub plate: String,
  pub slot: String,
  pub gate: String,
  pub path: Vec<String>,
  pub status: String,
}

impl VehicleRecord {
  pub fn has_slot(&self) -> bool {
    !self.slot.is_empty() && self.slot != SLOT_UNAVAILABLE
  }

  fn path_column(&self) -> String {
    if self.path.is_empty() {
      SLOT_UNAVAILABLE.to_string()
    } else {
      self.path.join(PATH_SEPARATOR)
    }
  }
}

#[derive(Debug, Clone)]
pub struct VehicleLog {
  path: PathBuf,
  schema: LogSchema,
}

impl VehicleLog {
  pub fn new(path: impl Into<PathBuf>, schema: LogSchema) -> Self {
    Self {
      path: path.into(),
      schema,
    }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn schema(&self) -> LogSchema {
    self.schema
  }

  /// 追加一条记录，整条记录一次写入
  pub fn append(&self, record: &VehicleRecord) -> Result<(), VehicleLogError> {
    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    let is_empty = std::fs::metadata(&self.path)
      .map(|m| m.len() == 0)
      .unwrap_or(true);

    let mut wtr = csv::WriterBuilder::new()
      .has_headers(false)
      .from_writer(Vec::new());
    let timestamp = record.timestamp.format(TIMESTAMP_FORMAT).to_string();
    match self.schema {
      LogSchema::Full => {
        wtr.write_record([
          timestamp.as_str(),
          record.plate.as_str(),
          record.slot.as_str(),
          record.gate.as_str(),
          record.path_column().as_str(),
          record.status.as_str(),
        ])?;
      }
      LogSchema::Compact => {
        if is_empty {
          wtr.write_record(COMPACT_HEADER)?;
        }
        wtr.write_record([record.plate.as_str(), record.slot.as_str(), timestamp.as_str()])?;
      }
    }
    let bytes = wtr.into_inner().map_err(|e| e.into_error())?;

    let mut file = OpenOptions::new()
      .create(true)
      .append(true)
      .open(&self.path)?;
    file.write_all(&bytes)?;
    debug!("写入车辆记录: {} -> {}", record.plate, self.path.display());
    Ok(())
  }

  pub fn read_records(&self) -> Result<Vec<VehicleRecord>, VehicleLogError> {
    read_records(&self.path)
  }
}

fn parse_timestamp(text: &str, line: u64) -> Result<NaiveDateTime, VehicleLogError> {
  NaiveDateTime::parse_from_str(text.trim(), TIMESTAMP_FORMAT).map_err(|e| {
    VehicleLogError::Malformed {
      line,
      reason: format!("时间戳 '{}' 无法解析: {}", text, e),
    }
  })
}

fn parse_path(text: &str) -> Vec<String> {
  let text = text.trim();
  if text.is_empty() || text == SLOT_UNAVAILABLE {
    return Vec::new();
  }
  text
    .split('→')
    .map(str::trim)
    .filter(|s| !s.is_empty())
    .map(str::to_string)
    .collect()
}

/// 读取记录文件，兼容两种列布局
pub fn read_records(path: impl AsRef<Path>) -> Result<Vec<VehicleRecord>, VehicleLogError> {
  let mut rdr = csv::ReaderBuilder::new()
    .has_headers(false)
    .flexible(true)
    .from_path(path.as_ref())?;

  let mut records = Vec::new();
  for row in rdr.records() {
    let row = row?;
    let line = row.position().map(|p| p.line()).unwrap_or(0);
    let field = |i: usize| row.get(i).unwrap_or_default().trim().to_string();

    match row.len() {
      3 => {
        if field(0).eq_ignore_ascii_case("plate") {
          continue;
        }
        records.push(VehicleRecord {
          timestamp: parse_timestamp(&field(2), line)?,
          plate: field(0),
          slot: field(1),
          gate: String::new(),
          path: Vec::new(),
          status: String::new(),
        });
      }
      6 => {
        if field(1).eq_ignore_ascii_case("plate") {
          continue;
        }
        records.push(VehicleRecord {
          timestamp: parse_timestamp(&field(0), line)?,
          plate: field(1),
          slot: field(2),
          gate: field(3),
          path: parse_path(&field(4)),
          status: field(5),
        });
      }
      n => {
        return Err(VehicleLogError::Malformed {
          line,
          reason: format!("列数为 {}", n),
        });
      }
    }
  }
  Ok(records)
}
