// 该文件是 Chepai （车牌闸口） 项目的一部分。
// src/gate.rs - 入口闸口
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

//! # 入口闸口
//!
//! 把单帧读取结果送入会话稳定器；出现新的稳定车牌时保存快照、
//! （经确认后）调用车位分配进程并写入车辆记录。
//!
//! 单帧的任何失败都不会终止处理循环，只有记录文件写入失败会作为
//! [`GateError`] 返回给调用方。

use std::cell::{Ref, RefCell};
use std::fmt;
use std::io::{BufRead, Write};
use std::path::PathBuf;

use chrono::{Local, NaiveDateTime};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::allocator::{Allocation, DisabledAllocator, SlotAllocator};
use crate::frame::{BoundingBox, Frame};
use crate::model::{Model, PlateReading, PlateString};
use crate::output::{LogSchema, SnapshotRecord, VehicleLog, VehicleLogError, VehicleRecord};
use crate::session::{Observation, PlateSession, StabilizerConfig};

#[derive(Error, Debug)]
pub enum GateError {
  #[error("车辆记录写入失败: {0}")]
  Log(#[from] VehicleLogError),
}

/// 调用车位分配前的人工确认
pub trait Confirm {
  fn confirm(&self, plate: &PlateString) -> bool;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AutoConfirm;

impl Confirm for AutoConfirm {
  fn confirm(&self, _plate: &PlateString) -> bool {
    true
  }
}

/// 在终端询问操作员，直接回车视为同意
#[derive(Debug, Clone, Copy, Default)]
pub struct StdinConfirm;

impl Confirm for StdinConfirm {
  fn confirm(&self, plate: &PlateString) -> bool {
    eprint!("车牌 {} 是否放行? [Y/n] ", plate);
    let _ = std::io::stderr().flush();
    let mut answer = String::new();
    match std::io::stdin().lock().read_line(&mut answer) {
      Ok(0) | Err(_) => false,
      Ok(_) => matches!(answer.trim().to_lowercase().as_str(), "" | "y" | "yes"),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
  pub log_path: PathBuf,
  pub schema: LogSchema,
  /// 是否保存车牌区域快照
  pub snapshots: bool,
  pub snapshot_dir: PathBuf,
  pub gate: String,
  pub status: String,
  /// 未确认放行时记录的状态
  pub held_status: String,
}

impl Default for SinkConfig {
  fn default() -> Self {
    Self {
      log_path: PathBuf::from("vehicle_logs.csv"),
      schema: LogSchema::Full,
      snapshots: true,
      snapshot_dir: PathBuf::from("plates/plate_img"),
      gate: "Entry".to_string(),
      status: "IN".to_string(),
      held_status: "HELD".to_string(),
    }
  }
}

/// 单帧在流水线中的去向
#[derive(Debug, Clone, PartialEq)]
pub enum FrameStatus {
  NotDetected,
  RegionTooSmall,
  TextNotDetected,
  Invalid { raw: String },
  Observed(Observation),
  Failed(String),
}

impl fmt::Display for FrameStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      FrameStatus::NotDetected => write!(f, "未检测到车牌"),
      FrameStatus::RegionTooSmall => write!(f, "车牌区域过小"),
      FrameStatus::TextNotDetected => write!(f, "未识别到文本"),
      FrameStatus::Invalid { raw } => write!(f, "无效车牌 '{}'", raw),
      FrameStatus::Observed(Observation::Accumulating { leader, votes }) => {
        write!(f, "累积中 {} ({} 票)", leader, votes)
      }
      FrameStatus::Observed(Observation::Emit { plate, votes }) => {
        write!(f, "新车牌 {} ({} 票)", plate, votes)
      }
      FrameStatus::Observed(Observation::Suppressed(plate)) => write!(f, "重复车牌 {}", plate),
      FrameStatus::Observed(Observation::Cleared) => write!(f, "缓冲已清空"),
      FrameStatus::Observed(Observation::Unchanged) => write!(f, "无变化"),
      FrameStatus::Failed(reason) => write!(f, "处理失败: {}", reason),
    }
  }
}

/// 一次放行记录
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
  pub record: VehicleRecord,
  pub allocation: Allocation,
  pub snapshot: Option<PathBuf>,
  pub confirmed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameOutcome {
  pub frame_index: u64,
  pub bbox: Option<BoundingBox>,
  pub status: FrameStatus,
  pub entry: Option<Entry>,
}

impl FrameOutcome {
  pub fn is_emitted(&self) -> bool {
    self.entry.is_some()
  }
}

pub struct EntryGate<M> {
  reader: M,
  session: RefCell<PlateSession>,
  allocator: Box<dyn SlotAllocator>,
  confirm: Box<dyn Confirm>,
  log: VehicleLog,
  snapshots: Option<SnapshotRecord>,
  gate: String,
  status: String,
  held_status: String,
}

impl<M> EntryGate<M>
where
  M: Model<Input = Frame, Output = PlateReading>,
  M::Error: fmt::Display,
{
  pub fn new(reader: M, stabilizer: StabilizerConfig, sink: &SinkConfig) -> Self {
    Self {
      reader,
      session: RefCell::new(PlateSession::new(stabilizer)),
      allocator: Box::new(DisabledAllocator),
      confirm: Box::new(AutoConfirm),
      log: VehicleLog::new(&sink.log_path, sink.schema),
      snapshots: sink
        .snapshots
        .then(|| SnapshotRecord::new(&sink.snapshot_dir)),
      gate: sink.gate.clone(),
      status: sink.status.clone(),
      held_status: sink.held_status.clone(),
    }
  }

  pub fn with_allocator(mut self, allocator: Box<dyn SlotAllocator>) -> Self {
    self.allocator = allocator;
    self
  }

  pub fn with_confirm(mut self, confirm: Box<dyn Confirm>) -> Self {
    self.confirm = confirm;
    self
  }

  pub fn session(&self) -> Ref<'_, PlateSession> {
    self.session.borrow()
  }

  pub fn log(&self) -> &VehicleLog {
    &self.log
  }

  pub fn process_frame(&self, frame: &Frame) -> Result<FrameOutcome, GateError> {
    let reading = match self.reader.infer(frame) {
      Ok(reading) => reading,
      Err(e) => {
        warn!("帧 {} 读取失败: {}", frame.index, e);
        return Ok(FrameOutcome {
          frame_index: frame.index,
          bbox: None,
          status: FrameStatus::Failed(e.to_string()),
          entry: None,
        });
      }
    };
    let bbox = reading.bbox();

    let observed = {
      let mut session = self.session.borrow_mut();
      match reading {
        PlateReading::NoDetection => {
          session.miss();
          Err(FrameStatus::NotDetected)
        }
        PlateReading::RegionTooSmall { .. } => {
          session.miss();
          Err(FrameStatus::RegionTooSmall)
        }
        PlateReading::TextNotDetected { .. } => {
          session.miss();
          Err(FrameStatus::TextNotDetected)
        }
        PlateReading::Invalid { raw, .. } => {
          session.reject();
          Err(FrameStatus::Invalid { raw })
        }
        PlateReading::Valid { plate, region, .. } => Ok((session.observe(plate), region.image)),
      }
    };

    let (observation, region) = match observed {
      Ok(pair) => pair,
      Err(status) => {
        debug!("帧 {}: {}", frame.index, status);
        return Ok(FrameOutcome {
          frame_index: frame.index,
          bbox,
          status,
          entry: None,
        });
      }
    };

    let entry = match &observation {
      Observation::Emit { plate, .. } => {
        let entry = self.emit(plate, &region)?;
        self.session.borrow_mut().commit(plate);
        Some(entry)
      }
      _ => None,
    };
    let status = FrameStatus::Observed(observation);
    debug!("帧 {}: {}", frame.index, status);

    Ok(FrameOutcome {
      frame_index: frame.index,
      bbox,
      status,
      entry,
    })
  }

  fn emit(&self, plate: &PlateString, region: &RgbImage) -> Result<Entry, GateError> {
    let now: NaiveDateTime = Local::now().naive_local();

    let snapshot = self
      .snapshots
      .as_ref()
      .and_then(|s| match s.save(plate, region, now) {
        Ok(path) => Some(path),
        Err(e) => {
          warn!("车牌 {} 快照保存失败: {}", plate, e);
          None
        }
      });

    let confirmed = self.confirm.confirm(plate);
    let (allocation, status) = if confirmed {
      (self.allocator.allocate(plate), self.status.clone())
    } else {
      info!("车牌 {} 未确认放行", plate);
      (
        Allocation::Unavailable {
          reason: "操作员未确认".to_string(),
        },
        self.held_status.clone(),
      )
    };

    let record = VehicleRecord {
      timestamp: now,
      plate: plate.to_string(),
      slot: allocation.slot().to_string(),
      gate: self.gate.clone(),
      path: allocation.path().to_vec(),
      status,
    };
    self.log.append(&record)?;
    info!(
      "记录车辆: {} 车位 {} 状态 {}",
      record.plate, record.slot, record.status
    );

    Ok(Entry {
      record,
      allocation,
      snapshot,
      confirmed,
    })
  }
}

impl<M> Model for EntryGate<M>
where
  M: Model<Input = Frame, Output = PlateReading>,
  M::Error: fmt::Display,
{
  type Input = Frame;
  type Output = FrameOutcome;
  type Error = GateError;

  fn infer(&self, frame: &Frame) -> Result<FrameOutcome, GateError> {
    self.process_frame(frame)
  }
}

#[cfg(test)]
mod tests {
  use std::collections::VecDeque;

  use super::*;
  use crate::allocator::ProcessAllocator;
  use crate::frame::Region;
  use crate::model::{NormalizeError, PlateNormalizer};

  /// 依次返回预设结果的读取器
  struct Replay(RefCell<VecDeque<PlateReading>>);

  impl Replay {
    fn new(readings: Vec<PlateReading>) -> Self {
      Self(RefCell::new(readings.into()))
    }
  }

  impl Model for Replay {
    type Input = Frame;
    type Output = PlateReading;
    type Error = String;

    fn infer(&self, _frame: &Frame) -> Result<PlateReading, String> {
      self
        .0
        .borrow_mut()
        .pop_front()
        .ok_or_else(|| "没有更多结果".to_string())
    }
  }

  fn valid(text: &str) -> PlateReading {
    let image = RgbImage::new(60, 20);
    PlateReading::Valid {
      plate: PlateNormalizer::default().validate(text).unwrap(),
      raw: text.to_string(),
      confidence: 0.9,
      region: Region::crop(&image, BoundingBox::new(0, 0, 60, 20)).unwrap(),
    }
  }

  fn invalid() -> PlateReading {
    PlateReading::Invalid {
      bbox: BoundingBox::new(0, 0, 60, 20),
      raw: "HELLO".to_string(),
      reason: NormalizeError::GrammarMismatch("HELLO".to_string()),
    }
  }

  fn sink(dir: &std::path::Path) -> SinkConfig {
    SinkConfig {
      log_path: dir.join("vehicle_logs.csv"),
      snapshot_dir: dir.join("plates"),
      ..SinkConfig::default()
    }
  }

  fn frame(index: u64) -> Frame {
    Frame::new(RgbImage::new(8, 8), index, 0)
  }

  struct Decline;

  impl Confirm for Decline {
    fn confirm(&self, _plate: &PlateString) -> bool {
      false
    }
  }

  #[test]
  fn stable_plate_is_logged_once() {
    let dir = tempfile::tempdir().unwrap();
    let readings = (0..7).map(|_| valid("KA01AB1234")).collect();
    let gate = EntryGate::new(Replay::new(readings), StabilizerConfig::default(), &sink(dir.path()))
      .with_allocator(Box::new(
        ProcessAllocator::new("sh").with_args(["-c", r#"echo "{\"slot\":\"a1\",\"path\":[\"ENTRY\",\"a1\"]}""#, "sh"]),
      ));

    let outcomes: Vec<FrameOutcome> = (0..7).map(|i| gate.process_frame(&frame(i)).unwrap()).collect();
    assert_eq!(outcomes.iter().filter(|o| o.is_emitted()).count(), 1);
    assert!(outcomes[4].is_emitted());
    assert!(matches!(
      outcomes[6].status,
      FrameStatus::Observed(Observation::Suppressed(_))
    ));

    let entry = outcomes[4].entry.as_ref().unwrap();
    assert_eq!(entry.record.slot, "a1");
    assert!(entry.snapshot.as_ref().is_some_and(|p| p.exists()));

    let records = gate.log().read_records().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].path, vec!["ENTRY", "a1"]);
  }

  #[test]
  fn invalid_reading_clears_buffer() {
    let dir = tempfile::tempdir().unwrap();
    let gate = EntryGate::new(
      Replay::new(vec![valid("KA01AB1234"), valid("KA01AB1234"), invalid()]),
      StabilizerConfig::default(),
      &sink(dir.path()),
    );
    gate.process_frame(&frame(0)).unwrap();
    gate.process_frame(&frame(1)).unwrap();
    assert_eq!(gate.session().buffered(), 2);
    let outcome = gate.process_frame(&frame(2)).unwrap();
    assert!(matches!(outcome.status, FrameStatus::Invalid { .. }));
    assert_eq!(gate.session().buffered(), 0);
  }

  #[test]
  fn reader_failure_does_not_stop_processing() {
    let dir = tempfile::tempdir().unwrap();
    let gate = EntryGate::new(Replay::new(Vec::new()), StabilizerConfig::default(), &sink(dir.path()));
    let outcome = gate.process_frame(&frame(0)).unwrap();
    assert!(matches!(outcome.status, FrameStatus::Failed(_)));
  }

  #[test]
  fn declined_plate_is_held_without_slot() {
    let dir = tempfile::tempdir().unwrap();
    let gate = EntryGate::new(
      Replay::new(vec![valid("MH12DE1433")]),
      StabilizerConfig::single_shot(),
      &sink(dir.path()),
    )
    .with_confirm(Box::new(Decline));

    let outcome = gate.process_frame(&frame(0)).unwrap();
    let entry = outcome.entry.unwrap();
    assert!(!entry.confirmed);
    assert_eq!(entry.record.slot, "N/A");
    assert_eq!(entry.record.status, "HELD");
  }

  #[test]
  fn failed_log_write_keeps_plate_pending() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("logs");
    std::fs::write(&blocker, b"").unwrap();
    let sink = SinkConfig {
      log_path: blocker.join("vehicle_logs.csv"),
      snapshots: false,
      ..SinkConfig::default()
    };
    let gate = EntryGate::new(
      Replay::new(vec![valid("KA01AB1234"), valid("KA01AB1234")]),
      StabilizerConfig::single_shot(),
      &sink,
    );

    assert!(gate.process_frame(&frame(0)).is_err());
    assert!(!gate.session().is_logged(&PlateNormalizer::default().validate("KA01AB1234").unwrap()));

    // 日志目录恢复后同一车牌再次出现时补写记录
    std::fs::remove_file(&blocker).unwrap();
    let outcome = gate.process_frame(&frame(1)).unwrap();
    assert!(outcome.is_emitted());
    assert_eq!(gate.log().read_records().unwrap().len(), 1);
    assert_eq!(gate.session().logged_count(), 1);
  }

  #[test]
  fn snapshots_can_be_disabled() {
    let dir = tempfile::tempdir().unwrap();
    let sink = SinkConfig {
      snapshots: false,
      ..sink(dir.path())
    };
    let gate = EntryGate::new(
      Replay::new(vec![valid("DL8CA5031")]),
      StabilizerConfig::single_shot(),
      &sink,
    );
    let entry = gate.process_frame(&frame(0)).unwrap().entry.unwrap();
    assert!(entry.snapshot.is_none());
    assert!(!dir.path().join("plates").exists());
  }
}
