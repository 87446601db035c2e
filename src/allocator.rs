// 该文件是 Chepai （车牌闸口） 项目的一部分。
// src/allocator.rs - 车位分配进程
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

//! # 车位分配
//!
//! 车位分配算法是外部程序，车牌作为最后一个参数传入。程序输出 JSON
//! （`{"plate": .., "slot": .., "path": [..]}`）或逐行文本
//! （`Slot: A1` / `Path: ENTRY N1 A1`）。任何失败都只会得到
//! [`Allocation::Unavailable`]，不会中断流水线。

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::model::PlateString;
use crate::process::{ProcessError, run_with_timeout};

/// 未分配车位时写入记录的占位值
pub const SLOT_UNAVAILABLE: &str = "N/A";

#[derive(Error, Debug)]
pub enum AllocatorError {
  #[error(transparent)]
  Process(#[from] ProcessError),
  #[error("分配进程退出状态 {status}: {output}")]
  ExitStatus { status: String, output: String },
  #[error("分配进程报告错误: {0}")]
  Reported(String),
  #[error("分配结果中没有车位: {0}")]
  MissingSlot(String),
  #[error("车位分配未启用")]
  Disabled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Allocation {
  Assigned { slot: String, path: Vec<String> },
  Unavailable { reason: String },
}

impl Allocation {
  pub fn slot(&self) -> &str {
    match self {
      Allocation::Assigned { slot, .. } => slot,
      Allocation::Unavailable { .. } => SLOT_UNAVAILABLE,
    }
  }

  pub fn path(&self) -> &[String] {
    match self {
      Allocation::Assigned { path, .. } => path,
      Allocation::Unavailable { .. } => &[],
    }
  }

  pub fn is_assigned(&self) -> bool {
    matches!(self, Allocation::Assigned { .. })
  }
}

impl From<Result<(String, Vec<String>), AllocatorError>> for Allocation {
  fn from(result: Result<(String, Vec<String>), AllocatorError>) -> Self {
    match result {
      Ok((slot, path)) => Allocation::Assigned { slot, path },
      Err(e) => Allocation::Unavailable {
        reason: e.to_string(),
      },
    }
  }
}

pub trait SlotAllocator {
  fn allocate(&self, plate: &PlateString) -> Allocation;
}

impl<A: SlotAllocator + ?Sized> SlotAllocator for Box<A> {
  fn allocate(&self, plate: &PlateString) -> Allocation {
    (**self).allocate(plate)
  }
}

/// 不做分配，所有车牌都记为无车位
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledAllocator;

impl SlotAllocator for DisabledAllocator {
  fn allocate(&self, _plate: &PlateString) -> Allocation {
    Err(AllocatorError::Disabled).into()
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocatorConfig {
  pub enabled: bool,
  pub program: PathBuf,
  /// 位于车牌之前的固定参数
  pub args: Vec<String>,
  pub timeout_ms: u64,
  pub working_dir: Option<PathBuf>,
}

impl Default for AllocatorConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      program: PathBuf::from("./parking"),
      args: Vec::new(),
      timeout_ms: 10_000,
      working_dir: None,
    }
  }
}

impl AllocatorConfig {
  pub fn build(&self) -> Box<dyn SlotAllocator> {
    if self.enabled {
      Box::new(ProcessAllocator::from_config(self))
    } else {
      Box::new(DisabledAllocator)
    }
  }
}

#[derive(Debug, Clone)]
pub struct ProcessAllocator {
  program: PathBuf,
  args: Vec<String>,
  timeout: Duration,
  working_dir: Option<PathBuf>,
}

impl ProcessAllocator {
  pub fn new(program: impl Into<PathBuf>) -> Self {
    Self {
      program: program.into(),
      args: Vec::new(),
      timeout: Duration::from_secs(10),
      working_dir: None,
    }
  }

  pub fn from_config(config: &AllocatorConfig) -> Self {
    Self {
      program: config.program.clone(),
      args: config.args.clone(),
      timeout: Duration::from_millis(config.timeout_ms),
      working_dir: config.working_dir.clone(),
    }
  }

  pub fn with_args<I, S>(mut self, args: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.args = args.into_iter().map(Into::into).collect();
    self
  }

  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
    self.working_dir = Some(dir.into());
    self
  }

  pub fn try_allocate(&self, plate: &PlateString) -> Result<(String, Vec<String>), AllocatorError> {
    let mut cmd = Command::new(&self.program);
    cmd.args(&self.args).arg(plate.as_str());
    if let Some(dir) = &self.working_dir {
      cmd.current_dir(dir);
    }

    let out = run_with_timeout(cmd, None, self.timeout)?;
    debug!("分配进程输出: {}", out.stdout.trim());
    if !out.status.success() {
      return Err(AllocatorError::ExitStatus {
        status: out.status.to_string(),
        output: out.stdout.trim().to_string(),
      });
    }
    parse_output(&out.stdout)
  }
}

impl SlotAllocator for ProcessAllocator {
  fn allocate(&self, plate: &PlateString) -> Allocation {
    let result = self.try_allocate(plate);
    match &result {
      Ok((slot, path)) => info!("车牌 {} 分配到车位 {} (路径 {:?})", plate, slot, path),
      Err(e) => warn!("车牌 {} 分配失败: {}", plate, e),
    }
    result.into()
  }
}

fn value_to_string(value: &Value) -> Option<String> {
  match value {
    Value::String(s) => Some(s.trim().to_string()),
    Value::Number(n) => Some(n.to_string()),
    _ => None,
  }
}

fn split_path(text: &str) -> Vec<String> {
  text
    .split(|c: char| c.is_whitespace() || c == ',')
    .filter(|s| !s.is_empty())
    .map(str::to_string)
    .collect()
}

fn parse_json(object: &serde_json::Map<String, Value>) -> (Option<String>, Vec<String>) {
  let slot = object.get("slot").and_then(value_to_string);
  let path = match object.get("path") {
    Some(Value::Array(items)) => items.iter().filter_map(value_to_string).collect(),
    Some(Value::String(s)) => split_path(s),
    _ => Vec::new(),
  };
  (slot, path)
}

fn parse_lines(text: &str) -> (Option<String>, Vec<String>) {
  let mut slot = None;
  let mut path = Vec::new();
  for line in text.lines() {
    let lower = line.to_lowercase();
    let value = line.rsplit(':').next().unwrap_or_default().trim();
    if lower.contains("slot") {
      slot = Some(value.to_string());
    }
    if lower.contains("path") {
      path = split_path(value);
    }
  }
  (slot, path)
}

/// 解析分配进程的标准输出，先按 JSON，再按逐行文本
pub fn parse_output(stdout: &str) -> Result<(String, Vec<String>), AllocatorError> {
  let text = stdout.trim();
  if let Some(line) = text.lines().find(|l| l.trim_start().starts_with("ERROR")) {
    return Err(AllocatorError::Reported(line.trim().to_string()));
  }

  let (slot, path) = match serde_json::from_str::<Value>(text) {
    Ok(Value::Object(object)) => {
      if let Some(error) = object.get("error") {
        let message = value_to_string(error).unwrap_or_else(|| error.to_string());
        return Err(AllocatorError::Reported(message));
      }
      parse_json(&object)
    }
    _ => parse_lines(text),
  };

  match slot {
    Some(slot) if !slot.is_empty() => Ok((slot, path)),
    _ => Err(AllocatorError::MissingSlot(text.to_string())),
  }
}
