// 该文件是 Chepai （车牌闸口） 项目的一部分。
// src/session.rs - 读数缓冲与会话去重
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

//! 时间稳定器
//!
//! 单帧 OCR 结果噪声很大，这里保存最近 N 次合法读数，用多数投票得到
//! 最终车牌；领先者的票数达到 `min_votes` 才算稳定。
//!
//! 发出的车牌在调用方写完记录并 [`PlateSession::commit`] 之后才进入
//! 已记录集合，此后在整个进程生命周期内不再重复发出。

use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::model::PlateString;

/// 票数相同时的取舍规则
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
  /// 取缓冲区中最先出现的
  #[default]
  FirstSeen,
  /// 取最近一次出现的
  MostRecent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilizerConfig {
  /// 缓冲区容量 N
  pub window: usize,
  /// 缓冲区填满后才发出车牌
  pub require_full_window: bool,
  pub tie_break: TieBreak,
  /// 未检测到车牌的帧是否也清空缓冲区
  pub clear_on_miss: bool,
  /// 发出车牌所需的最少票数，缺省为严格多数 `window / 2 + 1`
  pub min_votes: Option<usize>,
}

impl Default for StabilizerConfig {
  fn default() -> Self {
    Self {
      window: 5,
      require_full_window: true,
      tie_break: TieBreak::FirstSeen,
      clear_on_miss: false,
      min_votes: None,
    }
  }
}

impl StabilizerConfig {
  /// 单帧模式：一次合法读数即可发出
  pub fn single_shot() -> Self {
    Self {
      window: 1,
      ..Self::default()
    }
  }

  pub fn required_votes(&self) -> usize {
    self.min_votes.unwrap_or(self.window / 2 + 1)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
  Empty,
  Accumulating,
  Stable,
}

/// 一次观测后的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
  /// 缓冲区被清空
  Cleared,
  /// 没有状态变化
  Unchanged,
  /// 仍在累积，给出当前领先者
  Accumulating { leader: PlateString, votes: usize },
  /// 新的稳定车牌，需要写记录
  Emit { plate: PlateString, votes: usize },
  /// 稳定车牌已在本次运行中发出过
  Suppressed(PlateString),
}

/// 一次运行的会话状态：读数缓冲 + 已记录车牌集合
#[derive(Debug)]
pub struct PlateSession {
  config: StabilizerConfig,
  readings: VecDeque<PlateString>,
  logged: HashSet<PlateString>,
}

impl Default for PlateSession {
  fn default() -> Self {
    Self::new(StabilizerConfig::default())
  }
}

impl PlateSession {
  pub fn new(mut config: StabilizerConfig) -> Self {
    config.window = config.window.max(1);
    Self {
      readings: VecDeque::with_capacity(config.window),
      logged: HashSet::new(),
      config,
    }
  }

  pub fn config(&self) -> &StabilizerConfig {
    &self.config
  }

  pub fn readings(&self) -> impl Iterator<Item = &PlateString> {
    self.readings.iter()
  }

  pub fn buffered(&self) -> usize {
    self.readings.len()
  }

  pub fn is_logged(&self, plate: &PlateString) -> bool {
    self.logged.contains(plate)
  }

  pub fn logged_count(&self) -> usize {
    self.logged.len()
  }

  pub fn state(&self) -> SessionState {
    if self.readings.is_empty() {
      SessionState::Empty
    } else if self.readings.len() < self.config.window {
      SessionState::Accumulating
    } else {
      SessionState::Stable
    }
  }

  /// 当前缓冲区中的多数票车牌及其票数
  pub fn majority(&self) -> Option<(PlateString, usize)> {
    // (车牌, 票数, 最后出现位置)，按首次出现顺序排列
    let mut tally: Vec<(&PlateString, usize, usize)> = Vec::new();
    for (pos, plate) in self.readings.iter().enumerate() {
      match tally.iter_mut().find(|(p, _, _)| *p == plate) {
        Some(entry) => {
          entry.1 += 1;
          entry.2 = pos;
        }
        None => tally.push((plate, 1, pos)),
      }
    }

    let mut best: Option<&(&PlateString, usize, usize)> = None;
    for entry in &tally {
      best = match best {
        None => Some(entry),
        Some(current) if entry.1 > current.1 => Some(entry),
        Some(current) if entry.1 == current.1 && self.config.tie_break == TieBreak::MostRecent => {
          if entry.2 > current.2 { Some(entry) } else { Some(current) }
        }
        keep => keep,
      };
    }
    best.map(|(plate, votes, _)| ((*plate).clone(), *votes))
  }

  /// 记录一次合法读数
  pub fn observe(&mut self, plate: PlateString) -> Observation {
    self.readings.push_back(plate);
    while self.readings.len() > self.config.window {
      self.readings.pop_front();
    }

    let Some((leader, votes)) = self.majority() else {
      return Observation::Unchanged;
    };

    if self.config.require_full_window && self.readings.len() < self.config.window {
      debug!(
        "读数累积中 {}/{}，领先: {} ({} 票)",
        self.readings.len(),
        self.config.window,
        leader,
        votes
      );
      return Observation::Accumulating { leader, votes };
    }

    if votes < self.config.required_votes() {
      debug!(
        "领先者 {} 只有 {} 票，需要 {} 票",
        leader,
        votes,
        self.config.required_votes()
      );
      return Observation::Accumulating { leader, votes };
    }

    if self.logged.contains(&leader) {
      debug!("车牌 {} 已记录，忽略", leader);
      return Observation::Suppressed(leader);
    }

    info!("稳定车牌: {} ({}/{} 票)", leader, votes, self.readings.len());
    Observation::Emit {
      plate: leader,
      votes,
    }
  }

  /// 记录写入成功后把车牌加入已记录集合
  pub fn commit(&mut self, plate: &PlateString) {
    self.logged.insert(plate.clone());
  }

  /// 非法读数打断当前序列
  pub fn reject(&mut self) -> Observation {
    if !self.readings.is_empty() {
      debug!("非法读数，清空 {} 条缓冲", self.readings.len());
    }
    self.readings.clear();
    Observation::Cleared
  }

  /// 本帧没有候选车牌
  pub fn miss(&mut self) -> Observation {
    if self.config.clear_on_miss {
      self.reject()
    } else {
      Observation::Unchanged
    }
  }
}
