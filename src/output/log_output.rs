// 该文件是 Chepai （车牌闸口） 项目的一部分。
// src/output/log_output.rs - 日志输出
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
use tracing::{debug, info};

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  gate::FrameOutcome,
  output::{PATH_SEPARATOR, Render},
};

#[derive(Error, Debug)]
pub enum LogOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

/// 把每帧结果写到 tracing，放行记录用 info，其余用 debug
pub struct LogOutput;

impl FromUrlWithScheme for LogOutput {
  const SCHEME: &'static str = "log";
}

impl FromUrl for LogOutput {
  type Error = LogOutputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(LogOutputError::SchemeMismatch);
    }
    Ok(LogOutput)
  }
}

impl Render<Frame, FrameOutcome> for LogOutput {
  type Error = LogOutputError;

  fn render_result(&self, frame: &Frame, result: &FrameOutcome) -> Result<(), Self::Error> {
    match &result.entry {
      Some(entry) => {
        let path = if entry.record.path.is_empty() {
          "-".to_string()
        } else {
          entry.record.path.join(PATH_SEPARATOR)
        };
        info!(
          "帧 {}: 车牌 {} 车位 {} 路线 {} 状态 {}",
          frame.index, entry.record.plate, entry.record.slot, path, entry.record.status
        );
      }
      None => debug!("帧 {}: {}", frame.index, result.status),
    }
    Ok(())
  }
}
