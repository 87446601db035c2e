// 该文件是 Chepai （车牌闸口） 项目的一部分。
// src/model/ocr/tesseract_cli.rs - 调用 tesseract 可执行文件
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
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use image::{GrayImage, ImageFormat};
use tracing::{debug, info};

use super::{OcrConfig, OcrError, SegmentationMode, TextCandidate, TextEngine};
use crate::process::run_with_timeout;

/// TSV 中单词级别的行
const WORD_LEVEL: u32 = 5;

#[derive(Debug, Clone)]
pub struct TesseractCli {
  program: PathBuf,
  language: String,
  whitelist: String,
  timeout: Duration,
}

impl TesseractCli {
  pub fn new(program: impl Into<PathBuf>, language: &str, whitelist: &str, timeout: Duration) -> Self {
    Self {
      program: program.into(),
      language: language.to_string(),
      whitelist: whitelist.to_string(),
      timeout,
    }
  }

  pub fn from_config(config: &OcrConfig) -> Self {
    Self::new(
      &config.program,
      &config.language,
      &config.whitelist,
      Duration::from_millis(config.timeout_ms),
    )
  }

  /// 确认 tesseract 可以运行
  pub fn probe(&self) -> Result<String, OcrError> {
    let mut cmd = Command::new(&self.program);
    cmd.arg("--version");
    let out = run_with_timeout(cmd, None, self.timeout)
      .map_err(|e| OcrError::EngineUnavailable(e.to_string()))?;
    if !out.status.success() {
      return Err(OcrError::EngineUnavailable(format!(
        "{} --version 退出状态 {}",
        self.program.display(),
        out.status
      )));
    }
    // 部分版本把版本信息写到 stderr
    let text = if out.stdout.trim().is_empty() {
      out.stderr
    } else {
      out.stdout
    };
    let version = text.lines().next().unwrap_or_default().trim().to_string();
    info!("OCR 引擎: {}", version);
    Ok(version)
  }

  fn command(&self, mode: SegmentationMode) -> Command {
    let mut cmd = Command::new(&self.program);
    cmd
      .arg("stdin")
      .arg("stdout")
      .arg("--psm")
      .arg(mode.code().to_string())
      .arg("-l")
      .arg(&self.language);
    if !self.whitelist.is_empty() {
      cmd
        .arg("-c")
        .arg(format!("tessedit_char_whitelist={}", self.whitelist));
    }
    cmd.arg("tsv");
    cmd
  }
}

impl TextEngine for TesseractCli {
  fn read_text(
    &self,
    image: &GrayImage,
    mode: SegmentationMode,
  ) -> Result<Vec<TextCandidate>, OcrError> {
    let mut png = Vec::new();
    image.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;

    let out = run_with_timeout(self.command(mode), Some(png), self.timeout)?;
    if !out.status.success() {
      return Err(OcrError::EngineFailed(format!(
        "退出状态 {}: {}",
        out.status,
        out.stderr.trim()
      )));
    }
    let candidates = parse_tsv(&out.stdout);
    debug!("tesseract {} 返回 {} 行", mode, candidates.len());
    Ok(candidates)
  }
}

/// 把 TSV 中的单词按 (block, par, line) 合并成行，置信度取单词均值
pub fn parse_tsv(tsv: &str) -> Vec<TextCandidate> {
  // (行键, 单词, 置信度之和)
  let mut lines: Vec<((u32, u32, u32), Vec<String>, f32)> = Vec::new();

  for row in tsv.lines() {
    let cols: Vec<&str> = row.split('\t').collect();
    if cols.len() < 12 {
      continue;
    }
    let Ok(level) = cols[0].trim().parse::<u32>() else {
      // 表头
      continue;
    };
    if level != WORD_LEVEL {
      continue;
    }
    let text = cols[11..].join("\t");
    let text = text.trim();
    let conf = cols[10].trim().parse::<f32>().unwrap_or(-1.0);
    if text.is_empty() || conf < 0.0 {
      continue;
    }
    let key = (
      cols[2].trim().parse().unwrap_or(0),
      cols[3].trim().parse().unwrap_or(0),
      cols[4].trim().parse().unwrap_or(0),
    );

    match lines.iter_mut().find(|(k, _, _)| *k == key) {
      Some((_, words, sum)) => {
        words.push(text.to_string());
        *sum += conf;
      }
      None => lines.push((key, vec![text.to_string()], conf)),
    }
  }

  lines
    .into_iter()
    .map(|(_, words, sum)| {
      let mean = sum / words.len() as f32;
      TextCandidate::new(words.join(" "), (mean / 100.0).clamp(0.0, 1.0))
    })
    .collect()
}
