// 该文件是 Chepai （车牌闸口） 项目的一部分。
// src/output/snapshot.rs - 车牌区域快照
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

use std::path::{Path, PathBuf};

use chrono::{Datelike, NaiveDateTime};
use image::RgbImage;
use thiserror::Error;
use tracing::debug;

use crate::model::PlateString;

#[derive(Error, Debug)]
pub enum SnapshotError {
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// 按日期分目录保存车牌区域，文件名为 `<车牌>_<YYYYmmdd_HHMMSS>.jpg`
#[derive(Debug, Clone)]
pub struct SnapshotRecord {
  directory: PathBuf,
}

impl SnapshotRecord {
  pub fn new(directory: impl Into<PathBuf>) -> Self {
    Self {
      directory: directory.into(),
    }
  }

  pub fn directory(&self) -> &Path {
    &self.directory
  }

  pub fn snapshot_path(&self, plate: &PlateString, at: NaiveDateTime) -> PathBuf {
    self
      .directory
      .join(at.year().to_string())
      .join(format!("{:02}", at.month()))
      .join(format!("{:02}", at.day()))
      .join(format!("{}_{}.jpg", plate, at.format("%Y%m%d_%H%M%S")))
  }

  pub fn save(
    &self,
    plate: &PlateString,
    region: &RgbImage,
    at: NaiveDateTime,
  ) -> Result<PathBuf, SnapshotError> {
    let path = self.snapshot_path(plate, at);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)?;
    }
    region.save(&path)?;
    debug!("保存车牌快照: {}", path.display());
    Ok(path)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::PlateNormalizer;
  use chrono::NaiveDate;

  #[test]
  fn saves_under_dated_directory() {
    let dir = tempfile::tempdir().unwrap();
    let snapshots = SnapshotRecord::new(dir.path());
    let plate = PlateNormalizer::default().validate("KA01AB1234").unwrap();
    let at = NaiveDate::from_ymd_opt(2026, 3, 4)
      .unwrap()
      .and_hms_opt(5, 6, 7)
      .unwrap();

    let path = snapshots
      .save(&plate, &RgbImage::new(40, 12), at)
      .unwrap();
    assert_eq!(
      path,
      dir.path().join("2026/03/04/KA01AB1234_20260304_050607.jpg")
    );
    assert!(path.exists());
  }
}
