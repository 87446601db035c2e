// 该文件是 Chepai （车牌闸口） 项目的一部分。
// src/input/read_directory.rs - 目录回放输入
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
use std::time::Instant;

use image::ImageReader;
use thiserror::Error;
use tracing::{debug, error};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::Frame, url_file_path};

const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "webp"];

#[derive(Error, Debug)]
pub enum DirectoryInputError {
  #[error("URI 方案不匹配")]
  SchemaMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("目录中没有图像: {0}")]
  Empty(PathBuf),
}

/// 按文件名字典序逐张回放目录中的图像
pub struct DirectoryInput {
  files: std::vec::IntoIter<PathBuf>,
  frame_index: u64,
  start_time: Instant,
}

impl FromUrlWithScheme for DirectoryInput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryInput {
  type Error = DirectoryInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(DirectoryInputError::SchemaMismatch);
    }
    Self::open(url_file_path(url))
  }
}

fn is_image(path: &Path) -> bool {
  path
    .extension()
    .and_then(|e| e.to_str())
    .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

impl DirectoryInput {
  pub fn open(directory: impl AsRef<Path>) -> Result<Self, DirectoryInputError> {
    let directory = directory.as_ref();
    let mut files = Vec::new();
    for entry in std::fs::read_dir(directory)? {
      let path = entry?.path();
      if path.is_file() && is_image(&path) {
        files.push(path);
      }
    }
    if files.is_empty() {
      return Err(DirectoryInputError::Empty(directory.to_path_buf()));
    }
    files.sort();
    debug!("目录 {} 中共 {} 张图像", directory.display(), files.len());

    Ok(Self {
      files: files.into_iter(),
      frame_index: 0,
      start_time: Instant::now(),
    })
  }

  pub fn remaining(&self) -> usize {
    self.files.len()
  }
}

impl Iterator for DirectoryInput {
  type Item = Frame;

  fn next(&mut self) -> Option<Self::Item> {
    let path = self.files.next()?;
    let image = match ImageReader::open(&path).and_then(|r| r.with_guessed_format()) {
      Ok(reader) => match reader.decode() {
        Ok(image) => image.into_rgb8(),
        Err(e) => {
          error!("无法解码图像 {}: {}", path.display(), e);
          return None;
        }
      },
      Err(e) => {
        error!("无法打开图像 {}: {}", path.display(), e);
        return None;
      }
    };

    let frame = Frame::new(
      image,
      self.frame_index,
      self.start_time.elapsed().as_millis() as u64,
    );
    self.frame_index += 1;
    Some(frame)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::RgbImage;

  #[test]
  fn replays_images_in_name_order() {
    let dir = tempfile::tempdir().unwrap();
    RgbImage::new(10, 10).save(dir.path().join("b.png")).unwrap();
    RgbImage::new(20, 10).save(dir.path().join("a.png")).unwrap();
    std::fs::write(dir.path().join("notes.txt"), "skip").unwrap();

    let input = DirectoryInput::open(dir.path()).unwrap();
    assert_eq!(input.remaining(), 2);
    let frames: Vec<Frame> = input.collect();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].width(), 20);
    assert_eq!(frames[1].index, 1);
  }

  #[test]
  fn corrupt_image_ends_stream() {
    let dir = tempfile::tempdir().unwrap();
    RgbImage::new(10, 10).save(dir.path().join("a.png")).unwrap();
    std::fs::write(dir.path().join("b.png"), b"not a png").unwrap();
    RgbImage::new(10, 10).save(dir.path().join("c.png")).unwrap();

    let frames: Vec<Frame> = DirectoryInput::open(dir.path()).unwrap().collect();
    assert_eq!(frames.len(), 1);
  }

  #[test]
  fn empty_directory_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
      DirectoryInput::open(dir.path()),
      Err(DirectoryInputError::Empty(_))
    ));
  }
}
