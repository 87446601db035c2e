// 该文件是 Chepai （车牌闸口） 项目的一部分。
// src/input/upload.rs - 上传图像输入
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

//! 上传请求体：`{"image": "data:image/jpeg;base64,...."}`，或者直接是
//! data URL 文本。逗号之后的部分按标准 base64 解码。

use base64::Engine;
use image::RgbImage;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::Frame, url_file_path};

#[derive(Error, Debug)]
pub enum UploadError {
  #[error("URI 方案不匹配")]
  SchemaMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("请求体不是合法 JSON: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("Invalid image data")]
  InvalidImageData,
  #[error("Failed to decode image")]
  DecodeFailed,
}

#[derive(Deserialize)]
struct UploadBody {
  image: String,
}

/// 从请求体中取出 data URL
pub fn extract_image_field(body: &str) -> Result<String, UploadError> {
  let body = body.trim();
  if body.starts_with('{') {
    let parsed: UploadBody = serde_json::from_str(body)?;
    Ok(parsed.image)
  } else {
    Ok(body.to_string())
  }
}

/// 解码 data URL，缺少逗号时为 [`UploadError::InvalidImageData`]
pub fn decode_upload(data_url: &str) -> Result<RgbImage, UploadError> {
  let (_, payload) = data_url
    .split_once(',')
    .ok_or(UploadError::InvalidImageData)?;
  let bytes = base64::engine::general_purpose::STANDARD
    .decode(payload.trim())
    .map_err(|_| UploadError::DecodeFailed)?;
  let image = image::load_from_memory(&bytes).map_err(|_| UploadError::DecodeFailed)?;
  Ok(image.into_rgb8())
}

/// 读取保存在文件中的上传请求体，只产生一帧
pub struct UploadInput {
  image: Option<RgbImage>,
}

impl FromUrlWithScheme for UploadInput {
  const SCHEME: &'static str = "upload";
}

impl FromUrl for UploadInput {
  type Error = UploadError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(UploadError::SchemaMismatch);
    }
    let body = std::fs::read_to_string(url_file_path(url))?;
    Self::from_body(&body)
  }
}

impl UploadInput {
  pub fn from_body(body: &str) -> Result<Self, UploadError> {
    let data_url = extract_image_field(body)?;
    Ok(Self {
      image: Some(decode_upload(&data_url)?),
    })
  }
}

impl Iterator for UploadInput {
  type Item = Frame;

  fn next(&mut self) -> Option<Self::Item> {
    self.image.take().map(|image| Frame::new(image, 0, 0))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Cursor;

  fn png_data_url(width: u32, height: u32) -> String {
    let mut bytes = Vec::new();
    RgbImage::new(width, height)
      .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
      .unwrap();
    format!(
      "data:image/png;base64,{}",
      base64::engine::general_purpose::STANDARD.encode(bytes)
    )
  }

  #[test]
  fn decodes_json_body() {
    let body = format!("{{\"image\": \"{}\"}}", png_data_url(12, 8));
    let frame = UploadInput::from_body(&body).unwrap().next().unwrap();
    assert_eq!((frame.width(), frame.height()), (12, 8));
  }

  #[test]
  fn missing_comma_is_invalid_data() {
    let err = decode_upload("data:image/png;base64").unwrap_err();
    assert!(matches!(err, UploadError::InvalidImageData));
    assert_eq!(err.to_string(), "Invalid image data");
  }

  #[test]
  fn garbage_payload_fails_to_decode() {
    let err = decode_upload("data:image/png;base64,bm90IGFuIGltYWdl").unwrap_err();
    assert_eq!(err.to_string(), "Failed to decode image");
    assert!(matches!(
      decode_upload("data:image/png;base64,@@@"),
      Err(UploadError::DecodeFailed)
    ));
  }
}
