// 该文件是 Chepai （车牌闸口） 项目的一部分。
// src/input/v4l_input.rs - V4L2 摄像头输入
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

use std::pin::Pin;
use std::time::Instant;

use image::RgbImage;
use thiserror::Error;
use tracing::{error, info};
use url::Url;
use v4l::FourCC;
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;

use crate::{FromUrl, FromUrlWithScheme, frame::Frame, url_file_path};

const DEFAULT_DEVICE: &str = "/dev/video0";
const CAPTURE_WIDTH: u32 = 640;
const CAPTURE_HEIGHT: u32 = 480;

#[derive(Error, Debug)]
pub enum V4lInputError {
  #[error("URI 方案不匹配")]
  SchemaMismatch,
  #[error("无法打开设备 {path}: {source}")]
  OpenDevice {
    path: String,
    source: std::io::Error,
  },
  #[error("V4L 错误: {0}")]
  V4lError(#[from] std::io::Error),
  #[error("设备不支持 YUYV 格式")]
  UnsupportedPixelFormat,
}

/// 摄像头输入，`v4l:///dev/video0`
///
/// 设备固定在堆上，捕获流借用它；析构时先释放流再释放设备。
pub struct V4lInput {
  device: Pin<Box<Device>>,
  stream: Option<Stream<'static>>,
  frame_index: u64,
  width: u32,
  height: u32,
  start_time: Instant,
}

impl FromUrlWithScheme for V4lInput {
  const SCHEME: &'static str = "v4l";
}

impl FromUrl for V4lInput {
  type Error = V4lInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(V4lInputError::SchemaMismatch);
    }
    let path = url_file_path(url);
    let path = if path.as_os_str().is_empty() || path.as_os_str() == "/" {
      DEFAULT_DEVICE.to_string()
    } else {
      path.to_string_lossy().into_owned()
    };
    Self::open(&path)
  }
}

impl V4lInput {
  pub fn open(device_path: &str) -> Result<Self, V4lInputError> {
    let device = Box::pin(Device::with_path(device_path).map_err(|source| {
      V4lInputError::OpenDevice {
        path: device_path.to_string(),
        source,
      }
    })?);

    let mut format = device.format()?;
    format.width = CAPTURE_WIDTH;
    format.height = CAPTURE_HEIGHT;
    format.fourcc = FourCC::new(b"YUYV");
    let format = device.set_format(&format)?;
    if format.fourcc != FourCC::new(b"YUYV") {
      return Err(V4lInputError::UnsupportedPixelFormat);
    }
    info!(
      "摄像头 {} 已打开: {}x{}",
      device_path, format.width, format.height
    );

    let mut input = Self {
      device,
      stream: None,
      frame_index: 0,
      width: format.width,
      height: format.height,
      start_time: Instant::now(),
    };

    // SAFETY: device 固定在堆上且与 stream 同属一个结构体，Drop 中先释放 stream
    let device_ref: &Device = &input.device;
    let stream = unsafe {
      let device_static: &'static Device = std::mem::transmute(device_ref);
      Stream::with_buffers(device_static, Type::VideoCapture, 4)?
    };
    input.stream = Some(stream);
    Ok(input)
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }
}

/// YUYV 4:2:2 转 RGB，每 4 字节对应两个像素
fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Vec<u8> {
  let pixels = (width * height) as usize;
  let mut rgb = Vec::with_capacity(pixels * 3);

  for chunk in yuyv.chunks_exact(4).take(pixels / 2) {
    let u = chunk[1] as f32 - 128.0;
    let v = chunk[3] as f32 - 128.0;
    for y in [chunk[0] as f32, chunk[2] as f32] {
      let r = (y + 1.402 * v).clamp(0.0, 255.0) as u8;
      let g = (y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8;
      let b = (y + 1.772 * u).clamp(0.0, 255.0) as u8;
      rgb.extend_from_slice(&[r, g, b]);
    }
  }

  rgb
}

impl Drop for V4lInput {
  fn drop(&mut self) {
    self.stream.take();
  }
}

impl Iterator for V4lInput {
  type Item = Frame;

  fn next(&mut self) -> Option<Self::Item> {
    let stream = self.stream.as_mut()?;

    let rgb = match stream.next() {
      Ok((buffer, _meta)) => yuyv_to_rgb(buffer, self.width, self.height),
      Err(e) => {
        error!("无法捕获帧: {}", e);
        return None;
      }
    };
    let Some(image) = RgbImage::from_raw(self.width, self.height, rgb) else {
      error!("捕获的帧大小与 {}x{} 不符", self.width, self.height);
      return None;
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

  #[test]
  fn grey_yuyv_maps_to_grey_rgb() {
    let rgb = yuyv_to_rgb(&[100, 128, 200, 128], 2, 1);
    assert_eq!(rgb, vec![100, 100, 100, 200, 200, 200]);
  }
}
