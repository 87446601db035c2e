// 该文件是 Chepai （车牌闸口） 项目的一部分。
// src/bin/plate_oneshot.rs - 单张图像入场识别
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

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

use chepai::{
  FromUrl,
  config::{PipelineConfig, load_config},
  input::InputWrapper,
  output::{EntryResponse, LogSchema, PLATE_NOT_DETECTED},
  session::StabilizerConfig,
};

/// 识别一张图像（或一次上传请求）中的车牌并分配车位，结果以 JSON 输出
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// TOML 配置文件
  #[arg(long, value_name = "FILE")]
  pub config: Option<PathBuf>,
  /// 输入来源：image:///car.jpg 或 upload:///body.json
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  #[arg(long, value_name = "N", default_value = "5")]
  pub min_neighbors: u32,
  /// 车辆记录 CSV
  #[arg(long, value_name = "FILE")]
  pub log_path: Option<PathBuf>,
}

fn respond(response: &EntryResponse) -> Result<ExitCode> {
  println!("{}", serde_json::to_string(response)?);
  Ok(if response.is_error() {
    ExitCode::FAILURE
  } else {
    ExitCode::SUCCESS
  })
}

fn main() -> Result<ExitCode> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
    .with_writer(std::io::stderr)
    .init();

  let args = Args::parse();

  let mut config = match &args.config {
    Some(path) => load_config(path)?,
    None => {
      let mut config = PipelineConfig::default();
      config.sink.schema = LogSchema::Compact;
      config
    }
  };
  config.stabilizer = StabilizerConfig::single_shot();
  config.locator.min_neighbors = args.min_neighbors;
  if let Some(path) = &args.log_path {
    config.sink.log_path = path.clone();
  }

  let mut input = match InputWrapper::from_url(&args.input) {
    Ok(input) => input,
    Err(e) => {
      warn!("输入无法读取: {}", e);
      return respond(&EntryResponse::error(input_error_message(&e)));
    }
  };
  let Some(frame) = input.next() else {
    return respond(&EntryResponse::error("No image provided"));
  };

  let gate = config.build_gate(Box::new(chepai::gate::AutoConfirm))?;
  let outcome = gate.process_frame(&frame)?;
  info!("识别结果: {}", outcome.status);

  let response =
    EntryResponse::from_outcome(&outcome).unwrap_or_else(|| EntryResponse::error(PLATE_NOT_DETECTED));
  respond(&response)
}

/// 上传数据错误沿用对外的英文提示，其余错误给出原始描述
fn input_error_message(error: &chepai::input::InputError) -> String {
  match error {
    #[cfg(feature = "upload_input")]
    chepai::input::InputError::UploadError(e) => e.to_string(),
    other => other.to_string(),
  }
}
