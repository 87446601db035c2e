// 该文件是 Chepai （车牌闸口） 项目的一部分。
// src/main.rs - 闸口主程序
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

mod args;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use chepai::{
  FromUrl,
  config::{PipelineConfig, load_config, save_config},
  gate::{AutoConfirm, Confirm, StdinConfirm},
  input::InputWrapper,
  output::{OutputSet, OutputWrapper},
  task::{ContinuousTask, Task},
};

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let args = args::Args::parse();

  let mut config = match &args.config {
    Some(path) => load_config(path)?,
    None => PipelineConfig::default(),
  };
  args.apply(&mut config);
  config.validate()?;
  if let Some(path) = &args.dump_config {
    save_config(&config, path)?;
    info!("配置已写入: {}", path.display());
  }

  info!("输入来源: {}", args.input);
  info!("级联模型: {}", config.locator.cascade.display());
  info!("车辆记录: {}", config.sink.log_path.display());

  let confirm: Box<dyn Confirm> = if args.confirm {
    Box::new(StdinConfirm)
  } else {
    Box::new(AutoConfirm)
  };
  let gate = config.build_gate(confirm)?;
  let input = InputWrapper::from_url(&args.input)?;
  let output = args
    .output
    .iter()
    .map(OutputWrapper::from_url)
    .collect::<Result<OutputSet, _>>()?;

  ContinuousTask::default()
    .with_frame_number(args.frame_number)
    .with_interrupt_handler()
    .run_task(input, gate, output)?;

  Ok(())
}
