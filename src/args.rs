// 该文件是 Chepai （车牌闸口） 项目的一部分。
// src/args.rs - 命令行参数
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

use chepai::config::PipelineConfig;
use clap::Parser;
use url::Url;

/// Chepai 车牌闸口
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// TOML 配置文件，缺省时使用默认配置
  #[arg(long, value_name = "FILE")]
  pub config: Option<PathBuf>,

  /// 输入来源
  /// - 图片: image:///path/to/car.jpg
  /// - 目录回放: folder:///path/to/frames
  /// - 上传请求体: upload:///path/to/body.json
  /// - 摄像头: v4l:///dev/video0
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,

  /// 输出，可重复
  /// - 标注帧目录: folder:///path/to/dir[?always|?emitted]
  /// - JSON 行: json:///-  或 json:///path/to/out.jsonl[?always]
  /// - 日志: log:
  #[arg(long, value_name = "OUTPUT", default_value = "log:")]
  pub output: Vec<Url>,

  /// 最大处理帧数
  #[arg(long, value_name = "FRAME_NUMBER")]
  pub frame_number: Option<usize>,

  /// 级联分类器 XML
  #[arg(long, value_name = "FILE")]
  pub cascade: Option<PathBuf>,

  /// 多数表决窗口大小
  #[arg(long, value_name = "N")]
  pub window: Option<usize>,

  #[arg(long, value_name = "N")]
  pub min_neighbors: Option<u32>,

  /// 车辆记录 CSV
  #[arg(long, value_name = "FILE")]
  pub log_path: Option<PathBuf>,

  /// 车位分配程序
  #[arg(long, value_name = "PROGRAM")]
  pub allocator: Option<PathBuf>,

  /// 不调用车位分配程序
  #[arg(long)]
  pub no_allocator: bool,

  /// 分配车位前在终端确认
  #[arg(long)]
  pub confirm: bool,

  /// 把最终生效的配置写到该文件
  #[arg(long, value_name = "FILE")]
  pub dump_config: Option<PathBuf>,
}

impl Args {
  /// 命令行覆盖配置文件
  pub fn apply(&self, config: &mut PipelineConfig) {
    if let Some(cascade) = &self.cascade {
      config.locator.cascade = cascade.clone();
    }
    if let Some(window) = self.window {
      config.stabilizer.window = window;
    }
    if let Some(n) = self.min_neighbors {
      config.locator.min_neighbors = n;
    }
    if let Some(path) = &self.log_path {
      config.sink.log_path = path.clone();
    }
    if let Some(program) = &self.allocator {
      config.allocator.program = program.clone();
    }
    if self.no_allocator {
      config.allocator.enabled = false;
    }
  }
}
