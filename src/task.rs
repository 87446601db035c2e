// 该文件是 Chepai （车牌闸口） 项目的一部分。
// src/task.rs - 处理任务
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

use std::sync::mpsc::Receiver;
use std::{thread, time::Duration};
use tracing::{debug, error, info, warn};

use crate::{model::Model, output::Render};

pub trait Task<I, M, O>: Sized {
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error>;
}

/// 只处理第一帧，任何错误都返回给调用方
pub struct OneShotTask;

impl<
  F,
  D,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = F>,
  M: Model<Input = F, Output = D, Error = ME>,
  O: Render<F, D, Error = RE>,
> Task<I, M, O> for OneShotTask
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    let now = std::time::Instant::now();
    let result = model.infer(&frame)?;
    info!("识别完成，耗时: {:.2?}", now.elapsed());
    output.render_result(&frame, &result)?;

    Ok(())
  }
}

/// 逐帧处理直到输入结束、达到帧数上限或收到中断信号
///
/// 单帧的识别或输出失败只记录日志，不会终止循环。
#[derive(Default, Debug)]
pub struct ContinuousTask {
  frame_number: Option<usize>,
  install_handler: bool,
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }

  /// 注册 Ctrl-C 处理：第一次信号置退出标志，30 秒后仍未退出则强制结束进程
  pub fn with_interrupt_handler(mut self) -> Self {
    self.install_handler = true;
    self
  }

  fn interrupt_channel(&self) -> Result<Option<Receiver<()>>, ctrlc::Error> {
    if !self.install_handler {
      return Ok(None);
    }
    let (tx, rx) = std::sync::mpsc::channel();
    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      let _ = tx.send(());
      thread::spawn(|| {
        thread::sleep(Duration::from_secs(30));
        warn!("强制退出程序");
        std::process::exit(1);
      });
    })?;
    Ok(Some(rx))
  }
}

impl<
  F,
  D,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = F>,
  M: Model<Input = F, Output = D, Error = ME>,
  O: Render<F, D, Error = RE>,
> Task<I, M, O> for ContinuousTask
{
  type Error = anyhow::Error;

  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let interrupt = self.interrupt_channel()?;

    let mut frame_count = 0usize;
    let mut failures = 0usize;
    for frame in input {
      frame_count += 1;
      let now = std::time::Instant::now();
      match model.infer(&frame) {
        Ok(result) => {
          let elapsed = now.elapsed();
          if let Err(e) = output.render_result(&frame, &result) {
            warn!("第 {} 帧输出失败: {}", frame_count, e);
          }
          debug!(
            "第 {} 帧处理完成，耗时: {:.2?} / {:.2?}",
            frame_count,
            elapsed,
            now.elapsed()
          );
        }
        Err(e) => {
          failures += 1;
          error!("第 {} 帧处理失败: {}", frame_count, e);
        }
      }

      if self.frame_number.is_some_and(|n| frame_count >= n) {
        info!("达到指定帧数 {}, 退出任务循环", frame_count);
        break;
      }
      if interrupt.as_ref().is_some_and(|rx| rx.try_recv().is_ok()) {
        warn!("中断信号接收，退出任务循环");
        break;
      }
    }

    info!("任务完成，共处理 {} 帧，失败 {} 帧", frame_count, failures);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use std::cell::RefCell;

  use thiserror::Error;

  use super::*;

  #[derive(Error, Debug)]
  #[error("奇数帧")]
  struct OddFrame;

  /// 偶数通过，奇数报错
  struct Parity;

  impl Model for Parity {
    type Input = u32;
    type Output = u32;
    type Error = OddFrame;

    fn infer(&self, input: &u32) -> Result<u32, OddFrame> {
      if input % 2 == 0 { Ok(*input) } else { Err(OddFrame) }
    }
  }

  #[derive(Default)]
  struct Collect(RefCell<Vec<u32>>);

  impl Render<u32, u32> for &Collect {
    type Error = OddFrame;

    fn render_result(&self, _frame: &u32, result: &u32) -> Result<(), OddFrame> {
      self.0.borrow_mut().push(*result);
      Ok(())
    }
  }

  #[test]
  fn continuous_task_survives_frame_errors() {
    let sink = Collect::default();
    ContinuousTask::default()
      .run_task(0..6u32, Parity, &sink)
      .unwrap();
    assert_eq!(*sink.0.borrow(), vec![0, 2, 4]);
  }

  #[test]
  fn continuous_task_stops_at_frame_limit() {
    let sink = Collect::default();
    ContinuousTask::default()
      .with_frame_number(Some(3))
      .run_task(0..100u32, Parity, &sink)
      .unwrap();
    assert_eq!(*sink.0.borrow(), vec![0, 2]);
  }

  #[test]
  fn one_shot_task_propagates_errors() {
    let sink = Collect::default();
    assert!(OneShotTask.run_task(1..2u32, Parity, &sink).is_err());
    assert!(OneShotTask.run_task(std::iter::empty(), Parity, &sink).is_err());
    OneShotTask.run_task(4..5u32, Parity, &sink).unwrap();
    assert_eq!(*sink.0.borrow(), vec![4]);
  }
}
