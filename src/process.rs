// 该文件是 Chepai （车牌闸口） 项目的一部分。
// src/process.rs - 带超时的外部进程调用
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

use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Error, Debug)]
pub enum ProcessError {
  #[error("无法启动进程 {program}: {source}")]
  Spawn {
    program: String,
    #[source]
    source: std::io::Error,
  },
  #[error("进程 {program} 超时 ({timeout:?})")]
  Timeout { program: String, timeout: Duration },
  #[error("IO 错误: {0}")]
  Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct CommandOutput {
  pub status: ExitStatus,
  pub stdout: String,
  pub stderr: String,
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<thread::JoinHandle<Vec<u8>>> {
  pipe.map(|mut pipe| {
    thread::spawn(move || {
      let mut buf = Vec::new();
      let _ = pipe.read_to_end(&mut buf);
      buf
    })
  })
}

fn collect(handle: Option<thread::JoinHandle<Vec<u8>>>) -> String {
  handle
    .and_then(|h| h.join().ok())
    .map(|buf| String::from_utf8_lossy(&buf).into_owned())
    .unwrap_or_default()
}

/// 结束并回收子进程，管道关闭后读写线程自行退出
fn kill_and_reap(child: &mut Child) {
  let _ = child.kill();
  let _ = child.wait();
}

/// 运行命令直到退出或超时，超时后杀掉子进程
///
/// `input` 不为空时写入子进程的标准输入。
pub fn run_with_timeout(
  mut command: Command,
  input: Option<Vec<u8>>,
  timeout: Duration,
) -> Result<CommandOutput, ProcessError> {
  let program = command.get_program().to_string_lossy().into_owned();
  command
    .stdin(if input.is_some() {
      Stdio::piped()
    } else {
      Stdio::null()
    })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped());

  debug!("启动进程: {:?}", command);
  let mut child = command.spawn().map_err(|source| ProcessError::Spawn {
    program: program.clone(),
    source,
  })?;

  let writer = match (input, child.stdin.take()) {
    (Some(bytes), Some(mut stdin)) => Some(thread::spawn(move || {
      // 子进程可能提前退出，写入失败不影响结果
      let _ = stdin.write_all(&bytes);
    })),
    _ => None,
  };
  let stdout = drain(child.stdout.take());
  let stderr = drain(child.stderr.take());

  let started = Instant::now();
  let status = loop {
    match child.try_wait() {
      Ok(Some(status)) => break status,
      Ok(None) if started.elapsed() >= timeout => {
        warn!("进程 {} 超过 {:?} 未退出，强制结束", program, timeout);
        kill_and_reap(&mut child);
        return Err(ProcessError::Timeout { program, timeout });
      }
      Ok(None) => thread::sleep(POLL_INTERVAL),
      Err(e) => {
        warn!("进程 {} 状态查询失败: {}", program, e);
        kill_and_reap(&mut child);
        return Err(e.into());
      }
    }
  };

  if let Some(writer) = writer {
    let _ = writer.join();
  }

  Ok(CommandOutput {
    status,
    stdout: collect(stdout),
    stderr: collect(stderr),
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  fn sh(script: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(script);
    cmd
  }

  #[test]
  fn captures_stdout_and_status() {
    let out = run_with_timeout(sh("echo hello; exit 3"), None, Duration::from_secs(5)).unwrap();
    assert_eq!(out.stdout.trim(), "hello");
    assert_eq!(out.status.code(), Some(3));
  }

  #[test]
  fn feeds_stdin() {
    let out = run_with_timeout(sh("cat"), Some(b"abc".to_vec()), Duration::from_secs(5)).unwrap();
    assert_eq!(out.stdout, "abc");
  }

  #[test]
  fn kills_on_timeout() {
    let started = Instant::now();
    let err = run_with_timeout(sh("sleep 5"), None, Duration::from_millis(200)).unwrap_err();
    assert!(matches!(err, ProcessError::Timeout { .. }));
    assert!(started.elapsed() < Duration::from_secs(4));
  }

  #[test]
  fn killed_child_is_reaped() {
    let mut child = Command::new("sleep").arg("5").spawn().unwrap();
    let started = Instant::now();
    kill_and_reap(&mut child);
    let status = child.try_wait().unwrap().expect("子进程应已回收");
    assert!(!status.success());
    assert!(started.elapsed() < Duration::from_secs(4));
  }

  #[test]
  fn missing_program_is_spawn_error() {
    let err = run_with_timeout(
      Command::new("/nonexistent/chepai-test-binary"),
      None,
      Duration::from_secs(1),
    )
    .unwrap_err();
    assert!(matches!(err, ProcessError::Spawn { .. }));
  }
}
