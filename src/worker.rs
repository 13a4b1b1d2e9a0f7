// 该文件是 Fukidashi （对白框） 项目的一部分。
// src/worker.rs - 工作线程推理会话
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

use std::{
  sync::{
    Arc,
    mpsc::{self, Receiver, RecvTimeoutError, Sender},
  },
  thread,
  time::Duration,
};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  fragment::ModelBuffer,
  session::{InferenceSession, SessionError, SessionFactory},
  tensor::NamedTensors,
};

mod orchestrator;
pub use self::orchestrator::{
  Batch, BatchMessage, BatchProgress, Orchestrator, WorkItem, split_halves,
};

/// 默认的工作线程超时
pub const DEFAULT_WORKER_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InferenceError {
  #[error("工作线程 {worker} 报告错误: {message}")]
  Worker { worker: String, message: String },
  #[error("工作线程 {worker} 在 {seconds} 秒内没有响应")]
  Timeout { worker: String, seconds: u64 },
  #[error("工作线程 {0} 意外退出")]
  WorkerLost(String),
  #[error("无法创建工作线程: {0}")]
  Spawn(String),
}

enum WorkerCommand {
  Run(NamedTensors),
  Shutdown,
}

/// 工作线程发回的消息
#[derive(Debug)]
pub enum WorkerMessage {
  Initialized {
    input_names: Vec<String>,
    output_names: Vec<String>,
  },
  RunResult(NamedTensors),
  Error(String),
}

/// 在独立工作线程中持有的推理会话，只通过消息通信
///
/// 丢弃该值即销毁工作线程，正在进行的推理结果会被丢弃。
pub struct WorkerSession {
  name: String,
  commands: Sender<WorkerCommand>,
  events: Receiver<WorkerMessage>,
  input_names: Vec<String>,
  output_names: Vec<String>,
  timeout: Duration,
}

impl WorkerSession {
  /// 启动工作线程并等待会话初始化完成
  pub fn spawn(
    name: &str,
    factory: Arc<dyn SessionFactory>,
    model: ModelBuffer,
    timeout: Duration,
  ) -> Result<Self, InferenceError> {
    let (command_tx, command_rx) = mpsc::channel::<WorkerCommand>();
    let (event_tx, event_rx) = mpsc::channel::<WorkerMessage>();

    thread::Builder::new()
      .name(name.to_string())
      .spawn(move || worker_loop(factory, model, command_rx, event_tx))
      .map_err(|e| InferenceError::Spawn(e.to_string()))?;

    let mut worker = WorkerSession {
      name: name.to_string(),
      commands: command_tx,
      events: event_rx,
      input_names: Vec::new(),
      output_names: Vec::new(),
      timeout,
    };

    match worker.wait()? {
      WorkerMessage::Initialized {
        input_names,
        output_names,
      } => {
        info!("工作线程 {} 初始化完成", worker.name);
        worker.input_names = input_names;
        worker.output_names = output_names;
        Ok(worker)
      }
      WorkerMessage::Error(message) => Err(worker.fail(message)),
      WorkerMessage::RunResult(_) => Err(worker.fail("初始化前收到推理结果".to_string())),
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  fn wait(&self) -> Result<WorkerMessage, InferenceError> {
    match self.events.recv_timeout(self.timeout) {
      Ok(message) => Ok(message),
      Err(RecvTimeoutError::Timeout) => {
        error!("工作线程 {} 超时", self.name);
        Err(InferenceError::Timeout {
          worker: self.name.clone(),
          seconds: self.timeout.as_secs(),
        })
      }
      Err(RecvTimeoutError::Disconnected) => Err(InferenceError::WorkerLost(self.name.clone())),
    }
  }

  fn fail(&self, message: String) -> InferenceError {
    error!("工作线程 {} 报告错误: {}", self.name, message);
    let _ = self.commands.send(WorkerCommand::Shutdown);
    InferenceError::Worker {
      worker: self.name.clone(),
      message,
    }
  }

  /// 发送一次推理请求并等待结果，输入张量的所有权转移给工作线程
  pub fn infer(&mut self, inputs: NamedTensors) -> Result<NamedTensors, InferenceError> {
    self
      .commands
      .send(WorkerCommand::Run(inputs))
      .map_err(|_| InferenceError::WorkerLost(self.name.clone()))?;

    match self.wait()? {
      WorkerMessage::RunResult(outputs) => Ok(outputs),
      WorkerMessage::Error(message) => Err(self.fail(message)),
      WorkerMessage::Initialized { .. } => Err(self.fail("重复的初始化消息".to_string())),
    }
  }
}

impl InferenceSession for WorkerSession {
  fn input_names(&self) -> &[String] {
    &self.input_names
  }

  fn output_names(&self) -> &[String] {
    &self.output_names
  }

  fn run(&mut self, inputs: NamedTensors) -> Result<NamedTensors, SessionError> {
    self
      .infer(inputs)
      .map_err(|e| SessionError::Runtime(e.to_string()))
  }
}

impl Drop for WorkerSession {
  fn drop(&mut self) {
    debug!("销毁工作线程 {}", self.name);
    let _ = self.commands.send(WorkerCommand::Shutdown);
  }
}

fn worker_loop(
  factory: Arc<dyn SessionFactory>,
  model: ModelBuffer,
  commands: Receiver<WorkerCommand>,
  events: Sender<WorkerMessage>,
) {
  let mut session = match factory.create(&model) {
    Ok(session) => session,
    Err(e) => {
      let _ = events.send(WorkerMessage::Error(e.to_string()));
      return;
    }
  };
  drop(model);

  let initialized = WorkerMessage::Initialized {
    input_names: session.input_names().to_vec(),
    output_names: session.output_names().to_vec(),
  };
  if events.send(initialized).is_err() {
    return;
  }

  while let Ok(command) = commands.recv() {
    match command {
      WorkerCommand::Run(inputs) => {
        let message = match session.run(inputs) {
          Ok(outputs) => WorkerMessage::RunResult(outputs),
          Err(e) => WorkerMessage::Error(e.to_string()),
        };
        let failed = matches!(message, WorkerMessage::Error(_));
        if events.send(message).is_err() || failed {
          break;
        }
      }
      WorkerCommand::Shutdown => break,
    }
  }
  warn!("工作线程退出");
}
