// 该文件是 Fukidashi （对白框） 项目的一部分。
// src/worker/orchestrator.rs - 多工作线程批处理调度
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
  collections::BTreeSet,
  sync::{
    Arc,
    mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError},
  },
  thread,
  time::Duration,
};

use tracing::{debug, error, info, warn};

use super::{DEFAULT_WORKER_TIMEOUT, InferenceError};
use crate::{
  fragment::ModelBuffer,
  session::{InferenceSession, SessionError, SessionFactory},
};

/// 批中的一项，`index` 是它在整个输入中的位置
#[derive(Debug, Clone)]
pub struct WorkItem<T> {
  pub index: usize,
  pub name: String,
  pub payload: T,
}

/// 分配给一个工作线程的批
#[derive(Debug, Clone)]
pub struct Batch<T> {
  pub worker_id: String,
  pub model: ModelBuffer,
  /// 本批第一项在整个输入中的偏移，用于计算进度
  pub start_index: usize,
  pub items: Vec<WorkItem<T>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchProgress {
  pub filename: String,
  pub completed: usize,
  pub total: usize,
  pub worker_id: String,
}

impl BatchProgress {
  pub fn percentage(&self) -> f32 {
    if self.total == 0 {
      100.0
    } else {
      self.completed as f32 * 100.0 / self.total as f32
    }
  }
}

#[derive(Debug)]
pub enum BatchMessage<R> {
  Initialized { worker_id: String },
  Progress(BatchProgress),
  Results { worker_id: String, results: Vec<(usize, R)> },
  Error { worker_id: String, message: String },
}

enum Control {
  Shutdown,
}

/// 把若干批分发到各自的工作线程，并按输入顺序汇总结果
pub struct Orchestrator {
  factory: Arc<dyn SessionFactory>,
  timeout: Duration,
}

impl Orchestrator {
  pub fn new(factory: Arc<dyn SessionFactory>) -> Self {
    Orchestrator {
      factory,
      timeout: DEFAULT_WORKER_TIMEOUT,
    }
  }

  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  /// 运行所有批
  ///
  /// 任一工作线程报错即停止全部工作线程并返回该错误，不会重试。
  /// 成功时结果按 `WorkItem::index` 排序。
  pub fn dispatch<T, R, J, P>(
    &self,
    batches: Vec<Batch<T>>,
    total: usize,
    job: J,
    mut on_progress: P,
  ) -> Result<Vec<(usize, R)>, InferenceError>
  where
    T: Send + 'static,
    R: Send + 'static,
    J: Fn(&mut dyn InferenceSession, T) -> Result<R, SessionError> + Send + Sync + 'static,
    P: FnMut(&BatchProgress),
  {
    let job = Arc::new(job);
    let (event_tx, event_rx) = mpsc::channel::<BatchMessage<R>>();
    let mut controls: Vec<Sender<Control>> = Vec::with_capacity(batches.len());
    let mut pending: BTreeSet<String> = BTreeSet::new();

    for batch in batches {
      let (control_tx, control_rx) = mpsc::channel();
      let worker_id = batch.worker_id.clone();
      let factory = self.factory.clone();
      let events = event_tx.clone();
      let job = job.clone();

      info!("启动工作线程 {}, 共 {} 项", worker_id, batch.items.len());
      let spawned = thread::Builder::new()
        .name(worker_id.clone())
        .spawn(move || run_batch(batch, total, factory, job, control_rx, events));
      if let Err(e) = spawned {
        teardown(&controls);
        return Err(InferenceError::Spawn(e.to_string()));
      }
      controls.push(control_tx);
      pending.insert(worker_id);
    }
    drop(event_tx);

    let mut collected = Vec::with_capacity(total);
    while !pending.is_empty() {
      match event_rx.recv_timeout(self.timeout) {
        Ok(BatchMessage::Initialized { worker_id }) => {
          debug!("工作线程 {} 初始化完成", worker_id);
        }
        Ok(BatchMessage::Progress(progress)) => on_progress(&progress),
        Ok(BatchMessage::Results { worker_id, results }) => {
          info!("工作线程 {} 完成, 结果 {} 项", worker_id, results.len());
          pending.remove(&worker_id);
          collected.extend(results);
        }
        Ok(BatchMessage::Error { worker_id, message }) => {
          error!("工作线程 {} 失败: {}", worker_id, message);
          teardown(&controls);
          return Err(InferenceError::Worker {
            worker: worker_id,
            message,
          });
        }
        Err(RecvTimeoutError::Timeout) => {
          teardown(&controls);
          let worker = pending.into_iter().next().unwrap_or_default();
          error!("工作线程 {} 超时", worker);
          return Err(InferenceError::Timeout {
            worker,
            seconds: self.timeout.as_secs(),
          });
        }
        Err(RecvTimeoutError::Disconnected) => {
          let worker = pending.into_iter().next().unwrap_or_default();
          return Err(InferenceError::WorkerLost(worker));
        }
      }
    }

    collected.sort_by_key(|(index, _)| *index);
    Ok(collected)
  }
}

fn teardown(controls: &[Sender<Control>]) {
  warn!("停止全部 {} 个工作线程", controls.len());
  for control in controls {
    let _ = control.send(Control::Shutdown);
  }
}

fn run_batch<T, R, J>(
  batch: Batch<T>,
  total: usize,
  factory: Arc<dyn SessionFactory>,
  job: Arc<J>,
  control: Receiver<Control>,
  events: Sender<BatchMessage<R>>,
) where
  J: Fn(&mut dyn InferenceSession, T) -> Result<R, SessionError>,
{
  let Batch {
    worker_id,
    model,
    start_index,
    items,
  } = batch;

  let mut session = match factory.create(&model) {
    Ok(session) => session,
    Err(e) => {
      let _ = events.send(BatchMessage::Error {
        worker_id,
        message: e.to_string(),
      });
      return;
    }
  };
  drop(model);
  let _ = events.send(BatchMessage::Initialized {
    worker_id: worker_id.clone(),
  });

  let mut results = Vec::with_capacity(items.len());
  for (i, item) in items.into_iter().enumerate() {
    match control.try_recv() {
      Ok(Control::Shutdown) | Err(TryRecvError::Disconnected) => {
        debug!("工作线程 {} 收到停止指令", worker_id);
        return;
      }
      Err(TryRecvError::Empty) => {}
    }

    match job(session.as_mut(), item.payload) {
      Ok(result) => results.push((item.index, result)),
      Err(e) => {
        let _ = events.send(BatchMessage::Error {
          worker_id,
          message: format!("{}: {}", item.name, e),
        });
        return;
      }
    }

    let progress = BatchProgress {
      filename: item.name,
      completed: start_index + i + 1,
      total,
      worker_id: worker_id.clone(),
    };
    if events.send(BatchMessage::Progress(progress)).is_err() {
      return;
    }
  }

  let _ = events.send(BatchMessage::Results { worker_id, results });
}

/// 把 `items` 在 `ceil(n / 2)` 处切成两半
pub fn split_halves<T>(mut items: Vec<T>) -> (Vec<T>, Vec<T>) {
  let mid = items.len().div_ceil(2);
  let second = items.split_off(mid);
  (items, second)
}
