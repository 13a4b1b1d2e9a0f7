// 该文件是 Fukidashi （对白框） 项目的一部分。
// src/session.rs - 推理会话
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

use thiserror::Error;

use crate::{
  fragment::ModelBuffer,
  tensor::{NamedTensors, Tensor},
};

#[cfg(feature = "onnx")]
mod onnx;
#[cfg(feature = "onnx")]
pub use self::onnx::{OnnxSession, OnnxSessionFactory};

#[derive(Error, Debug, Clone)]
pub enum SessionError {
  #[error("推理运行时错误: {0}")]
  Runtime(String),
  #[error("缺少输入张量: {0}")]
  MissingInput(String),
  #[error("缺少输出张量: {0}")]
  MissingOutput(String),
  #[error("张量形状不匹配: {0}")]
  Shape(String),
  #[error("不支持的张量类型: {0}")]
  UnsupportedType(String),
}

/// 已加载模型的推理会话
///
/// `run` 需要可变借用，同一会话上的调用天然串行。
pub trait InferenceSession: Send {
  fn input_names(&self) -> &[String];
  fn output_names(&self) -> &[String];
  fn run(&mut self, inputs: NamedTensors) -> Result<NamedTensors, SessionError>;
}

impl InferenceSession for Box<dyn InferenceSession> {
  fn input_names(&self) -> &[String] {
    (**self).input_names()
  }

  fn output_names(&self) -> &[String] {
    (**self).output_names()
  }

  fn run(&mut self, inputs: NamedTensors) -> Result<NamedTensors, SessionError> {
    (**self).run(inputs)
  }
}

/// 从模型权重创建会话，每个工作线程各自调用一次
pub trait SessionFactory: Send + Sync {
  fn create(&self, model: &ModelBuffer) -> Result<Box<dyn InferenceSession>, SessionError>;
}

impl<F> SessionFactory for F
where
  F: Fn(&ModelBuffer) -> Result<Box<dyn InferenceSession>, SessionError> + Send + Sync,
{
  fn create(&self, model: &ModelBuffer) -> Result<Box<dyn InferenceSession>, SessionError> {
    self(model)
  }
}

/// 按会话输入顺序为张量命名
pub fn positional_inputs(
  session: &dyn InferenceSession,
  tensors: Vec<Tensor>,
) -> Result<NamedTensors, SessionError> {
  let names = session.input_names();
  if tensors.len() > names.len() {
    return Err(SessionError::MissingInput(format!(
      "模型只有 {} 个输入, 提供了 {} 个张量",
      names.len(),
      tensors.len()
    )));
  }
  Ok(names.iter().cloned().zip(tensors).collect())
}

/// 取第 `index` 个输出
pub fn output_at(outputs: &NamedTensors, index: usize) -> Result<&Tensor, SessionError> {
  outputs
    .get_index(index)
    .ok_or_else(|| SessionError::MissingOutput(format!("输出索引 {}", index)))
}
