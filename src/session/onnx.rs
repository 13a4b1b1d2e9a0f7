// 该文件是 Fukidashi （对白框） 项目的一部分。
// src/session/onnx.rs - ONNX Runtime 推理会话
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

use ort::{
  execution_providers::CPUExecutionProvider,
  session::{Session, builder::GraphOptimizationLevel},
  value::{DynValue, Tensor as OrtTensor},
};
use tracing::{debug, info};

use super::{InferenceSession, SessionError, SessionFactory};
use crate::{
  fragment::ModelBuffer,
  tensor::{NamedTensors, Tensor, TensorData},
};

fn runtime_error(e: impl std::fmt::Display) -> SessionError {
  SessionError::Runtime(e.to_string())
}

/// 在 CPU 上运行的 ONNX 会话工厂
#[derive(Debug, Clone)]
pub struct OnnxSessionFactory {
  intra_threads: usize,
}

impl Default for OnnxSessionFactory {
  fn default() -> Self {
    OnnxSessionFactory { intra_threads: 1 }
  }
}

impl OnnxSessionFactory {
  pub fn intra_threads(mut self, threads: usize) -> Self {
    self.intra_threads = threads.max(1);
    self
  }
}

impl SessionFactory for OnnxSessionFactory {
  fn create(&self, model: &ModelBuffer) -> Result<Box<dyn InferenceSession>, SessionError> {
    Ok(Box::new(OnnxSession::from_memory(model, self.intra_threads)?))
  }
}

pub struct OnnxSession {
  session: Session,
  input_names: Vec<String>,
  output_names: Vec<String>,
}

impl OnnxSession {
  pub fn from_memory(model: &ModelBuffer, intra_threads: usize) -> Result<Self, SessionError> {
    info!(
      "创建 ONNX 推理会话, 模型大小: {:.2} MB",
      model.len() as f64 / (1024.0 * 1024.0)
    );
    let session = Session::builder()
      .map_err(runtime_error)?
      .with_execution_providers([CPUExecutionProvider::default().build()])
      .map_err(runtime_error)?
      .with_optimization_level(GraphOptimizationLevel::Level3)
      .map_err(runtime_error)?
      .with_intra_threads(intra_threads)
      .map_err(runtime_error)?
      .commit_from_memory(model.as_bytes())
      .map_err(runtime_error)?;

    let input_names: Vec<String> = session.inputs.iter().map(|i| i.name.clone()).collect();
    let output_names: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();
    debug!("模型输入: {:?}, 模型输出: {:?}", input_names, output_names);

    Ok(OnnxSession {
      session,
      input_names,
      output_names,
    })
  }
}

fn to_ort_value(tensor: Tensor) -> Result<DynValue, SessionError> {
  let Tensor { data, dims } = tensor;
  let value = match data {
    TensorData::U8(data) => OrtTensor::from_array((dims, data))
      .map_err(runtime_error)?
      .into_dyn(),
    TensorData::F32(data) => OrtTensor::from_array((dims, data))
      .map_err(runtime_error)?
      .into_dyn(),
  };
  Ok(value)
}

impl InferenceSession for OnnxSession {
  fn input_names(&self) -> &[String] {
    &self.input_names
  }

  fn output_names(&self) -> &[String] {
    &self.output_names
  }

  fn run(&mut self, inputs: NamedTensors) -> Result<NamedTensors, SessionError> {
    let mut values: Vec<(String, DynValue)> = Vec::with_capacity(inputs.len());
    for (name, tensor) in inputs {
      if !self.input_names.contains(&name) {
        return Err(SessionError::MissingInput(name));
      }
      values.push((name, to_ort_value(tensor)?));
    }

    let outputs = self.session.run(values).map_err(runtime_error)?;

    let mut result = NamedTensors::new();
    for name in &self.output_names {
      let value = outputs
        .get(name.as_str())
        .ok_or_else(|| SessionError::MissingOutput(name.clone()))?;

      let tensor = if let Ok((shape, data)) = value.try_extract_tensor::<f32>() {
        Tensor::f32(data.to_vec(), shape.iter().copied().collect())
      } else if let Ok((shape, data)) = value.try_extract_tensor::<u8>() {
        Tensor::u8(data.to_vec(), shape.iter().copied().collect())
      } else {
        return Err(SessionError::UnsupportedType(name.clone()));
      };
      result.insert(name.clone(), tensor);
    }
    Ok(result)
  }
}
