// 该文件是 Fukidashi （对白框） 项目的一部分。
// src/tensor.rs - 命名张量
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

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
  UInt8,
  Float32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
  U8(Vec<u8>),
  F32(Vec<f32>),
}

/// 在工作线程之间传递的张量，发送后所有权随之转移
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
  pub data: TensorData,
  pub dims: Vec<i64>,
}

impl Tensor {
  pub fn u8(data: Vec<u8>, dims: Vec<i64>) -> Self {
    Tensor {
      data: TensorData::U8(data),
      dims,
    }
  }

  pub fn f32(data: Vec<f32>, dims: Vec<i64>) -> Self {
    Tensor {
      data: TensorData::F32(data),
      dims,
    }
  }

  pub fn dtype(&self) -> DataType {
    match self.data {
      TensorData::U8(_) => DataType::UInt8,
      TensorData::F32(_) => DataType::Float32,
    }
  }

  pub fn len(&self) -> usize {
    match &self.data {
      TensorData::U8(data) => data.len(),
      TensorData::F32(data) => data.len(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// 按维度计算的元素个数，负数维度视为 0
  pub fn element_count(&self) -> usize {
    self.dims.iter().map(|&d| d.max(0) as usize).product()
  }

  pub fn as_f32(&self) -> Option<&[f32]> {
    match &self.data {
      TensorData::F32(data) => Some(data),
      TensorData::U8(_) => None,
    }
  }

  pub fn as_u8(&self) -> Option<&[u8]> {
    match &self.data {
      TensorData::U8(data) => Some(data),
      TensorData::F32(_) => None,
    }
  }
}

/// 有序的命名张量集合，输出顺序对后处理有意义
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NamedTensors {
  entries: Vec<(String, Tensor)>,
}

impl NamedTensors {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with(mut self, name: impl Into<String>, tensor: Tensor) -> Self {
    self.insert(name, tensor);
    self
  }

  /// 同名张量会被替换并保持原位置
  pub fn insert(&mut self, name: impl Into<String>, tensor: Tensor) {
    let name = name.into();
    match self.entries.iter_mut().find(|(n, _)| *n == name) {
      Some(entry) => entry.1 = tensor,
      None => self.entries.push((name, tensor)),
    }
  }

  pub fn get(&self, name: &str) -> Option<&Tensor> {
    self
      .entries
      .iter()
      .find(|(n, _)| n == name)
      .map(|(_, t)| t)
  }

  pub fn get_index(&self, index: usize) -> Option<&Tensor> {
    self.entries.get(index).map(|(_, t)| t)
  }

  pub fn names(&self) -> Vec<String> {
    self.entries.iter().map(|(n, _)| n.clone()).collect()
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &Tensor)> {
    self.entries.iter().map(|(n, t)| (n.as_str(), t))
  }
}

impl IntoIterator for NamedTensors {
  type Item = (String, Tensor);
  type IntoIter = std::vec::IntoIter<(String, Tensor)>;

  fn into_iter(self) -> Self::IntoIter {
    self.entries.into_iter()
  }
}

impl FromIterator<(String, Tensor)> for NamedTensors {
  fn from_iter<T: IntoIterator<Item = (String, Tensor)>>(iter: T) -> Self {
    let mut tensors = NamedTensors::new();
    for (name, tensor) in iter {
      tensors.insert(name, tensor);
    }
    tensors
  }
}
