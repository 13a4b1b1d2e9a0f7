// 该文件是 Fukidashi （对白框） 项目的一部分。
// src/error.rs - 错误定义
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
  cache::CacheError, fragment::ReconstructionError, session::SessionError, source::SourceError,
  worker::InferenceError,
};

/// 输入校验错误，在任何原生调用或工作线程调用之前同步返回
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
  #[error("分片列表为空")]
  EmptyFragments,
  #[error("第 {0} 个分片长度为 0")]
  EmptyFragment(usize),
  #[error("加密分片索引越界: {index}, 分片数量: {count}")]
  EncryptedIndexOutOfRange { index: usize, count: usize },
  #[error("密钥为空")]
  EmptyKey,
  #[error("不支持的密钥长度: {0}")]
  KeyLength(usize),
  #[error("模型数据过小: {len} 字节, 无法拆分为 {parts} 个分片")]
  ModelTooSmall { len: usize, parts: usize },
  #[error("待处理的图像列表为空")]
  EmptyBatch,
  #[error("缺少图像: {0}")]
  MissingImage(String),
  #[error("缺少文件名")]
  MissingFilename,
  #[error("图像尺寸无效: {width}x{height}")]
  InvalidImageSize { width: u32, height: u32 },
}

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("校验错误: {0}")]
  Validation(#[from] ValidationError),
  #[error("模型重建错误: {0}")]
  Reconstruction(#[from] ReconstructionError),
  #[error("推理错误: {0}")]
  Inference(#[from] InferenceError),
  #[error("推理会话错误: {0}")]
  Session(#[from] SessionError),
  #[error("模型缓存错误: {0}")]
  Cache(#[from] CacheError),
  #[error("模型来源错误: {0}")]
  Source(#[from] SourceError),
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  Image(#[from] image::ImageError),
  #[error("JSON 错误: {0}")]
  Json(#[from] serde_json::Error),
}
