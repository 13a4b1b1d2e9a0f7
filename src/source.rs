// 该文件是 Fukidashi （对白框） 项目的一部分。
// src/source.rs - 模型来源
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
  collections::BTreeMap,
  fs,
  path::{Path, PathBuf},
};

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  cache::ModelPayload,
  fragment::{
    DEFAULT_ENCRYPTED_INDEX, DEFAULT_FRAGMENT_COUNT, ModelBuffer, ModelFragmentSet, ModelMetadata,
    ReconstructionError, SplitOutput, bump_version, generate_key, split_model,
  },
};

#[derive(Error, Debug)]
pub enum SourceError {
  #[error("模型来源 I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("模型元数据错误: {0}")]
  Json(#[from] serde_json::Error),
  #[error("未知模型: {0}")]
  UnknownModel(String),
  #[error("模型 {0} 没有加密分片")]
  MissingEncryptedFragment(String),
  #[error("文件 {file} 校验和不匹配: 期望 {expected}, 实际 {actual}")]
  Checksum {
    file: String,
    expected: String,
    actual: String,
  },
  #[error("模型拆分失败: {0}")]
  Split(#[from] ReconstructionError),
  #[error("模型来源必须使用 {0} 方案")]
  SchemeMismatch(&'static str),
}

/// 模型服务端的接口
pub trait ModelSource: Send + Sync {
  fn metadata(&self, name: &str) -> Result<ModelMetadata, SourceError>;
  fn fragment(&self, name: &str, fragment_name: &str) -> Result<Vec<u8>, SourceError>;
  fn key(&self, name: &str) -> Result<Vec<u8>, SourceError>;
  fn full_model(&self, name: &str) -> Result<Vec<u8>, SourceError>;

  /// 下载模型全部数据，逐个校验分片
  fn fetch(&self, name: &str) -> Result<(ModelMetadata, ModelPayload), SourceError> {
    let metadata = self.metadata(name)?;
    if !metadata.is_fragmented {
      let data = self.full_model(name)?;
      verify(&metadata.original_name, &metadata.sha256, &data)?;
      return Ok((metadata, ModelPayload::Full(ModelBuffer::new(data))));
    }

    let encrypted_index = metadata
      .encrypted_index()
      .ok_or_else(|| SourceError::MissingEncryptedFragment(name.to_string()))?;
    let mut fragments = Vec::with_capacity(metadata.fragments.len());
    for info in &metadata.fragments {
      let data = self.fragment(name, &info.filename)?;
      verify(&info.filename, &info.sha256, &data)?;
      fragments.push(data);
    }
    debug!("模型 {} 的 {} 个分片下载完成", name, fragments.len());

    let payload = ModelPayload::Fragmented {
      set: ModelFragmentSet {
        fragments,
        encrypted_index,
        key: self.key(name)?,
      },
      fragment_names: metadata.fragment_names(),
    };
    Ok((metadata, payload))
  }
}

fn verify(file: &str, expected: &str, data: &[u8]) -> Result<(), SourceError> {
  if expected.is_empty() {
    return Ok(());
  }
  let actual = hex::encode(Sha256::digest(data));
  if !actual.eq_ignore_ascii_case(expected) {
    return Err(SourceError::Checksum {
      file: file.to_string(),
      expected: expected.to_string(),
      actual,
    });
  }
  Ok(())
}

const METADATA_FILE: &str = "model_metadata.json";
const FRAGMENTED_DIR: &str = "fragmented_models";
const FULL_DIR: &str = "full_models";

/// 按模型服务端目录布局读取模型
///
/// ```text
/// <root>/model_metadata.json
/// <root>/fragmented_models/<name>/fragments/<fragment>
/// <root>/fragmented_models/<name>/key/<name>_key.bin
/// <root>/full_models/<original_name>
/// ```
pub struct DirectoryModelSource {
  root: PathBuf,
}

impl DirectoryModelSource {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    DirectoryModelSource { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  fn model_dir(&self, name: &str) -> PathBuf {
    self.root.join(FRAGMENTED_DIR).join(name)
  }

  fn key_path(&self, name: &str) -> PathBuf {
    self
      .model_dir(name)
      .join("key")
      .join(format!("{}_key.bin", name))
  }

  pub fn load_all_metadata(&self) -> Result<BTreeMap<String, ModelMetadata>, SourceError> {
    let path = self.root.join(METADATA_FILE);
    if !path.exists() {
      return Ok(BTreeMap::new());
    }
    Ok(serde_json::from_slice(&fs::read(path)?)?)
  }

  fn save_all_metadata(&self, all: &BTreeMap<String, ModelMetadata>) -> Result<(), SourceError> {
    fs::create_dir_all(&self.root)?;
    fs::write(
      self.root.join(METADATA_FILE),
      serde_json::to_vec_pretty(all)?,
    )?;
    Ok(())
  }

  /// 拆分并发布模型，已有同名模型时补丁版本号加一
  pub fn publish(&self, name: &str, model: &[u8], original_name: &str) -> Result<ModelMetadata, SourceError> {
    let key = generate_key();
    let SplitOutput { set, mut metadata } = split_model(
      model,
      DEFAULT_FRAGMENT_COUNT,
      DEFAULT_ENCRYPTED_INDEX,
      &key,
      original_name,
    )?;

    let mut all = self.load_all_metadata()?;
    if let Some(next) = all.get(name).and_then(|p| bump_version(&p.version)) {
      metadata.version = next;
    }

    let dir = self.model_dir(name);
    if dir.exists() {
      fs::remove_dir_all(&dir)?;
    }
    let fragments_dir = dir.join("fragments");
    fs::create_dir_all(&fragments_dir)?;
    for (info, data) in metadata.fragments.iter().zip(&set.fragments) {
      fs::write(fragments_dir.join(&info.filename), data)?;
    }
    let key_path = self.key_path(name);
    if let Some(parent) = key_path.parent() {
      fs::create_dir_all(parent)?;
    }
    fs::write(key_path, &set.key)?;

    let full_dir = self.root.join(FULL_DIR);
    fs::create_dir_all(&full_dir)?;
    fs::write(full_dir.join(original_name), model)?;

    info!("发布模型 {} 版本 {}", name, metadata.version);
    all.insert(name.to_string(), metadata.clone());
    self.save_all_metadata(&all)?;
    Ok(metadata)
  }
}

impl FromUrlWithScheme for DirectoryModelSource {
  const SCHEME: &'static str = "fragments";
}

impl FromUrl for DirectoryModelSource {
  type Error = SourceError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(SourceError::SchemeMismatch(Self::SCHEME));
    }
    Ok(DirectoryModelSource::new(url.path()))
  }
}

impl ModelSource for DirectoryModelSource {
  fn metadata(&self, name: &str) -> Result<ModelMetadata, SourceError> {
    self
      .load_all_metadata()?
      .remove(name)
      .ok_or_else(|| SourceError::UnknownModel(name.to_string()))
  }

  fn fragment(&self, name: &str, fragment_name: &str) -> Result<Vec<u8>, SourceError> {
    let path = self.model_dir(name).join("fragments").join(fragment_name);
    Ok(fs::read(path)?)
  }

  fn key(&self, name: &str) -> Result<Vec<u8>, SourceError> {
    Ok(fs::read(self.key_path(name))?)
  }

  fn full_model(&self, name: &str) -> Result<Vec<u8>, SourceError> {
    let metadata = self.metadata(name)?;
    Ok(fs::read(self.root.join(FULL_DIR).join(metadata.original_name))?)
  }
}
