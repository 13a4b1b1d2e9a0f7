// 该文件是 Fukidashi （对白框） 项目的一部分。
// src/store.rs - 模型仓库
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

use std::collections::HashMap;

use tracing::{info, warn};

use crate::{
  PipelineError,
  cache::{ModelCache, ModelPayload, new_token},
  fragment::{ModelBuffer, ReconstructionError, Reconstructor},
  source::ModelSource,
};

/// 组合模型来源、本地缓存与重建器
///
/// 重建结果按 `name@version` 记忆，首次使用时加载，`invalidate` 后重新加载。
pub struct ModelStore {
  source: Box<dyn ModelSource>,
  cache: Box<dyn ModelCache>,
  reconstructor: Reconstructor,
  loaded: HashMap<String, ModelBuffer>,
}

fn memo_key(name: &str, version: &str) -> String {
  format!("{}@{}", name, version)
}

impl ModelStore {
  pub fn new(
    source: Box<dyn ModelSource>,
    cache: Box<dyn ModelCache>,
    reconstructor: Reconstructor,
  ) -> Self {
    ModelStore {
      source,
      cache,
      reconstructor,
      loaded: HashMap::new(),
    }
  }

  pub fn cache(&self) -> &dyn ModelCache {
    self.cache.as_ref()
  }

  /// 取得可用于创建会话的模型权重
  pub fn load(&mut self, name: &str) -> Result<ModelBuffer, PipelineError> {
    let (version, expected_sha256, payload) = match self.source.metadata(name) {
      Ok(metadata) => {
        let key = memo_key(name, &metadata.version);
        if let Some(buffer) = self.loaded.get(&key) {
          return Ok(buffer.clone());
        }
        let payload = self.cached_or_fetch(name, &metadata.version)?;
        (metadata.version, Some(metadata.sha256), payload)
      }
      Err(e) => {
        // 来源不可用时退回到缓存中的任意版本
        let Some(cached) = self.cache.get(name)? else {
          return Err(e.into());
        };
        warn!("模型来源不可用 ({}), 使用缓存版本 {}", e, cached.entry.version);
        let key = memo_key(name, &cached.entry.version);
        if let Some(buffer) = self.loaded.get(&key) {
          return Ok(buffer.clone());
        }
        (cached.entry.version, None, cached.payload)
      }
    };

    let expected = expected_sha256.as_deref().filter(|s| !s.is_empty());
    let buffer = match payload {
      ModelPayload::Full(buffer) => {
        if let Some(expected) = expected {
          let actual = buffer.sha256_hex();
          if !actual.eq_ignore_ascii_case(expected) {
            return Err(
              ReconstructionError::Checksum {
                expected: expected.to_string(),
                actual,
              }
              .into(),
            );
          }
        }
        buffer
      }
      ModelPayload::Fragmented { set, .. } => self.reconstructor.reconstruct_verified(set, expected)?,
    };

    info!("模型 {} 版本 {} 就绪, {} 字节", name, version, buffer.len());
    self.loaded.insert(memo_key(name, &version), buffer.clone());
    Ok(buffer)
  }

  fn cached_or_fetch(&self, name: &str, version: &str) -> Result<ModelPayload, PipelineError> {
    let entry = self.cache.check(name)?.filter(|e| e.version == version);
    if let Some(entry) = entry {
      if let Some(cached) = self.cache.get(name)? {
        if !entry.is_fresh() {
          self.cache.renew(name, &new_token())?;
        }
        info!("使用缓存模型 {} 版本 {}", name, version);
        return Ok(cached.payload);
      }
    }

    info!("下载模型 {} 版本 {}", name, version);
    let (_, payload) = self.source.fetch(name)?;
    self.cache.put(name, payload.clone(), version, &new_token())?;
    Ok(payload)
  }

  /// 丢弃某个模型的所有记忆版本
  pub fn invalidate(&mut self, name: &str) {
    let prefix = format!("{}@", name);
    self.loaded.retain(|key, _| !key.starts_with(&prefix));
  }

  pub fn is_loaded(&self, name: &str, version: &str) -> bool {
    self.loaded.contains_key(&memo_key(name, version))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    cache::MemoryModelCache,
    source::{DirectoryModelSource, SourceError},
  };
  use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
  };

  /// 统计下载次数的来源
  struct Counting {
    inner: DirectoryModelSource,
    fetches: Arc<AtomicUsize>,
  }

  impl ModelSource for Counting {
    fn metadata(&self, name: &str) -> Result<crate::fragment::ModelMetadata, SourceError> {
      self.inner.metadata(name)
    }

    fn fragment(&self, name: &str, fragment_name: &str) -> Result<Vec<u8>, SourceError> {
      self.fetches.fetch_add(1, Ordering::SeqCst);
      self.inner.fragment(name, fragment_name)
    }

    fn key(&self, name: &str) -> Result<Vec<u8>, SourceError> {
      self.inner.key(name)
    }

    fn full_model(&self, name: &str) -> Result<Vec<u8>, SourceError> {
      self.inner.full_model(name)
    }
  }

  #[test]
  fn models_are_memoized_and_cached() {
    let dir = tempfile::tempdir().expect("临时目录");
    let publisher = DirectoryModelSource::new(dir.path());
    let model = vec![42u8; 333];
    publisher.publish("inpaint", &model, "inpaint.onnx").expect("发布");

    let fetches = Arc::new(AtomicUsize::new(0));
    let mut store = ModelStore::new(
      Box::new(Counting {
        inner: DirectoryModelSource::new(dir.path()),
        fetches: fetches.clone(),
      }),
      Box::new(MemoryModelCache::new()),
      Reconstructor::default(),
    );

    let first = store.load("inpaint").expect("加载");
    assert_eq!(first.as_bytes(), model.as_slice());
    assert!(store.is_loaded("inpaint", "1.0.0"));
    assert_eq!(fetches.load(Ordering::SeqCst), 4);

    store.load("inpaint").expect("加载");
    assert_eq!(fetches.load(Ordering::SeqCst), 4);

    // 清除记忆后从缓存重建，不再下载
    store.invalidate("inpaint");
    assert!(!store.is_loaded("inpaint", "1.0.0"));
    store.load("inpaint").expect("加载");
    assert_eq!(fetches.load(Ordering::SeqCst), 4);

    // 新版本发布后重新下载
    publisher.publish("inpaint", &model, "inpaint.onnx").expect("发布");
    store.load("inpaint").expect("加载");
    assert_eq!(fetches.load(Ordering::SeqCst), 8);
    assert!(store.is_loaded("inpaint", "1.0.1"));
  }
}
