// 该文件是 Fukidashi （对白框） 项目的一部分。
// src/cache.rs - 本地模型缓存
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
  collections::HashMap,
  fs,
  path::{Path, PathBuf},
  sync::Mutex,
};

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  fragment::{ModelBuffer, ModelFragmentSet},
};

#[derive(Error, Debug)]
pub enum CacheError {
  #[error("缓存 I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("缓存索引错误: {0}")]
  Json(#[from] serde_json::Error),
  #[error("无效的模型名: {0:?}")]
  InvalidName(String),
  #[error("{0} 不能为空")]
  Empty(&'static str),
  #[error("缓存中没有模型 {0}")]
  NotFound(String),
  #[error("缓存锁已损坏")]
  Poisoned,
  #[error("缓存路径必须使用 {0} 方案")]
  SchemeMismatch(&'static str),
}

/// 令牌有效期
pub fn token_lifetime() -> TimeDelta {
  TimeDelta::hours(24)
}

/// 生成随机令牌
pub fn new_token() -> String {
  hex::encode(rand::random::<[u8; 16]>())
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModelPayload {
  Full(ModelBuffer),
  Fragmented {
    set: ModelFragmentSet,
    fragment_names: Vec<String>,
  },
}

/// 缓存条目的版本信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
  pub version: String,
  pub token: String,
  pub token_expiration: DateTime<Utc>,
}

impl CacheEntry {
  fn issue(version: &str, token: &str) -> Self {
    CacheEntry {
      version: version.to_string(),
      token: token.to_string(),
      token_expiration: Utc::now() + token_lifetime(),
    }
  }

  pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
    now < self.token_expiration
  }

  pub fn is_fresh(&self) -> bool {
    self.is_fresh_at(Utc::now())
  }

  /// 令牌未过期且版本一致时可以直接使用缓存
  pub fn is_usable(&self, version: &str) -> bool {
    self.version == version && self.is_fresh()
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CachedModel {
  pub name: String,
  pub entry: CacheEntry,
  pub payload: ModelPayload,
}

pub trait ModelCache: Send + Sync {
  fn get(&self, name: &str) -> Result<Option<CachedModel>, CacheError>;
  fn put(
    &self,
    name: &str,
    payload: ModelPayload,
    version: &str,
    token: &str,
  ) -> Result<CacheEntry, CacheError>;
  fn check(&self, name: &str) -> Result<Option<CacheEntry>, CacheError>;
  fn delete(&self, name: &str) -> Result<(), CacheError>;
  /// 换发令牌并重新计算有效期
  fn renew(&self, name: &str, token: &str) -> Result<CacheEntry, CacheError>;
}

fn validate(name: &str, version: &str, token: &str) -> Result<(), CacheError> {
  validate_name(name)?;
  if version.is_empty() {
    return Err(CacheError::Empty("版本号"));
  }
  if token.is_empty() {
    return Err(CacheError::Empty("令牌"));
  }
  Ok(())
}

fn validate_name(name: &str) -> Result<(), CacheError> {
  if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
    return Err(CacheError::InvalidName(name.to_string()));
  }
  Ok(())
}

fn validate_payload(payload: &ModelPayload) -> Result<(), CacheError> {
  match payload {
    ModelPayload::Full(buffer) if buffer.is_empty() => Err(CacheError::Empty("模型数据")),
    ModelPayload::Full(_) => Ok(()),
    ModelPayload::Fragmented {
      set,
      fragment_names,
    } => {
      if fragment_names.len() != set.fragments.len() {
        return Err(CacheError::InvalidName(format!(
          "分片名数量 {} 与分片数量 {} 不一致",
          fragment_names.len(),
          set.fragments.len()
        )));
      }
      for fragment_name in fragment_names {
        validate_name(fragment_name)?;
      }
      set
        .validate()
        .map_err(|_| CacheError::Empty("分片数据"))
    }
  }
}

/// 进程内缓存
#[derive(Default)]
pub struct MemoryModelCache {
  models: Mutex<HashMap<String, CachedModel>>,
}

impl MemoryModelCache {
  pub fn new() -> Self {
    Self::default()
  }
}

impl ModelCache for MemoryModelCache {
  fn get(&self, name: &str) -> Result<Option<CachedModel>, CacheError> {
    let models = self.models.lock().map_err(|_| CacheError::Poisoned)?;
    Ok(models.get(name).cloned())
  }

  fn put(
    &self,
    name: &str,
    payload: ModelPayload,
    version: &str,
    token: &str,
  ) -> Result<CacheEntry, CacheError> {
    validate(name, version, token)?;
    validate_payload(&payload)?;
    let entry = CacheEntry::issue(version, token);
    let mut models = self.models.lock().map_err(|_| CacheError::Poisoned)?;
    models.insert(
      name.to_string(),
      CachedModel {
        name: name.to_string(),
        entry: entry.clone(),
        payload,
      },
    );
    Ok(entry)
  }

  fn check(&self, name: &str) -> Result<Option<CacheEntry>, CacheError> {
    let models = self.models.lock().map_err(|_| CacheError::Poisoned)?;
    Ok(models.get(name).map(|m| m.entry.clone()))
  }

  fn delete(&self, name: &str) -> Result<(), CacheError> {
    let mut models = self.models.lock().map_err(|_| CacheError::Poisoned)?;
    models.remove(name);
    Ok(())
  }

  fn renew(&self, name: &str, token: &str) -> Result<CacheEntry, CacheError> {
    let mut models = self.models.lock().map_err(|_| CacheError::Poisoned)?;
    let model = models
      .get_mut(name)
      .ok_or_else(|| CacheError::NotFound(name.to_string()))?;
    model.entry = CacheEntry::issue(&model.entry.version, token);
    Ok(model.entry.clone())
  }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum PayloadRecord {
  Full,
  Fragmented {
    fragment_names: Vec<String>,
    encrypted_index: usize,
  },
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheRecord {
  name: String,
  #[serde(flatten)]
  entry: CacheEntry,
  payload: PayloadRecord,
}

const MODEL_FILE: &str = "model.bin";
const KEY_FILE: &str = "key.bin";

/// 目录缓存：`<root>/<name>.json` 为索引，`<root>/<name>/` 下存放模型数据
pub struct FileModelCache {
  root: PathBuf,
}

impl FileModelCache {
  pub fn new(root: impl Into<PathBuf>) -> Result<Self, CacheError> {
    let root = root.into();
    fs::create_dir_all(&root)?;
    info!("模型缓存目录: {}", root.display());
    Ok(FileModelCache { root })
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  fn record_path(&self, name: &str) -> PathBuf {
    self.root.join(format!("{}.json", name))
  }

  fn payload_dir(&self, name: &str) -> PathBuf {
    self.root.join(name)
  }

  fn read_record(&self, name: &str) -> Result<Option<CacheRecord>, CacheError> {
    validate_name(name)?;
    let path = self.record_path(name);
    if !path.exists() {
      return Ok(None);
    }
    let record = serde_json::from_slice(&fs::read(path)?)?;
    Ok(Some(record))
  }

  fn write_record(&self, record: &CacheRecord) -> Result<(), CacheError> {
    fs::write(
      self.record_path(&record.name),
      serde_json::to_vec_pretty(record)?,
    )?;
    Ok(())
  }
}

impl FromUrlWithScheme for FileModelCache {
  const SCHEME: &'static str = "cache";
}

impl FromUrl for FileModelCache {
  type Error = CacheError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(CacheError::SchemeMismatch(Self::SCHEME));
    }
    FileModelCache::new(url.path())
  }
}

impl ModelCache for FileModelCache {
  fn get(&self, name: &str) -> Result<Option<CachedModel>, CacheError> {
    let Some(record) = self.read_record(name)? else {
      return Ok(None);
    };
    let dir = self.payload_dir(name);

    let payload = match record.payload {
      PayloadRecord::Full => ModelPayload::Full(ModelBuffer::new(fs::read(dir.join(MODEL_FILE))?)),
      PayloadRecord::Fragmented {
        fragment_names,
        encrypted_index,
      } => {
        let fragments = fragment_names
          .iter()
          .map(|f| fs::read(dir.join(f)))
          .collect::<Result<Vec<_>, _>>()?;
        ModelPayload::Fragmented {
          set: ModelFragmentSet {
            fragments,
            encrypted_index,
            key: fs::read(dir.join(KEY_FILE))?,
          },
          fragment_names,
        }
      }
    };
    debug!("缓存命中: {} ({})", name, record.entry.version);

    Ok(Some(CachedModel {
      name: record.name,
      entry: record.entry,
      payload,
    }))
  }

  fn put(
    &self,
    name: &str,
    payload: ModelPayload,
    version: &str,
    token: &str,
  ) -> Result<CacheEntry, CacheError> {
    validate(name, version, token)?;
    validate_payload(&payload)?;

    let dir = self.payload_dir(name);
    if dir.exists() {
      fs::remove_dir_all(&dir)?;
    }
    fs::create_dir_all(&dir)?;

    let record_payload = match payload {
      ModelPayload::Full(buffer) => {
        fs::write(dir.join(MODEL_FILE), buffer.as_bytes())?;
        PayloadRecord::Full
      }
      ModelPayload::Fragmented {
        set,
        fragment_names,
      } => {
        for (fragment_name, data) in fragment_names.iter().zip(&set.fragments) {
          fs::write(dir.join(fragment_name), data)?;
        }
        fs::write(dir.join(KEY_FILE), &set.key)?;
        PayloadRecord::Fragmented {
          fragment_names,
          encrypted_index: set.encrypted_index,
        }
      }
    };

    let entry = CacheEntry::issue(version, token);
    self.write_record(&CacheRecord {
      name: name.to_string(),
      entry: entry.clone(),
      payload: record_payload,
    })?;
    info!("模型 {} 已缓存, 版本 {}", name, version);
    Ok(entry)
  }

  fn check(&self, name: &str) -> Result<Option<CacheEntry>, CacheError> {
    Ok(self.read_record(name)?.map(|r| r.entry))
  }

  fn delete(&self, name: &str) -> Result<(), CacheError> {
    validate_name(name)?;
    let record = self.record_path(name);
    if record.exists() {
      fs::remove_file(record)?;
    }
    let dir = self.payload_dir(name);
    if dir.exists() {
      fs::remove_dir_all(dir)?;
    }
    warn!("已删除缓存模型 {}", name);
    Ok(())
  }

  fn renew(&self, name: &str, token: &str) -> Result<CacheEntry, CacheError> {
    let mut record = self
      .read_record(name)?
      .ok_or_else(|| CacheError::NotFound(name.to_string()))?;
    record.entry = CacheEntry::issue(&record.entry.version, token);
    self.write_record(&record)?;
    Ok(record.entry)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn fragmented() -> ModelPayload {
    ModelPayload::Fragmented {
      set: ModelFragmentSet {
        fragments: vec![vec![1, 2], vec![3], vec![4, 5, 6]],
        encrypted_index: 2,
        key: vec![7; 32],
      },
      fragment_names: vec!["a_chunk_1.css".into(), "a_chunk_2.js".into(), "a_chunk_3.png".into()],
    }
  }

  fn exercise(cache: &dyn ModelCache) {
    assert!(cache.get("globes").expect("读取").is_none());

    let entry = cache.put("globes", fragmented(), "1.0.1", "tok").expect("写入");
    assert!(entry.is_usable("1.0.1"));
    assert!(!entry.is_usable("1.0.2"));
    assert!(!entry.is_fresh_at(Utc::now() + TimeDelta::hours(25)));

    let cached = cache.get("globes").expect("读取").expect("命中");
    assert_eq!(cached.payload, fragmented());
    assert_eq!(cache.check("globes").expect("检查"), Some(entry));

    let renewed = cache.renew("globes", "tok2").expect("续期");
    assert_eq!(renewed.token, "tok2");
    assert_eq!(renewed.version, "1.0.1");

    cache.delete("globes").expect("删除");
    assert!(cache.check("globes").expect("检查").is_none());
    assert!(matches!(cache.renew("globes", "t"), Err(CacheError::NotFound(_))));
  }

  #[test]
  fn memory_cache_round_trip() {
    exercise(&MemoryModelCache::new());
  }

  #[test]
  fn file_cache_round_trip() {
    let dir = tempfile::tempdir().expect("临时目录");
    let cache = FileModelCache::new(dir.path()).expect("缓存");
    exercise(&cache);

    cache
      .put("inpaint", ModelPayload::Full(ModelBuffer::new(vec![9; 10])), "2.0.0", "t")
      .expect("写入");
    let reopened = FileModelCache::new(dir.path()).expect("缓存");
    let cached = reopened.get("inpaint").expect("读取").expect("命中");
    assert_eq!(cached.payload, ModelPayload::Full(ModelBuffer::new(vec![9; 10])));
  }

  #[test]
  fn invalid_entries_are_rejected() {
    let cache = MemoryModelCache::new();
    let full = || ModelPayload::Full(ModelBuffer::new(vec![1]));
    assert!(matches!(cache.put("", full(), "1", "t"), Err(CacheError::InvalidName(_))));
    assert!(matches!(cache.put("../x", full(), "1", "t"), Err(CacheError::InvalidName(_))));
    assert!(matches!(cache.put("m", full(), "", "t"), Err(CacheError::Empty(_))));
    assert!(matches!(
      cache.put("m", ModelPayload::Full(ModelBuffer::new(vec![])), "1", "t"),
      Err(CacheError::Empty(_))
    ));
  }
}
