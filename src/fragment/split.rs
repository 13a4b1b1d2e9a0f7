// 该文件是 Fukidashi （对白框） 项目的一部分。
// src/fragment/split.rs - 模型分片与加密
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

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;

use super::{ModelFragmentSet, ReconstructionError, builtin};
use crate::ValidationError;

pub const DEFAULT_FRAGMENT_COUNT: usize = 4;
pub const DEFAULT_ENCRYPTED_INDEX: usize = 3;
pub const DEFAULT_VERSION: &str = "1.0.0";
const FRAGMENT_EXTENSIONS: [&str; 4] = [".css", ".js", ".png", ".txt"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentInfo {
  pub filename: String,
  pub sha256: String,
  pub is_encrypted: bool,
}

/// 模型元数据，与模型服务端的 `model_metadata.json` 条目一致
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelMetadata {
  pub version: String,
  pub original_name: String,
  pub sha256: String,
  pub is_fragmented: bool,
  #[serde(default)]
  pub fragments: Vec<FragmentInfo>,
}

impl ModelMetadata {
  pub fn encrypted_index(&self) -> Option<usize> {
    self.fragments.iter().position(|f| f.is_encrypted)
  }

  pub fn fragment_names(&self) -> Vec<String> {
    self.fragments.iter().map(|f| f.filename.clone()).collect()
  }
}

#[derive(Debug, Clone)]
pub struct SplitOutput {
  pub set: ModelFragmentSet,
  pub metadata: ModelMetadata,
}

/// 生成 32 字节随机密钥
pub fn generate_key() -> Vec<u8> {
  rand::random::<[u8; 32]>().to_vec()
}

/// 版本号 `X.Y.Z` 的补丁号加一
pub fn bump_version(version: &str) -> Option<String> {
  let parts = version
    .split('.')
    .map(|p| p.parse::<u64>().ok())
    .collect::<Option<Vec<_>>>()?;
  match parts.as_slice() {
    [major, minor, patch] => Some(format!("{}.{}.{}", major, minor, patch + 1)),
    _ => None,
  }
}

/// 把模型拆分为 `parts` 个分片，并用 AES-CBC 加密其中一个
///
/// 前 `parts - 1` 个分片等长，最后一个分片包含余下的字节。
pub fn split_model(
  model: &[u8],
  parts: usize,
  encrypted_index: usize,
  key: &[u8],
  original_name: &str,
) -> Result<SplitOutput, ReconstructionError> {
  if parts == 0 || model.len() < parts {
    return Err(
      ValidationError::ModelTooSmall {
        len: model.len(),
        parts,
      }
      .into(),
    );
  }
  if encrypted_index >= parts {
    return Err(
      ValidationError::EncryptedIndexOutOfRange {
        index: encrypted_index,
        count: parts,
      }
      .into(),
    );
  }
  if !matches!(key.len(), 16 | 24 | 32) {
    return Err(ValidationError::KeyLength(key.len()).into());
  }

  let stem = original_name
    .rsplit_once('.')
    .map(|(stem, _)| stem)
    .unwrap_or(original_name);
  let size = model.len() / parts;
  let mut fragments = Vec::with_capacity(parts);
  let mut infos = Vec::with_capacity(parts);

  for i in 0..parts {
    let end = if i + 1 == parts { model.len() } else { (i + 1) * size };
    let plain = &model[i * size..end];
    let data = if i == encrypted_index {
      builtin::encrypt_fragment(plain, key, &rand::random::<[u8; builtin::IV_LEN]>())?
    } else {
      plain.to_vec()
    };

    infos.push(FragmentInfo {
      filename: format!(
        "{}_chunk_{}{}",
        stem,
        hex::encode(rand::random::<[u8; 8]>()),
        FRAGMENT_EXTENSIONS[i % FRAGMENT_EXTENSIONS.len()]
      ),
      sha256: hex::encode(Sha256::digest(&data)),
      is_encrypted: i == encrypted_index,
    });
    fragments.push(data);
  }

  info!(
    "模型 {} 拆分为 {} 个分片, 加密分片索引 {}",
    original_name, parts, encrypted_index
  );

  Ok(SplitOutput {
    set: ModelFragmentSet {
      fragments,
      encrypted_index,
      key: key.to_vec(),
    },
    metadata: ModelMetadata {
      version: DEFAULT_VERSION.to_string(),
      original_name: original_name.to_string(),
      sha256: hex::encode(Sha256::digest(model)),
      is_fragmented: true,
      fragments: infos,
    },
  })
}
