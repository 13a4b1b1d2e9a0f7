// 该文件是 Fukidashi （对白框） 项目的一部分。
// src/input/read_edits.rs - 编辑记录输入
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
  path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::mask::BrushStroke;

#[derive(Error, Debug)]
pub enum EditFileError {
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("编辑记录格式错误: {0}")]
  Json(#[from] serde_json::Error),
}

/// 某一页的编辑：笔刷操作，或一张掩码图
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageEdits {
  Strokes(Vec<BrushStroke>),
  Mask(PathBuf),
}

/// 读取以文件名为键的编辑记录
///
/// ```json
/// { "001.png": { "strokes": [{ "points": [[10, 10], [40, 12]], "base_width": 16 }] },
///   "002.png": { "mask": "masks/002.png" } }
/// ```
///
/// 掩码路径为相对路径时相对于记录文件所在目录。
pub fn read_edits(path: impl AsRef<Path>) -> Result<BTreeMap<String, PageEdits>, EditFileError> {
  let path = path.as_ref();
  let mut edits: BTreeMap<String, PageEdits> = serde_json::from_slice(&std::fs::read(path)?)?;
  let base = path.parent().unwrap_or(Path::new(""));
  for edit in edits.values_mut() {
    if let PageEdits::Mask(mask) = edit {
      if mask.is_relative() {
        *mask = base.join(&*mask);
      }
    }
  }
  info!("读取 {} 页的编辑记录", edits.len());
  Ok(edits)
}
