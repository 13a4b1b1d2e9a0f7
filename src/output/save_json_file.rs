// 该文件是 Fukidashi （对白框） 项目的一部分。
// src/output/save_json_file.rs - 检测结果 JSON 输出
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

use std::{path::PathBuf, sync::Mutex};

use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, model::PageDetections, output::Render, task::Page};

#[derive(Error, Debug)]
pub enum SaveJsonFileError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("结果缓冲区锁已失效")]
  Poisoned,
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

/// 把全部页面的检测结果写入一个 JSON 数组
///
/// 每次渲染都会重写整个文件，同名页面的结果被替换。
pub struct SaveJsonFileOutput {
  path: PathBuf,
  pages: Mutex<Vec<PageDetections>>,
}

impl FromUrlWithScheme for SaveJsonFileOutput {
  const SCHEME: &'static str = "json";
}

impl FromUrl for SaveJsonFileOutput {
  type Error = SaveJsonFileError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(SaveJsonFileError::SchemeMismatch);
    }
    Ok(SaveJsonFileOutput::new(uri.path()))
  }
}

impl SaveJsonFileOutput {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    SaveJsonFileOutput {
      path: path.into(),
      pages: Mutex::new(Vec::new()),
    }
  }
}

impl Render<Page, PageDetections> for SaveJsonFileOutput {
  type Error = SaveJsonFileError;

  fn render_result(&self, _frame: &Page, result: &PageDetections) -> Result<(), Self::Error> {
    let mut pages = self.pages.lock().map_err(|_| SaveJsonFileError::Poisoned)?;
    match pages.iter_mut().find(|p| p.filename == result.filename) {
      Some(page) => *page = result.clone(),
      None => pages.push(result.clone()),
    }

    if let Some(parent) = self.path.parent() {
      if !parent.as_os_str().is_empty() {
        std::fs::create_dir_all(parent)?;
      }
    }
    std::fs::write(&self.path, serde_json::to_vec_pretty(&*pages)?)?;
    debug!("写入 {} 页检测结果到 {}", pages.len(), self.path.display());
    Ok(())
  }
}
