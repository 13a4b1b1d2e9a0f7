// 该文件是 Fukidashi （对白框） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::{Path, PathBuf};

use chrono::{Datelike, Utc};
use image::RgbaImage;
use thiserror::Error;
use tracing::info;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::PageDetections,
  output::{Render, draw::Draw},
  task::Page,
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

/// 按日期归档每页的结果
///
/// `folder:///dir` 写入 `dir/YYYY/MM/DD/<页面名>.png`，检测结果另存为同名 `.json`。
/// 查询参数 `preview` 使保存的图像带有检测框。
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  draw: Option<Draw>,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let preview = uri.query_pairs().any(|(k, _)| k == "preview");
    Ok(DirectoryRecordOutput {
      directory: PathBuf::from(uri.path()),
      draw: preview.then(Draw::default),
    })
  }
}

impl DirectoryRecordOutput {
  pub fn new(directory: impl Into<PathBuf>, preview: bool) -> Self {
    DirectoryRecordOutput {
      directory: directory.into(),
      draw: preview.then(Draw::default),
    }
  }

  fn page_path(&self, filename: &str) -> Result<PathBuf, DirectoryRecordOutputError> {
    let now = Utc::now();
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    if !directory.exists() {
      std::fs::create_dir_all(&directory)?;
    }

    let stem = Path::new(filename)
      .file_stem()
      .map(|s| s.to_string_lossy().into_owned())
      .unwrap_or_else(|| filename.to_string());
    Ok(directory.join(format!("{}.png", stem)))
  }
}

impl Render<Page, PageDetections> for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, frame: &Page, result: &PageDetections) -> Result<(), Self::Error> {
    let path = self.page_path(&frame.filename)?;
    match &self.draw {
      Some(draw) => draw.draw_detections(&frame.image, &result.result()).save(&path)?,
      None => frame.image.save(&path)?,
    }
    std::fs::write(path.with_extension("json"), serde_json::to_vec_pretty(result)?)?;
    info!("记录 {} 的检测结果到 {}", frame.filename, path.display());
    Ok(())
  }
}

impl Render<Page, RgbaImage> for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, frame: &Page, result: &RgbaImage) -> Result<(), Self::Error> {
    let path = self.page_path(&frame.filename)?;
    result.save(&path)?;
    info!("记录 {} 的修复结果到 {}", frame.filename, path.display());
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::NormalizedDetection;

  #[test]
  fn detections_are_recorded_next_to_the_page() {
    let dir = tempfile::tempdir().expect("临时目录");
    let url = url::Url::parse(&format!("folder://{}?preview", dir.path().display())).expect("URL");
    let output = DirectoryRecordOutput::from_url(&url).expect("创建");

    let page = Page {
      filename: "p1.jpg".to_string(),
      image: RgbaImage::new(8, 8),
    };
    let detections = PageDetections {
      filename: "p1.jpg".to_string(),
      globes: vec![NormalizedDetection {
        class: 0,
        confidence: 0.9,
        bbox: [0.5, 0.5, 0.5, 0.5],
      }],
      text: Vec::new(),
    };
    output.render_result(&page, &detections).expect("记录");

    let path = output.page_path("p1.jpg").expect("路径");
    assert!(path.exists());
    let saved: PageDetections =
      serde_json::from_slice(&std::fs::read(path.with_extension("json")).expect("读取")).expect("解析");
    assert_eq!(saved, detections);
  }
}
