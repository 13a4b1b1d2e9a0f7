// 该文件是 Fukidashi （对白框） 项目的一部分。
// src/output/save_image_file.rs - 保存图像文件
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

use std::path::{Path, PathBuf};

use image::RgbaImage;
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::PageDetections,
  output::{Render, draw::Draw},
  task::Page,
};

/// `image:///out.png` 保存到单个文件，`image:///out/` 按页面文件名保存到目录
pub struct SaveImageFileOutput {
  path: PathBuf,
  draw: Draw,
}

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O 错误: {0}")]
  IoError(std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(image::ImageError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

impl FromUrlWithScheme for SaveImageFileOutput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(SaveImageFileError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    Ok(SaveImageFileOutput::new(uri.path()))
  }
}

impl SaveImageFileOutput {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    SaveImageFileOutput {
      path: path.into(),
      draw: Draw::default(),
    }
  }

  fn target(&self, filename: &str) -> PathBuf {
    let is_dir = self.path.is_dir() || self.path.as_os_str().to_string_lossy().ends_with('/');
    if is_dir {
      self.path.join(Path::new(filename).with_extension("png"))
    } else {
      self.path.clone()
    }
  }

  fn save_image(&self, filename: &str, image: &RgbaImage) -> Result<(), SaveImageFileError> {
    let path = self.target(filename);
    if let Some(parent) = path.parent() {
      if !parent.as_os_str().is_empty() {
        std::fs::create_dir_all(parent).map_err(SaveImageFileError::IoError)?;
      }
    }

    image.save(&path).map_err(SaveImageFileError::ImageError)?;
    info!("保存图像到文件: {}", path.display());
    Ok(())
  }
}

impl Render<Page, PageDetections> for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn render_result(&self, frame: &Page, result: &PageDetections) -> Result<(), Self::Error> {
    let image = self.draw.draw_detections(&frame.image, &result.result());
    self.save_image(&frame.filename, &image)
  }
}

impl Render<Page, RgbaImage> for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn render_result(&self, frame: &Page, result: &RgbaImage) -> Result<(), Self::Error> {
    self.save_image(&frame.filename, result)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn directory_targets_use_page_names() {
    let dir = tempfile::tempdir().expect("临时目录");
    let output = SaveImageFileOutput::new(dir.path());
    let page = Page {
      filename: "001.jpg".to_string(),
      image: RgbaImage::new(2, 2),
    };
    output
      .render_result(&page, &RgbaImage::new(3, 3))
      .expect("保存");

    let saved = image::open(dir.path().join("001.png")).expect("读取");
    assert_eq!((saved.width(), saved.height()), (3, 3));
  }
}
