// 该文件是 Fukidashi （对白框） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::{Path, PathBuf};

use image::{GrayImage, ImageReader};
use thiserror::Error;
use tracing::{debug, error};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, mask::mask_from_image, task::Page};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI 方案不匹配")]
  SchemaMismatch,
  #[error("I/O 错误: {0}")]
  IoError(std::io::Error),
  #[error("图像读取错误: {0}")]
  ImageLoadError(image::ImageError),
  #[error("目录中没有图像: {0}")]
  NoImages(String),
}

impl From<std::io::Error> for ImageFileInputError {
  fn from(err: std::io::Error) -> Self {
    ImageFileInputError::IoError(err)
  }
}

impl From<image::ImageError> for ImageFileInputError {
  fn from(err: image::ImageError) -> Self {
    ImageFileInputError::ImageLoadError(err)
  }
}

const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

fn is_image(path: &Path) -> bool {
  path
    .extension()
    .and_then(|e| e.to_str())
    .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
    .unwrap_or(false)
}

/// `image:///a.png` 读取单页，`image:///dir` 读取目录下全部图像
pub struct ImageFileInput {
  paths: Vec<PathBuf>,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemaMismatch);
    }
    ImageFileInput::open(url.path())
  }
}

impl ImageFileInput {
  pub fn open(path: impl AsRef<Path>) -> Result<Self, ImageFileInputError> {
    let path = path.as_ref();
    if !path.is_dir() {
      return Ok(ImageFileInput {
        paths: vec![path.to_path_buf()],
      });
    }

    let mut paths = Vec::new();
    for entry in std::fs::read_dir(path)? {
      let entry = entry?.path();
      if entry.is_file() && is_image(&entry) {
        paths.push(entry);
      }
    }
    if paths.is_empty() {
      return Err(ImageFileInputError::NoImages(path.display().to_string()));
    }
    paths.sort();
    Ok(ImageFileInput { paths })
  }

  pub fn paths(&self) -> &[PathBuf] {
    &self.paths
  }

  /// 页面以文件名（不含目录）命名
  pub fn load_pages(&self) -> Result<Vec<Page>, ImageFileInputError> {
    self
      .paths
      .iter()
      .map(|path| {
        let image = ImageReader::open(path)?.decode()?.to_rgba8();
        let filename = path
          .file_name()
          .map(|n| n.to_string_lossy().into_owned())
          .unwrap_or_default();
        debug!("读取 {}: {}x{}", filename, image.width(), image.height());
        Ok(Page { filename, image })
      })
      .collect()
  }
}

/// 读取掩码图像，亮像素为编辑区域
pub fn load_mask(path: impl AsRef<Path>) -> Result<GrayImage, ImageFileInputError> {
  let image = ImageReader::open(path.as_ref())?.decode()?;
  Ok(mask_from_image(&image))
}
