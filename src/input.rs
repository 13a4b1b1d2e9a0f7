// 该文件是 Fukidashi （对白框） 项目的一部分。
// src/input.rs - 页面与编辑输入
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
  FromUrl,
  task::{EditSource, Page},
};

#[cfg(feature = "read_image_file")]
mod read_image_file;
#[cfg(feature = "read_image_file")]
pub use self::read_image_file::{ImageFileInput, ImageFileInputError, load_mask};

mod read_edits;
pub use self::read_edits::{EditFileError, PageEdits, read_edits};

#[derive(Error, Debug)]
pub enum InputError {
  #[cfg(feature = "read_image_file")]
  #[error("图像文件输入错误: {0}")]
  ImageFileInputError(#[from] ImageFileInputError),
  #[error("编辑记录错误: {0}")]
  EditFileError(#[from] EditFileError),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

/// 按 URL 方案选择的页面来源
pub enum InputWrapper {
  #[cfg(feature = "read_image_file")]
  ReadImageFile(ImageFileInput),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  #[cfg_attr(not(feature = "read_image_file"), allow(unused_variables))]
  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "read_image_file")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == ImageFileInput::SCHEME {
        let input = ImageFileInput::from_url(url)?;
        return Ok(InputWrapper::ReadImageFile(input));
      }
    }
    Err(InputError::SchemeMismatch)
  }
}

impl InputWrapper {
  /// 按文件名顺序读取全部页面
  pub fn load_pages(&self) -> Result<Vec<Page>, InputError> {
    match self {
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => Ok(input.load_pages()?),
      #[allow(unreachable_patterns)]
      _ => Err(InputError::SchemeMismatch),
    }
  }
}

impl PageEdits {
  /// 读取掩码文件，转为修复任务使用的编辑描述
  pub fn load(self) -> Result<EditSource, InputError> {
    match self {
      PageEdits::Strokes(strokes) => Ok(EditSource::Strokes(strokes)),
      #[cfg(feature = "read_image_file")]
      PageEdits::Mask(path) => Ok(EditSource::Mask(load_mask(path)?)),
      #[cfg(not(feature = "read_image_file"))]
      PageEdits::Mask(_) => Err(InputError::SchemeMismatch),
    }
  }
}
