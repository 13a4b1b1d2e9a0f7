// 该文件是 Fukidashi （对白框） 项目的一部分。
// src/model/inpaint.rs - 图像修复模型
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use image::{GrayImage, RgbaImage};

use crate::{
  compositor::composite,
  frame::{RgbNchwFrame, mask_tensor},
  mask::{MaskPolarity, to_model_mask},
  model::Model,
  session::{InferenceSession, SessionError, output_at, positional_inputs},
  tensor::NamedTensors,
};

/// 一个分块的模型输入，`mask` 中 255 表示需要修复
#[derive(Debug, Clone)]
pub struct InpaintTile {
  pub image: RgbaImage,
  pub mask: GrayImage,
}

/// 以图像和掩码为输入的修复模型
///
/// 会话的第一个输入为 `uint8 [1, 3, H, W]` RGB 图像，第二个为 `uint8 [1, 1, H, W]` 掩码，
/// 第一个输出与图像同形状。
#[derive(Debug, Clone, Copy)]
pub struct Inpainter {
  mask_polarity: MaskPolarity,
}

impl Default for Inpainter {
  fn default() -> Self {
    Inpainter::new(MaskPolarity::PreserveHigh)
  }
}

impl Inpainter {
  pub fn new(mask_polarity: MaskPolarity) -> Self {
    Inpainter { mask_polarity }
  }

  pub fn mask_polarity(&self) -> MaskPolarity {
    self.mask_polarity
  }
}

impl Model for Inpainter {
  type Input = InpaintTile;
  type Output = RgbaImage;

  fn preprocess(
    &self,
    session: &dyn InferenceSession,
    input: &InpaintTile,
  ) -> Result<NamedTensors, SessionError> {
    if input.image.dimensions() != input.mask.dimensions() {
      return Err(SessionError::Shape(format!(
        "图像尺寸 {:?} 与掩码尺寸 {:?} 不一致",
        input.image.dimensions(),
        input.mask.dimensions()
      )));
    }
    let image = RgbNchwFrame::from(&input.image).into_tensor();
    // 内部掩码到模型掩码的唯一转换点
    let mask = to_model_mask(input.mask.clone(), MaskPolarity::EditHigh, self.mask_polarity);
    positional_inputs(session, vec![image, mask_tensor(&mask)])
  }

  fn postprocess(
    &self,
    input: &InpaintTile,
    outputs: &NamedTensors,
  ) -> Result<RgbaImage, SessionError> {
    let output = output_at(outputs, 0)?;
    let planes = RgbNchwFrame::from(&input.image);
    composite(
      output,
      planes.as_nchw(),
      &input.mask,
      input.image.width(),
      input.image.height(),
    )
  }
}
