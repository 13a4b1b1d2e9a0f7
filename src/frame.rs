// 该文件是 Fukidashi （对白框） 项目的一部分。
// src/frame.rs - NCHW 帧定义
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

use image::{GrayImage, Rgba, RgbaImage};

use crate::tensor::Tensor;

const RGB_CHANNELS: usize = 3;

/// 平面排列的 RGB 字节帧，对应 `uint8 [1, 3, H, W]`
#[derive(Debug, Clone, PartialEq)]
pub struct RgbNchwFrame {
  width: usize,
  height: usize,
  data: Box<[u8]>,
}

impl RgbNchwFrame {
  pub fn with_shape(height: usize, width: usize) -> Self {
    Self {
      width,
      height,
      data: vec![0u8; RGB_CHANNELS * width * height].into_boxed_slice(),
    }
  }

  pub fn height(&self) -> usize {
    self.height
  }

  pub fn width(&self) -> usize {
    self.width
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  pub fn as_nchw(&self) -> &[u8] {
    &self.data
  }

  pub fn into_tensor(self) -> Tensor {
    let dims = vec![1, RGB_CHANNELS as i64, self.height as i64, self.width as i64];
    Tensor::u8(self.data.into_vec(), dims)
  }

  /// 还原为不透明的 RGBA 图像
  pub fn to_rgba_image(&self) -> RgbaImage {
    let plane = self.width * self.height;
    RgbaImage::from_fn(self.width as u32, self.height as u32, |x, y| {
      let idx = y as usize * self.width + x as usize;
      Rgba([
        self.data[idx],
        self.data[plane + idx],
        self.data[2 * plane + idx],
        255,
      ])
    })
  }
}

impl AsMut<[u8]> for RgbNchwFrame {
  fn as_mut(&mut self) -> &mut [u8] {
    &mut self.data
  }
}

impl From<&RgbaImage> for RgbNchwFrame {
  fn from(image: &RgbaImage) -> Self {
    let (width, height) = image.dimensions();
    let mut frame = RgbNchwFrame::with_shape(height as usize, width as usize);
    let plane = frame.width * frame.height;
    let slice = frame.as_mut();

    for (x, y, pixel) in image.enumerate_pixels() {
      let idx = y as usize * width as usize + x as usize;
      for c in 0..RGB_CHANNELS {
        slice[c * plane + idx] = pixel[c];
      }
    }
    frame
  }
}

/// 平面排列、归一化到 `[0, 1]` 的 BGR 浮点帧，对应 `float32 [1, 3, H, W]`
#[derive(Debug, Clone, PartialEq)]
pub struct BgrNchwF32Frame {
  width: usize,
  height: usize,
  data: Box<[f32]>,
}

impl BgrNchwF32Frame {
  pub fn height(&self) -> usize {
    self.height
  }

  pub fn width(&self) -> usize {
    self.width
  }

  pub fn as_nchw(&self) -> &[f32] {
    &self.data
  }

  pub fn into_tensor(self) -> Tensor {
    let dims = vec![1, RGB_CHANNELS as i64, self.height as i64, self.width as i64];
    Tensor::f32(self.data.into_vec(), dims)
  }
}

impl From<&RgbaImage> for BgrNchwF32Frame {
  fn from(image: &RgbaImage) -> Self {
    let (width, height) = (image.width() as usize, image.height() as usize);
    let plane = width * height;
    let mut data = vec![0f32; RGB_CHANNELS * plane];

    for (x, y, pixel) in image.enumerate_pixels() {
      let idx = y as usize * width + x as usize;
      data[idx] = pixel[2] as f32 / 255.0;
      data[plane + idx] = pixel[1] as f32 / 255.0;
      data[2 * plane + idx] = pixel[0] as f32 / 255.0;
    }

    Self {
      width,
      height,
      data: data.into_boxed_slice(),
    }
  }
}

/// 单通道掩码张量 `uint8 [1, 1, H, W]`
pub fn mask_tensor(mask: &GrayImage) -> Tensor {
  let dims = vec![1, 1, mask.height() as i64, mask.width() as i64];
  Tensor::u8(mask.as_raw().clone(), dims)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::tensor::DataType;

  fn sample() -> RgbaImage {
    // 2x1: 左像素 (10, 20, 30)，右像素 (40, 50, 60)
    let mut image = RgbaImage::new(2, 1);
    image.put_pixel(0, 0, Rgba([10, 20, 30, 255]));
    image.put_pixel(1, 0, Rgba([40, 50, 60, 128]));
    image
  }

  #[test]
  fn inpainting_input_is_planar_rgb_bytes() {
    let tensor = RgbNchwFrame::from(&sample()).into_tensor();
    assert_eq!(tensor.dtype(), DataType::UInt8);
    assert_eq!(tensor.dims, vec![1, 3, 1, 2]);
    assert_eq!(tensor.as_u8(), Some(&[10u8, 40, 20, 50, 30, 60][..]));
  }

  #[test]
  fn detection_input_is_planar_bgr_normalized() {
    let tensor = BgrNchwF32Frame::from(&sample()).into_tensor();
    assert_eq!(tensor.dtype(), DataType::Float32);
    assert_eq!(tensor.dims, vec![1, 3, 1, 2]);

    let data = tensor.as_f32().expect("float32");
    let expected = [30.0, 60.0, 20.0, 50.0, 10.0, 40.0].map(|v: f32| v / 255.0);
    for (a, b) in data.iter().zip(expected) {
      assert!((a - b).abs() < 1e-6);
    }
  }

  #[test]
  fn planar_frame_restores_opaque_image() {
    let restored = RgbNchwFrame::from(&sample()).to_rgba_image();
    assert_eq!(restored.get_pixel(1, 0), &Rgba([40, 50, 60, 255]));
  }

  #[test]
  fn mask_tensor_keeps_single_channel() {
    let mask = GrayImage::from_raw(2, 2, vec![0, 255, 255, 0]).expect("2x2");
    let tensor = mask_tensor(&mask);
    assert_eq!(tensor.dims, vec![1, 1, 2, 2]);
    assert_eq!(tensor.as_u8(), Some(&[0u8, 255, 255, 0][..]));
  }
}
