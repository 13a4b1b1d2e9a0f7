// 该文件是 Fukidashi （对白框） 项目的一部分。
// src/compositor.rs - 修复结果合成与拼接
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

use image::{GrayImage, Rgba, RgbaImage, imageops};
use tracing::debug;

use crate::{
  geometry::{Rect, ScaleTransform},
  planner::round_half_up,
  session::SessionError,
  tensor::{Tensor, TensorData},
};

/// 一个分块的修复结果，`bounds` 为填充画布上的坐标
#[derive(Debug, Clone)]
pub struct TileResult {
  pub bounds: Rect,
  pub image: RgbaImage,
}

/// 把模型输出转为字节，浮点输出按 `[0, 1]` 解释
fn output_bytes(output: &Tensor, count: usize) -> Result<Vec<u8>, SessionError> {
  if output.len() < count {
    return Err(SessionError::Shape(format!(
      "修复输出长度 {}, 期望至少 {}",
      output.len(),
      count
    )));
  }
  let bytes = match &output.data {
    TensorData::U8(data) => data[..count].to_vec(),
    TensorData::F32(data) => data[..count]
      .iter()
      .map(|v| round_half_up(v * 255.0).clamp(0.0, 255.0) as u8)
      .collect(),
  };
  Ok(bytes)
}

/// 按编辑掩码把模型输出与原图混合
///
/// `m = mask / 255`，`out = m * model + (1 - m) * original`，alpha 固定为 255。
/// 掩码为 0 的像素与输入逐字节相同。
pub fn composite(
  output: &Tensor,
  input_planes: &[u8],
  edit_mask: &GrayImage,
  width: u32,
  height: u32,
) -> Result<RgbaImage, SessionError> {
  let plane = width as usize * height as usize;
  if input_planes.len() < 3 * plane {
    return Err(SessionError::Shape(format!(
      "输入平面长度 {}, 期望 {}",
      input_planes.len(),
      3 * plane
    )));
  }
  if edit_mask.dimensions() != (width, height) {
    return Err(SessionError::Shape(format!(
      "掩码尺寸 {:?} 与图像 {}x{} 不一致",
      edit_mask.dimensions(),
      width,
      height
    )));
  }
  let model = output_bytes(output, 3 * plane)?;

  let mut result = RgbaImage::new(width, height);
  for (x, y, pixel) in result.enumerate_pixels_mut() {
    let idx = y as usize * width as usize + x as usize;
    let m = edit_mask.as_raw()[idx] as f32 / 255.0;
    let mut rgba = [0u8, 0, 0, 255];
    for c in 0..3 {
      let original = input_planes[c * plane + idx] as f32;
      let generated = model[c * plane + idx] as f32;
      rgba[c] = round_half_up(m * generated + (1.0 - m) * original).clamp(0.0, 255.0) as u8;
    }
    *pixel = Rgba(rgba);
  }
  Ok(result)
}

/// 把各分块结果映射回原图并按规划顺序覆盖到 `base` 上
///
/// 目标区域限制在原图范围内，分块中对应的可见部分缩放到目标尺寸。
pub fn stitch(
  tiles: &[TileResult],
  original_width: u32,
  original_height: u32,
  transform: &ScaleTransform,
  mut base: RgbaImage,
) -> RgbaImage {
  let (w, h) = (original_width as f32, original_height as f32);

  for (index, tile) in tiles.iter().enumerate() {
    let dest = transform.inverse_rect(&tile.bounds);
    let x0 = round_half_up(dest.x).clamp(0.0, w);
    let y0 = round_half_up(dest.y).clamp(0.0, h);
    let x1 = round_half_up(dest.right()).clamp(0.0, w);
    let y1 = round_half_up(dest.bottom()).clamp(0.0, h);
    let (dw, dh) = ((x1 - x0) as u32, (y1 - y0) as u32);
    if dw == 0 || dh == 0 {
      debug!("分块 {} 映射后为空, 跳过", index);
      continue;
    }

    // 只取映射到原图之内的部分，落在填充区的行列不参与缩放
    let src = transform.forward_rect(&Rect::new(x0, y0, x1 - x0, y1 - y0));
    let (tw, th) = (tile.image.width() as f32, tile.image.height() as f32);
    let sx0 = round_half_up(src.x - tile.bounds.x).clamp(0.0, tw);
    let sy0 = round_half_up(src.y - tile.bounds.y).clamp(0.0, th);
    let sx1 = round_half_up(src.right() - tile.bounds.x).clamp(0.0, tw);
    let sy1 = round_half_up(src.bottom() - tile.bounds.y).clamp(0.0, th);
    let (sw, sh) = ((sx1 - sx0) as u32, (sy1 - sy0) as u32);
    if sw == 0 || sh == 0 {
      debug!("分块 {} 没有落在原图内的像素, 跳过", index);
      continue;
    }

    let visible = imageops::crop_imm(&tile.image, sx0 as u32, sy0 as u32, sw, sh).to_image();
    let resized = imageops::resize(&visible, dw, dh, imageops::FilterType::Triangle);
    imageops::overlay(&mut base, &resized, x0 as i64, y0 as i64);
  }
  base
}

/// 掩码之外的像素恢复为原图
pub fn preserve_unmasked(result: &mut RgbaImage, original: &RgbaImage, edit_mask: &GrayImage) {
  for (x, y, pixel) in result.enumerate_pixels_mut() {
    if x >= original.width() || y >= original.height() {
      continue;
    }
    let edited = edit_mask
      .get_pixel_checked(x, y)
      .map(|m| m[0] > 0)
      .unwrap_or(false);
    if !edited {
      *pixel = *original.get_pixel(x, y);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Luma;

  fn planes(width: u32, height: u32, value: u8) -> Vec<u8> {
    vec![value; 3 * (width * height) as usize]
  }

  #[test]
  fn unmasked_pixels_keep_original_bytes() {
    let (w, h) = (4, 3);
    let mut input = planes(w, h, 0);
    for (i, v) in input.iter_mut().enumerate() {
      *v = (i * 7 % 256) as u8;
    }
    let output = Tensor::f32(vec![0.5; 3 * 12], vec![1, 3, h as i64, w as i64]);
    let mask = GrayImage::new(w, h);

    let out = composite(&output, &input, &mask, w, h).expect("合成");
    for (x, y, p) in out.enumerate_pixels() {
      let idx = (y * w + x) as usize;
      assert_eq!(p.0, [input[idx], input[12 + idx], input[24 + idx], 255]);
    }
  }

  #[test]
  fn fully_masked_pixels_take_model_output() {
    let (w, h) = (2, 2);
    let input = planes(w, h, 10);
    let output = Tensor::f32(vec![0.5; 12], vec![1, 3, 2, 2]);
    let mask = GrayImage::from_pixel(w, h, Luma([255]));

    let out = composite(&output, &input, &mask, w, h).expect("合成");
    // 0.5 * 255 = 127.5，向上取整
    assert!(out.pixels().all(|p| p.0 == [128, 128, 128, 255]));

    let bytes = Tensor::u8(vec![200; 12], vec![1, 3, 2, 2]);
    let out = composite(&bytes, &input, &mask, w, h).expect("合成");
    assert!(out.pixels().all(|p| p.0 == [200, 200, 200, 255]));
  }

  #[test]
  fn short_outputs_are_rejected() {
    let output = Tensor::u8(vec![0; 5], vec![5]);
    let mask = GrayImage::new(2, 2);
    assert!(composite(&output, &planes(2, 2, 0), &mask, 2, 2).is_err());
  }

  #[test]
  fn tiles_are_mapped_back_with_inverse_transform() {
    // 200x100 缩放到 100 画布：scale 0.5，y 偏移 25
    let transform = crate::geometry::compute_scale_transform(200, 100, 100);
    let base = RgbaImage::from_pixel(200, 100, Rgba([0, 0, 0, 255]));
    let tile = TileResult {
      bounds: Rect::new(0.0, 25.0, 50.0, 25.0),
      image: RgbaImage::from_pixel(50, 25, Rgba([255, 0, 0, 255])),
    };

    let out = stitch(&[tile], 200, 100, &transform, base);
    assert_eq!(out.get_pixel(0, 0).0, [255, 0, 0, 255]);
    assert_eq!(out.get_pixel(99, 49).0, [255, 0, 0, 255]);
    assert_eq!(out.get_pixel(100, 50).0, [0, 0, 0, 255]);
  }

  #[test]
  fn padding_rows_are_not_stretched_into_the_page() {
    let transform = crate::geometry::compute_scale_transform(200, 100, 100);
    let base = RgbaImage::from_pixel(200, 100, Rgba([0, 0, 0, 255]));
    // 上半部分是白色填充，下半部分是修复内容
    let image = RgbaImage::from_fn(50, 50, |_, y| {
      if y < 25 {
        Rgba([255, 255, 255, 255])
      } else {
        Rgba([255, 0, 0, 255])
      }
    });
    let tile = TileResult {
      bounds: Rect::new(0.0, 0.0, 50.0, 50.0),
      image,
    };

    let out = stitch(&[tile], 200, 100, &transform, base);
    assert_eq!(out.get_pixel(0, 0).0, [255, 0, 0, 255]);
    assert_eq!(out.get_pixel(99, 49).0, [255, 0, 0, 255]);
    assert_eq!(out.get_pixel(0, 50).0, [0, 0, 0, 255]);
  }

  #[test]
  fn later_tiles_overwrite_earlier() {
    let transform = ScaleTransform::default();
    let base = RgbaImage::new(10, 10);
    let first = TileResult {
      bounds: Rect::new(0.0, 0.0, 6.0, 6.0),
      image: RgbaImage::from_pixel(6, 6, Rgba([1, 1, 1, 255])),
    };
    let second = TileResult {
      bounds: Rect::new(4.0, 4.0, 6.0, 6.0),
      image: RgbaImage::from_pixel(6, 6, Rgba([2, 2, 2, 255])),
    };
    let out = stitch(&[first, second], 10, 10, &transform, base);
    assert_eq!(out.get_pixel(5, 5).0, [2, 2, 2, 255]);
    assert_eq!(out.get_pixel(0, 0).0, [1, 1, 1, 255]);
  }

  #[test]
  fn preserve_unmasked_restores_outside_pixels() {
    let original = RgbaImage::from_pixel(3, 1, Rgba([9, 9, 9, 255]));
    let mut result = RgbaImage::from_pixel(3, 1, Rgba([0, 0, 0, 255]));
    let mut mask = GrayImage::new(3, 1);
    mask.put_pixel(1, 0, Luma([255]));

    preserve_unmasked(&mut result, &original, &mask);
    assert_eq!(result.get_pixel(0, 0).0, [9, 9, 9, 255]);
    assert_eq!(result.get_pixel(1, 0).0, [0, 0, 0, 255]);
  }
}
