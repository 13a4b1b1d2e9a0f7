// 该文件是 Fukidashi （对白框） 项目的一部分。
// src/geometry.rs - 坐标变换与带填充缩放
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

use image::{ImageBuffer, Pixel, imageops};
use serde::{Deserialize, Serialize};

/// 工作画布的最大边长
pub const MAX_WORKING_SIZE: u32 = 4096;

/// 轴对齐矩形，坐标单位为像素
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
  pub x: f32,
  pub y: f32,
  pub width: f32,
  pub height: f32,
}

impl Rect {
  pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
    Rect {
      x,
      y,
      width,
      height,
    }
  }

  pub fn right(&self) -> f32 {
    self.x + self.width
  }

  pub fn bottom(&self) -> f32 {
    self.y + self.height
  }

  pub fn center(&self) -> (f32, f32) {
    (self.x + self.width / 2.0, self.y + self.height / 2.0)
  }

  pub fn contains(&self, other: &Rect) -> bool {
    other.x >= self.x
      && other.y >= self.y
      && other.right() <= self.right()
      && other.bottom() <= self.bottom()
  }

  /// 合并两个矩形的外包框，原点不小于 0，宽高至少为 1
  pub fn union(&self, other: &Rect) -> Rect {
    let x_min = self.x.min(other.x).max(0.0);
    let y_min = self.y.min(other.y).max(0.0);
    let x_max = self.right().max(other.right());
    let y_max = self.bottom().max(other.bottom());
    Rect {
      x: x_min,
      y: y_min,
      width: (x_max - x_min).max(1.0),
      height: (y_max - y_min).max(1.0),
    }
  }
}

/// 原图坐标与填充后正方形画布坐标之间的映射
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScaleTransform {
  pub scale_x: f32,
  pub scale_y: f32,
  pub x_offset: f32,
  pub y_offset: f32,
}

impl Default for ScaleTransform {
  fn default() -> Self {
    ScaleTransform {
      scale_x: 1.0,
      scale_y: 1.0,
      x_offset: 0.0,
      y_offset: 0.0,
    }
  }
}

impl ScaleTransform {
  pub fn forward_point(&self, x: f32, y: f32) -> (f32, f32) {
    (
      x * self.scale_x + self.x_offset,
      y * self.scale_y + self.y_offset,
    )
  }

  pub fn inverse_point(&self, x: f32, y: f32) -> (f32, f32) {
    (
      (x - self.x_offset) / self.scale_x,
      (y - self.y_offset) / self.scale_y,
    )
  }

  pub fn forward_rect(&self, rect: &Rect) -> Rect {
    let (x, y) = self.forward_point(rect.x, rect.y);
    Rect {
      x,
      y,
      width: rect.width * self.scale_x,
      height: rect.height * self.scale_y,
    }
  }

  pub fn inverse_rect(&self, rect: &Rect) -> Rect {
    let (x, y) = self.inverse_point(rect.x, rect.y);
    Rect {
      x,
      y,
      width: rect.width / self.scale_x,
      height: rect.height / self.scale_y,
    }
  }

  /// 缩放后图像在画布上的尺寸
  pub fn scaled_size(&self, width: u32, height: u32) -> (u32, u32) {
    (
      ((width as f32 * self.scale_x).round() as u32).max(1),
      ((height as f32 * self.scale_y).round() as u32).max(1),
    )
  }
}

/// 计算将 `width x height` 的图像等比缩放并居中到 `target x target` 画布的变换
pub fn compute_scale_transform(width: u32, height: u32, target_size: u32) -> ScaleTransform {
  let target = target_size.clamp(1, MAX_WORKING_SIZE) as f32;
  let longer = width.max(height).max(1) as f32;
  let scale = target / longer;

  ScaleTransform {
    scale_x: scale,
    scale_y: scale,
    x_offset: (target - width as f32 * scale) / 2.0,
    y_offset: (target - height as f32 * scale) / 2.0,
  }
}

/// 按变换缩放图像，并居中放置在以 `fill` 填充的 `target x target` 画布上
pub fn resize_with_padding<P>(
  image: &ImageBuffer<P, Vec<P::Subpixel>>,
  transform: &ScaleTransform,
  target_size: u32,
  fill: P,
) -> ImageBuffer<P, Vec<P::Subpixel>>
where
  P: Pixel + 'static,
{
  let (scaled_w, scaled_h) = transform.scaled_size(image.width(), image.height());
  let resized = imageops::resize(image, scaled_w, scaled_h, imageops::FilterType::Triangle);

  let mut canvas = ImageBuffer::from_pixel(target_size, target_size, fill);
  imageops::overlay(
    &mut canvas,
    &resized,
    transform.x_offset.round() as i64,
    transform.y_offset.round() as i64,
  );
  canvas
}
