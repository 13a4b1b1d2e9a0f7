// 该文件是 Fukidashi （对白框） 项目的一部分。
// src/mask.rs - 笔刷掩码栅格化
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

//! 掩码约定：库内部的掩码一律为 [`MaskPolarity::EditHigh`]，255 表示需要重绘的像素。
//! 只有送入修复模型的掩码张量会按模型配置转换极性，转换只发生在
//! [`to_model_mask`] 一处。

use image::{DynamicImage, GrayImage, Luma};
use imageproc::drawing::draw_filled_circle_mut;
use serde::{Deserialize, Serialize};

use crate::planner::EditStroke;

/// 二值化阈值，严格大于该值视为前景
pub const MASK_THRESHOLD: u8 = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaskPolarity {
  /// 255 表示编辑区域
  #[default]
  EditHigh,
  /// 255 表示保留区域
  PreserveHigh,
}

/// 一次笔刷操作：指针路径、基础笔宽和当时的缩放倍数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrushStroke {
  pub points: Vec<(f32, f32)>,
  pub base_width: f32,
  #[serde(default = "default_zoom")]
  pub zoom: f32,
}

fn default_zoom() -> f32 {
  1.0
}

impl BrushStroke {
  pub fn radius(&self) -> f32 {
    let zoom = if self.zoom > 0.0 { self.zoom } else { 1.0 };
    self.base_width / zoom / 2.0
  }

  /// 沿路径生成所有圆形印章的中心
  pub fn stamps(&self) -> Vec<(f32, f32)> {
    let mut stamps = Vec::new();
    let Some(&first) = self.points.first() else {
      return stamps;
    };
    stamps.push(first);

    let step = (self.radius() / 2.0).max(1.0);
    for pair in self.points.windows(2) {
      let (prev, curr) = (pair[0], pair[1]);
      let dist = ((curr.0 - prev.0).powi(2) + (curr.1 - prev.1).powi(2)).sqrt();
      let steps = (dist / step).floor() as usize;
      for j in 1..=steps {
        let t = j as f32 / (steps + 1) as f32;
        stamps.push((
          prev.0 + (curr.0 - prev.0) * t,
          prev.1 + (curr.1 - prev.1) * t,
        ));
      }
      stamps.push(curr);
    }
    stamps
  }

  /// 所有印章外扩半径后的外包框；空路径返回 `None`
  pub fn bounds(&self) -> Option<EditStroke> {
    let radius = self.radius();
    let stamps = self.stamps();
    if stamps.is_empty() {
      return None;
    }

    let (mut min_x, mut min_y) = (f32::INFINITY, f32::INFINITY);
    let (mut max_x, mut max_y) = (f32::NEG_INFINITY, f32::NEG_INFINITY);
    for (x, y) in stamps {
      min_x = min_x.min(x - radius);
      min_y = min_y.min(y - radius);
      max_x = max_x.max(x + radius);
      max_y = max_y.max(y + radius);
    }
    let (width, height) = (max_x - min_x, max_y - min_y);
    if width <= 0.0 || height <= 0.0 {
      return None;
    }
    Some(EditStroke::new(min_x, min_y, width, height))
  }
}

/// 把笔刷操作栅格化为与原图同尺寸的二值掩码
pub fn rasterize(strokes: &[BrushStroke], width: u32, height: u32, polarity: MaskPolarity) -> GrayImage {
  let mut mask = GrayImage::new(width, height);

  // 同一缓冲区内重复绘制 255 即为按位或
  for stroke in strokes {
    let radius = stroke.radius().round().max(0.0) as i32;
    for (x, y) in stroke.stamps() {
      draw_filled_circle_mut(
        &mut mask,
        (x.round() as i32, y.round() as i32),
        radius,
        Luma([255u8]),
      );
    }
  }

  binarize(&mut mask);
  to_model_mask(mask, MaskPolarity::EditHigh, polarity)
}

/// 每个笔刷操作的外包框，供分块规划使用
pub fn stroke_bounds(strokes: &[BrushStroke]) -> Vec<EditStroke> {
  strokes.iter().filter_map(BrushStroke::bounds).collect()
}

pub fn binarize(mask: &mut GrayImage) {
  for pixel in mask.pixels_mut() {
    pixel.0[0] = if pixel.0[0] > MASK_THRESHOLD { 255 } else { 0 };
  }
}

/// 从掩码图像读取编辑区域，RGB 均值大于阈值的像素视为编辑
pub fn mask_from_image(image: &DynamicImage) -> GrayImage {
  let rgb = image.to_rgb8();
  GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
    let p = rgb.get_pixel(x, y).0;
    let avg = (p[0] as u16 + p[1] as u16 + p[2] as u16) / 3;
    Luma([if avg > MASK_THRESHOLD as u16 { 255 } else { 0 }])
  })
}

/// 掩码中是否存在编辑像素
pub fn has_edits(mask: &GrayImage) -> bool {
  mask.pixels().any(|p| p.0[0] > MASK_THRESHOLD)
}

/// 按 `cell x cell` 网格切分掩码，每个含编辑像素的格子给出编辑像素的外包框
pub fn mask_regions(mask: &GrayImage, cell: u32) -> Vec<EditStroke> {
  let cell = cell.max(1);
  let mut regions = Vec::new();
  for cy in (0..mask.height()).step_by(cell as usize) {
    for cx in (0..mask.width()).step_by(cell as usize) {
      let mut extent: Option<(u32, u32, u32, u32)> = None;
      for y in cy..(cy + cell).min(mask.height()) {
        for x in cx..(cx + cell).min(mask.width()) {
          if mask.get_pixel(x, y).0[0] <= MASK_THRESHOLD {
            continue;
          }
          extent = Some(match extent {
            None => (x, y, x, y),
            Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
          });
        }
      }
      if let Some((x0, y0, x1, y1)) = extent {
        regions.push(EditStroke::new(
          x0 as f32,
          y0 as f32,
          (x1 - x0 + 1) as f32,
          (y1 - y0 + 1) as f32,
        ));
      }
    }
  }
  regions
}

/// 掩码极性转换
pub fn to_model_mask(mut mask: GrayImage, from: MaskPolarity, to: MaskPolarity) -> GrayImage {
  if from != to {
    for pixel in mask.pixels_mut() {
      pixel.0[0] = 255 - pixel.0[0];
    }
  }
  mask
}
