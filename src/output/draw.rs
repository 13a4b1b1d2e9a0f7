// 该文件是 Fukidashi （对白框） 项目的一部分。
// src/output/draw.rs - 检测结果预览
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use image::{Rgba, RgbaImage};
use imageproc::{drawing::draw_hollow_rect_mut, rect::Rect};

use crate::model::{DetectItem, DetectResult, WithLabel};

const BOX_THICKNESS: u32 = 2;
const TEXT_COLOR: [u8; 4] = [255, 0, 0, 255]; // 红色
const GLOBE_COLOR: [u8; 4] = [0, 0, 255, 255]; // 蓝色

/// 在页面上描出检测框，不绘制文字
pub struct Draw {
  thickness: u32,
  globe_color: [u8; 4],
  text_color: [u8; 4],
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      thickness: BOX_THICKNESS,
      globe_color: GLOBE_COLOR,
      text_color: TEXT_COLOR,
    }
  }
}

impl Draw {
  pub fn thickness(mut self, thickness: u32) -> Self {
    self.thickness = thickness.max(1);
    self
  }

  fn color_of<T: WithLabel>(&self, kind: &T) -> Rgba<u8> {
    if kind.to_label_str() == "text" {
      Rgba(self.text_color)
    } else {
      Rgba(self.globe_color)
    }
  }

  // bbox 为归一化坐标 [x_min, y_min, x_max, y_max]
  fn draw_bbox<T: WithLabel>(&self, image: &mut RgbaImage, item: &DetectItem<T>) {
    let (w, h) = (image.width() as f32, image.height() as f32);
    if w < 1.0 || h < 1.0 {
      return;
    }

    let x_min = ((item.bbox[0] * w).floor() as i32).clamp(0, w as i32 - 1);
    let y_min = ((item.bbox[1] * h).floor() as i32).clamp(0, h as i32 - 1);
    let x_max = ((item.bbox[2] * w).ceil() as i32).clamp(0, w as i32 - 1);
    let y_max = ((item.bbox[3] * h).ceil() as i32).clamp(0, h as i32 - 1);

    let color = self.color_of(&item.kind);
    for t in 0..self.thickness as i32 {
      let (w, h) = (x_max - x_min - 2 * t, y_max - y_min - 2 * t);
      if w <= 0 || h <= 0 {
        break;
      }
      let rect = Rect::at(x_min + t, y_min + t).of_size(w as u32 + 1, h as u32 + 1);
      draw_hollow_rect_mut(image, rect, color);
    }
  }

  pub fn draw_detections<T: WithLabel>(&self, image: &RgbaImage, result: &DetectResult<T>) -> RgbaImage {
    let mut image = image.clone();
    for item in result.items.iter() {
      self.draw_bbox(&mut image, item);
    }
    image
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::BalloonKind;

  #[test]
  fn boxes_are_outlined_inside_the_page() {
    let image = RgbaImage::from_pixel(20, 20, Rgba([255, 255, 255, 255]));
    let result = DetectResult {
      items: vec![
        DetectItem {
          kind: BalloonKind::Normal,
          score: 0.9,
          bbox: [0.25, 0.25, 0.75, 0.75],
        },
        DetectItem {
          kind: BalloonKind::Text,
          score: 0.8,
          bbox: [-1.0, 0.9, 2.0, 3.0],
        },
      ]
      .into_boxed_slice(),
    };

    let drawn = Draw::default().draw_detections(&image, &result);
    assert_eq!(drawn.get_pixel(5, 5), &Rgba(GLOBE_COLOR));
    assert_eq!(drawn.get_pixel(15, 10), &Rgba(GLOBE_COLOR));
    assert_eq!(drawn.get_pixel(10, 10), &Rgba([255, 255, 255, 255]));
    assert_eq!(drawn.get_pixel(0, 19), &Rgba(TEXT_COLOR));
  }
}
