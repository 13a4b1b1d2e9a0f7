// 该文件是 Fukidashi （对白框） 项目的一部分。
// src/planner.rs - 编辑区域分块规划
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

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::geometry::{Rect, ScaleTransform};

/// 默认分块边长
pub const DEFAULT_TILE_SIZE: u32 = 512;

/// 一次手绘标记的外包框，单位为原图像素
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EditStroke {
  pub x: f32,
  pub y: f32,
  pub width: f32,
  pub height: f32,
}

impl EditStroke {
  pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
    EditStroke {
      x,
      y,
      width,
      height,
    }
  }

  pub fn bounds(&self) -> Rect {
    Rect::new(self.x, self.y, self.width, self.height)
  }
}

/// 一次推理调用的固定尺寸区域
#[derive(Debug, Clone, PartialEq)]
pub struct Tile {
  pub bounds: Rect,
  pub strokes: Vec<EditStroke>,
}

/// 与画布一致的四舍五入：0.5 总是向正无穷进位
pub(crate) fn round_half_up(v: f32) -> f32 {
  (v + 0.5).floor()
}

/// 把原图坐标中的标记映射到填充画布坐标，结果取整
pub fn scale_strokes(strokes: &[EditStroke], transform: &ScaleTransform) -> Vec<EditStroke> {
  strokes
    .iter()
    .map(|s| EditStroke {
      x: round_half_up(s.x * transform.scale_x + transform.x_offset),
      y: round_half_up(s.y * transform.scale_y + transform.y_offset),
      width: round_half_up(s.width * transform.scale_x),
      height: round_half_up(s.height * transform.scale_y),
    })
    .collect()
}

/// 把单轴上的分块原点限制在 `[0, dimension - target]`，并给出该轴的分块长度
fn place_axis(center: f32, dimension: u32, target: u32) -> (f32, f32) {
  let dimension = dimension as f32;
  let target = target as f32;
  let origin = round_half_up(center - target / 2.0)
    .min(dimension - target)
    .max(0.0);
  let extent = target.min(dimension - origin).max(0.0);
  (origin, extent)
}

/// 沿单轴按 `target` 步长切分区间，返回各段的 (起点, 长度)
fn split_axis(start: f32, extent: f32, target: f32) -> Vec<(f32, f32)> {
  if extent <= target {
    return vec![(start, extent)];
  }
  let end = start + extent;
  let mut pieces = Vec::new();
  let mut offset = start;
  while offset < end {
    pieces.push((offset, target.min(end - offset)));
    offset += target;
  }
  pieces
}

/// 把超出分块尺寸的标记切成不大于 `target x target` 的若干段
///
/// 各段互不重叠且恰好拼成原标记，未超出的标记原样保留。
pub fn split_oversized(strokes: &[EditStroke], target_size: u32) -> Vec<EditStroke> {
  let target = target_size.max(1) as f32;
  let mut pieces = Vec::with_capacity(strokes.len());
  for stroke in strokes {
    let columns = split_axis(stroke.x, stroke.width, target);
    let rows = split_axis(stroke.y, stroke.height, target);
    for &(y, height) in &rows {
      for &(x, width) in &columns {
        pieces.push(EditStroke::new(x, y, width, height));
      }
    }
  }
  pieces
}

/// 贪心地把标记分组为若干 `target x target` 的分块
///
/// 超出分块尺寸的标记先由 [`split_oversized`] 切段。
/// 按输入顺序遍历标记：未分组的标记开启一个新分组，
/// 随后扫描其后所有未分组标记，合并后外包框仍能放入分块的即并入。
/// 分块以分组中心为中心放置，再限制在图像范围内。
/// 复杂度为 O(n²)，分块之间允许重叠，每段标记恰好属于一个分块。
pub fn plan_tiles(
  strokes: &[EditStroke],
  image_width: u32,
  image_height: u32,
  target_size: u32,
) -> Vec<Tile> {
  let target = target_size.max(1);
  let pieces = split_oversized(strokes, target);
  if pieces.len() > strokes.len() {
    debug!("{} 个标记超出分块尺寸, 切分为 {} 段", strokes.len(), pieces.len());
  }
  let strokes = pieces.as_slice();
  let mut used = vec![false; strokes.len()];
  let mut tiles = Vec::new();

  for (index, stroke) in strokes.iter().enumerate() {
    if used[index] {
      continue;
    }
    used[index] = true;

    let mut group_bounds = stroke.bounds();
    let mut group = vec![*stroke];

    for (j, other) in strokes.iter().enumerate().skip(index + 1) {
      if used[j] {
        continue;
      }
      let combined = group_bounds.union(&other.bounds());
      if combined.width <= target as f32 && combined.height <= target as f32 {
        group_bounds = combined;
        group.push(*other);
        used[j] = true;
      }
    }

    let (center_x, center_y) = group_bounds.center();
    let (x, width) = place_axis(center_x, image_width, target);
    let (y, height) = place_axis(center_y, image_height, target);

    tiles.push(Tile {
      bounds: Rect::new(x, y, width, height),
      strokes: group,
    });
  }

  debug!("{} 个标记规划为 {} 个分块", strokes.len(), tiles.len());
  tiles
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::geometry::compute_scale_transform;
  use rand::{Rng, SeedableRng, rngs::StdRng};

  #[test]
  fn nearby_strokes_share_one_tile() {
    let strokes = [
      EditStroke::new(100.0, 100.0, 20.0, 20.0),
      EditStroke::new(300.0, 200.0, 30.0, 10.0),
      EditStroke::new(1500.0, 1500.0, 40.0, 40.0),
    ];
    let tiles = plan_tiles(&strokes, 2000, 2000, 512);

    assert_eq!(tiles.len(), 2);
    assert_eq!(tiles[0].strokes.len(), 2);
    assert_eq!(tiles[1].strokes, vec![strokes[2]]);
  }

  #[test]
  fn tile_is_clamped_to_image_edges() {
    let strokes = [EditStroke::new(0.0, 990.0, 10.0, 10.0)];
    let tiles = plan_tiles(&strokes, 1000, 1000, 512);
    assert_eq!(tiles[0].bounds, Rect::new(0.0, 488.0, 512.0, 512.0));
  }

  #[test]
  fn small_image_is_covered_from_origin() {
    let strokes = [EditStroke::new(50.0, 20.0, 10.0, 10.0)];
    let tiles = plan_tiles(&strokes, 300, 200, 512);
    assert_eq!(tiles[0].bounds, Rect::new(0.0, 0.0, 300.0, 200.0));
  }

  #[test]
  fn wide_page_single_stroke_covers_padded_canvas() {
    let transform = compute_scale_transform(2000, 800, 1024);
    let scaled = scale_strokes(&[EditStroke::new(1000.0, 400.0, 50.0, 50.0)], &transform);
    let tiles = plan_tiles(&scaled, 1024, 1024, 1024);

    assert_eq!(tiles.len(), 1);
    assert_eq!(tiles[0].bounds, Rect::new(0.0, 0.0, 1024.0, 1024.0));
  }

  #[test]
  fn strokes_wider_than_a_tile_are_split_and_covered() {
    let stroke = EditStroke::new(10.0, 10.0, 300.0, 20.0);
    let tiles = plan_tiles(&[stroke], 1024, 1024, 128);

    assert_eq!(tiles.len(), 3);
    let widths: Vec<f32> = tiles.iter().flat_map(|t| &t.strokes).map(|s| s.width).collect();
    assert_eq!(widths, [128.0, 128.0, 44.0]);
    for tile in &tiles {
      for piece in &tile.strokes {
        assert!(tile.bounds.contains(&piece.bounds()), "{:?} 不包含 {:?}", tile.bounds, piece);
      }
    }
  }

  #[test]
  fn split_pieces_tile_the_original_stroke() {
    let stroke = EditStroke::new(5.0, 7.0, 250.0, 130.0);
    let pieces = split_oversized(&[stroke], 100);

    assert_eq!(pieces.len(), 6);
    let area: f32 = pieces.iter().map(|p| p.width * p.height).sum();
    assert_eq!(area, stroke.width * stroke.height);
    assert!(pieces.iter().all(|p| stroke.bounds().contains(&p.bounds())));
    assert!(pieces.iter().all(|p| p.width <= 100.0 && p.height <= 100.0));
  }

  #[test]
  fn every_stroke_is_covered_and_tiles_stay_in_bounds() {
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..200 {
      let width = rng.random_range(64..3000u32);
      let height = rng.random_range(64..3000u32);
      let target = rng.random_range(32..1024u32);
      let count = rng.random_range(0..30usize);

      let strokes: Vec<EditStroke> = (0..count)
        .map(|_| {
          let w = rng.random_range(1..=width) as f32;
          let h = rng.random_range(1..=height) as f32;
          let x = rng.random_range(0..=(width - w as u32)) as f32;
          let y = rng.random_range(0..=(height - h as u32)) as f32;
          EditStroke::new(x, y, w, h)
        })
        .collect();

      let tiles = plan_tiles(&strokes, width, height, target);
      let assigned: usize = tiles.iter().map(|t| t.strokes.len()).sum();
      assert_eq!(assigned, split_oversized(&strokes, target).len());

      for tile in &tiles {
        let b = tile.bounds;
        assert!(b.x >= 0.0 && b.y >= 0.0);
        assert!(b.right() <= width as f32 && b.bottom() <= height as f32);
        assert!(b.width <= target as f32 && b.height <= target as f32);
        for stroke in &tile.strokes {
          assert!(b.contains(&stroke.bounds()), "{:?} 不包含 {:?}", b, stroke);
        }
      }

      // 每个标记的各段都落在某个分块内，且各段面积之和等于原标记
      for stroke in &strokes {
        let pieces = split_oversized(&[*stroke], target);
        let area: f32 = pieces.iter().map(|p| p.width * p.height).sum();
        assert_eq!(area, stroke.width * stroke.height);
        for piece in &pieces {
          assert!(
            tiles.iter().any(|t| t.bounds.contains(&piece.bounds())),
            "{:?} 的分段 {:?} 没有被覆盖",
            stroke,
            piece
          );
        }
      }
    }
  }
}
