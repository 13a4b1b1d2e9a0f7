// 该文件是 Fukidashi （对白框） 项目的一部分。
// src/task.rs - 检测与修复任务
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

use std::{sync::Arc, time::Duration};

use image::{GrayImage, Luma, Rgba, RgbaImage, imageops};
use tracing::{debug, info, warn};

use crate::{
  PipelineError, ValidationError,
  compositor::{TileResult, preserve_unmasked, stitch},
  config::PipelineConfig,
  fragment::ModelBuffer,
  geometry::{MAX_WORKING_SIZE, compute_scale_transform, resize_with_padding},
  mask::{BrushStroke, MaskPolarity, binarize, has_edits, mask_regions, rasterize, stroke_bounds},
  model::{
    Detector, DetectorKind, InpaintTile, Inpainter, Model, NormalizedDetection, PageDetections,
    combine_detections,
  },
  planner::{EditStroke, plan_tiles, scale_strokes},
  session::SessionFactory,
  worker::{Batch, BatchProgress, Orchestrator, WorkItem, WorkerSession, split_halves},
};

/// 待检测的一页图像
#[derive(Debug, Clone)]
pub struct Page {
  pub filename: String,
  pub image: RgbaImage,
}

fn validate_page(filename: &str, image: &RgbaImage) -> Result<(), ValidationError> {
  if filename.is_empty() {
    return Err(ValidationError::MissingFilename);
  }
  if image.width() == 0 || image.height() == 0 {
    return Err(ValidationError::InvalidImageSize {
      width: image.width(),
      height: image.height(),
    });
  }
  Ok(())
}

/// 在四个工作线程上运行对白框与文字检测
///
/// 页面在 `ceil(n / 2)` 处分为两半，每一半分别交给两个模型。
pub struct DetectionTask {
  orchestrator: Orchestrator,
  globes: Detector,
  text: Detector,
}

impl DetectionTask {
  pub fn new(factory: Arc<dyn SessionFactory>, config: &PipelineConfig) -> Self {
    DetectionTask {
      orchestrator: Orchestrator::new(factory).with_timeout(config.worker_timeout()),
      globes: config.detection.detector(DetectorKind::Globes),
      text: config.detection.detector(DetectorKind::Text),
    }
  }

  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.orchestrator = self.orchestrator.with_timeout(timeout);
    self
  }

  pub fn run<P>(
    &self,
    pages: &[Page],
    globes_model: ModelBuffer,
    text_model: ModelBuffer,
    on_progress: P,
  ) -> Result<Vec<PageDetections>, PipelineError>
  where
    P: FnMut(&BatchProgress),
  {
    if pages.is_empty() {
      return Err(ValidationError::EmptyBatch.into());
    }
    for page in pages {
      validate_page(&page.filename, &page.image)?;
    }

    let total = pages.len();
    let items: Vec<WorkItem<Arc<RgbaImage>>> = pages
      .iter()
      .enumerate()
      .map(|(index, page)| WorkItem {
        index,
        name: page.filename.clone(),
        payload: Arc::new(page.image.clone()),
      })
      .collect();
    let (first, second) = split_halves(items);
    let mid = first.len();

    let tagged = |kind: DetectorKind, items: &[WorkItem<Arc<RgbaImage>>]| {
      items
        .iter()
        .map(|item| WorkItem {
          index: item.index,
          name: item.name.clone(),
          payload: (kind, item.payload.clone()),
        })
        .collect::<Vec<_>>()
    };

    let mut batches = vec![
      Batch {
        worker_id: "globes1".to_string(),
        model: globes_model.clone(),
        start_index: 0,
        items: tagged(DetectorKind::Globes, &first),
      },
      Batch {
        worker_id: "text1".to_string(),
        model: text_model.clone(),
        start_index: 0,
        items: tagged(DetectorKind::Text, &first),
      },
    ];
    if !second.is_empty() {
      batches.push(Batch {
        worker_id: "globes2".to_string(),
        model: globes_model,
        start_index: mid,
        items: tagged(DetectorKind::Globes, &second),
      });
      batches.push(Batch {
        worker_id: "text2".to_string(),
        model: text_model,
        start_index: mid,
        items: tagged(DetectorKind::Text, &second),
      });
    }

    let (globes, text) = (self.globes, self.text);
    info!("检测 {} 页图像, 使用 {} 个工作线程", total, batches.len());
    let results = self.orchestrator.dispatch(
      batches,
      total,
      move |session, (kind, image): (DetectorKind, Arc<RgbaImage>)| {
        let detector = match kind {
          DetectorKind::Globes => &globes,
          DetectorKind::Text => &text,
        };
        detector.infer(session, &image).map(|d| (kind, d))
      },
      on_progress,
    )?;

    let mut by_kind: [Vec<(String, Vec<NormalizedDetection>)>; 2] = [Vec::new(), Vec::new()];
    for (index, (kind, detections)) in results {
      let slot = match kind {
        DetectorKind::Globes => 0,
        DetectorKind::Text => 1,
      };
      by_kind[slot].push((pages[index].filename.clone(), detections));
    }
    let [globes, text] = by_kind;
    Ok(combine_detections(globes, text))
  }
}

/// 修复区域的描述
#[derive(Debug, Clone)]
pub enum EditSource {
  Strokes(Vec<BrushStroke>),
  /// 与图像同尺寸的掩码图，亮像素为编辑区域
  Mask(GrayImage),
}

#[derive(Debug, Clone)]
pub struct InpaintRequest {
  pub filename: String,
  pub image: Option<RgbaImage>,
  pub edits: EditSource,
}

#[derive(Debug, Clone)]
pub struct InpaintOutcome {
  pub filename: String,
  pub image: RgbaImage,
  /// 没有编辑区域时原样返回
  pub skipped: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PatchProgress {
  pub completed_patches: usize,
  pub total_patches: usize,
  pub percentage: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageProgress {
  pub filename: String,
  pub completed_images: usize,
  pub total_images: usize,
  pub percentage: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InpaintProgress {
  Patch(PatchProgress),
  Image(ImageProgress),
}

fn percentage(completed: usize, total: usize) -> f32 {
  if total == 0 {
    100.0
  } else {
    (completed as f32 * 100.0 / total as f32).round()
  }
}

/// 网格切分掩码图时的格子边长
const MASK_REGION_CELL: u32 = 64;

/// 按分块对整页图像做修复
///
/// 每页：计算缩放变换并填充到工作画布，规划分块，逐块推理、合成，
/// 最后映射回原图拼接。同一工作线程上的分块严格顺序执行。
pub struct InpaintTask {
  factory: Arc<dyn SessionFactory>,
  inpainter: Inpainter,
  working_size: u32,
  tile_size: u32,
  preserve_unmasked: bool,
  timeout: Duration,
}

impl InpaintTask {
  pub fn new(factory: Arc<dyn SessionFactory>, config: &PipelineConfig) -> Self {
    InpaintTask {
      factory,
      inpainter: config.inpainting.inpainter(),
      working_size: config.inpainting.working_size.clamp(1, MAX_WORKING_SIZE),
      tile_size: config.inpainting.tile_size.clamp(1, MAX_WORKING_SIZE),
      preserve_unmasked: config.inpainting.preserve_unmasked,
      timeout: config.worker_timeout(),
    }
  }

  pub fn run<P>(
    &self,
    requests: Vec<InpaintRequest>,
    model: ModelBuffer,
    mut on_progress: P,
  ) -> Result<Vec<InpaintOutcome>, PipelineError>
  where
    P: FnMut(&InpaintProgress),
  {
    if requests.is_empty() {
      return Err(ValidationError::EmptyBatch.into());
    }
    for request in &requests {
      let Some(image) = &request.image else {
        return Err(ValidationError::MissingImage(request.filename.clone()).into());
      };
      validate_page(&request.filename, image)?;
    }

    let mut worker = WorkerSession::spawn("inpaint", self.factory.clone(), model, self.timeout)?;
    let total_images = requests.len();
    let mut outcomes = Vec::with_capacity(total_images);

    for (i, request) in requests.into_iter().enumerate() {
      let InpaintRequest {
        filename,
        image,
        edits,
      } = request;
      let image = image.ok_or_else(|| ValidationError::MissingImage(filename.clone()))?;

      let outcome = self.inpaint_page(&mut worker, filename, image, edits, &mut on_progress)?;
      on_progress(&InpaintProgress::Image(ImageProgress {
        filename: outcome.filename.clone(),
        completed_images: i + 1,
        total_images,
        percentage: percentage(i + 1, total_images),
      }));
      outcomes.push(outcome);
    }
    Ok(outcomes)
  }

  fn inpaint_page<P>(
    &self,
    worker: &mut WorkerSession,
    filename: String,
    image: RgbaImage,
    edits: EditSource,
    on_progress: &mut P,
  ) -> Result<InpaintOutcome, PipelineError>
  where
    P: FnMut(&InpaintProgress),
  {
    let (width, height) = image.dimensions();
    let (edit_mask, strokes) = match edits {
      EditSource::Strokes(strokes) => (
        rasterize(&strokes, width, height, MaskPolarity::EditHigh),
        stroke_bounds(&strokes),
      ),
      EditSource::Mask(mut mask) => {
        if mask.dimensions() != (width, height) {
          mask = imageops::resize(&mask, width, height, imageops::FilterType::Nearest);
        }
        binarize(&mut mask);
        let regions = mask_regions(&mask, MASK_REGION_CELL);
        (mask, regions)
      }
    };

    if strokes.is_empty() || !has_edits(&edit_mask) {
      warn!("{} 没有编辑区域, 跳过", filename);
      return Ok(InpaintOutcome {
        filename,
        image,
        skipped: true,
      });
    }

    let transform = compute_scale_transform(width, height, self.working_size);
    let canvas = resize_with_padding(&image, &transform, self.working_size, Rgba([255, 255, 255, 255]));
    let mut canvas_mask = resize_with_padding(&edit_mask, &transform, self.working_size, Luma([0]));
    binarize(&mut canvas_mask);

    let scaled: Vec<EditStroke> = scale_strokes(&strokes, &transform);
    let tiles = plan_tiles(&scaled, self.working_size, self.working_size, self.tile_size);
    let total_patches = tiles.len();
    info!("{}: {} 个编辑区域, {} 个分块", filename, strokes.len(), total_patches);

    let mut results = Vec::with_capacity(total_patches);
    for (i, tile) in tiles.iter().enumerate() {
      let (x, y) = (tile.bounds.x as u32, tile.bounds.y as u32);
      let (w, h) = (tile.bounds.width as u32, tile.bounds.height as u32);
      let input = InpaintTile {
        image: imageops::crop_imm(&canvas, x, y, w, h).to_image(),
        mask: imageops::crop_imm(&canvas_mask, x, y, w, h).to_image(),
      };

      let tensors = self.inpainter.preprocess(&*worker, &input)?;
      let outputs = worker.infer(tensors)?;
      let patch = self.inpainter.postprocess(&input, &outputs)?;
      debug!("分块 {} ({}, {}, {}x{}) 完成", i, x, y, w, h);

      results.push(TileResult {
        bounds: tile.bounds,
        image: patch,
      });
      on_progress(&InpaintProgress::Patch(PatchProgress {
        completed_patches: i + 1,
        total_patches,
        percentage: percentage(i + 1, total_patches),
      }));
    }

    let mut stitched = stitch(&results, width, height, &transform, image.clone());
    if self.preserve_unmasked {
      preserve_unmasked(&mut stitched, &image, &edit_mask);
    }

    Ok(InpaintOutcome {
      filename,
      image: stitched,
      skipped: false,
    })
  }
}
