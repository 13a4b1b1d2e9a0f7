// 该文件是 Fukidashi （对白框） 项目的一部分。
// src/model/detect.rs - 对白框与文字检测
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use image::{RgbaImage, imageops};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
  frame::BgrNchwF32Frame,
  model::{BalloonKind, DetectItem, DetectResult, Model, WithLabel},
  session::{InferenceSession, SessionError, output_at, positional_inputs},
  tensor::NamedTensors,
};

pub const DETECT_INPUT_WIDTH: u32 = 576;
pub const DETECT_INPUT_HEIGHT: u32 = 832;
pub const CONF_THRESHOLD: f32 = 0.5;
pub const NMS_THRESHOLD: f32 = 0.45;

/// 像素坐标的检测框，`bbox` 为 `[x1, y1, x2, y2]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
  pub bbox: [f32; 4],
  pub score: f32,
  pub class_id: u32,
}

/// 相对原图归一化的中心格式检测框，`bbox` 为 `[xc, yc, w, h]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedDetection {
  pub class: u32,
  pub confidence: f32,
  pub bbox: [f32; 4],
}

/// 把模型输出解码为输入尺寸下的像素框，丢弃最高类别分数低于阈值的框
pub fn postprocess_with_threshold(
  boxes: &[f32],
  scores: &[f32],
  input_width: u32,
  input_height: u32,
  threshold: f32,
) -> Vec<Detection> {
  let num_boxes = boxes.len() / 4;
  if num_boxes == 0 {
    return Vec::new();
  }
  let num_classes = scores.len() / num_boxes;
  if num_classes == 0 {
    return Vec::new();
  }

  let (w, h) = (input_width as f32, input_height as f32);
  let mut detections = Vec::new();
  for (i, (bbox, class_scores)) in boxes
    .chunks_exact(4)
    .zip(scores.chunks_exact(num_classes))
    .enumerate()
  {
    let mut class_id = 0usize;
    let mut best = class_scores[0];
    for (c, &score) in class_scores.iter().enumerate().skip(1) {
      if score > best {
        best = score;
        class_id = c;
      }
    }
    if best.is_nan() || best < threshold {
      continue;
    }
    debug!("候选框 {}: 类别 {}, 分数 {:.3}", i, class_id, best);
    detections.push(Detection {
      bbox: [bbox[0] * w, bbox[1] * h, bbox[2] * w, bbox[3] * h],
      score: best,
      class_id: class_id as u32,
    });
  }
  detections
}

pub fn postprocess(
  boxes: &[f32],
  scores: &[f32],
  input_width: u32,
  input_height: u32,
) -> Vec<Detection> {
  postprocess_with_threshold(boxes, scores, input_width, input_height, CONF_THRESHOLD)
}

pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let x1 = a[0].max(b[0]);
  let y1 = a[1].max(b[1]);
  let x2 = a[2].min(b[2]);
  let y2 = a[3].min(b[3]);
  let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
  let area_a = (a[2] - a[0]) * (a[3] - a[1]);
  let area_b = (b[2] - b[0]) * (b[3] - b[1]);
  inter / (area_a + area_b - inter + 1e-6)
}

/// 非极大值抑制，分数相同的框保持输入顺序
pub fn nms(mut detections: Vec<Detection>, threshold: f32) -> Vec<Detection> {
  detections.sort_by(|a, b| b.score.total_cmp(&a.score));

  let mut keep: Vec<Detection> = Vec::with_capacity(detections.len());
  let mut remaining = detections;
  while !remaining.is_empty() {
    let best = remaining.remove(0);
    remaining.retain(|d| iou(&best.bbox, &d.bbox) <= threshold);
    keep.push(best);
  }
  keep
}

/// 把模型输入尺寸下的框映射回原图尺寸
pub fn rescale(
  detections: &mut [Detection],
  original_width: u32,
  original_height: u32,
  input_width: u32,
  input_height: u32,
) {
  let sx = original_width as f32 / input_width as f32;
  let sy = original_height as f32 / input_height as f32;
  for d in detections {
    d.bbox[0] *= sx;
    d.bbox[1] *= sy;
    d.bbox[2] *= sx;
    d.bbox[3] *= sy;
  }
}

pub fn normalize(detections: &[Detection], width: u32, height: u32) -> Vec<NormalizedDetection> {
  let (w, h) = (width as f32, height as f32);
  detections
    .iter()
    .map(|d| {
      let [x1, y1, x2, y2] = d.bbox;
      NormalizedDetection {
        class: d.class_id,
        confidence: d.score,
        bbox: [
          (x1 + x2) / 2.0 / w,
          (y1 + y2) / 2.0 / h,
          (x2 - x1) / w,
          (y2 - y1) / h,
        ],
      }
    })
    .collect()
}

/// 检测模型的种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
  Globes,
  Text,
}

impl DetectorKind {
  pub fn name(&self) -> &'static str {
    match self {
      DetectorKind::Globes => "globes",
      DetectorKind::Text => "text",
    }
  }

  pub fn kind_of(&self, class_id: u32) -> BalloonKind {
    match self {
      DetectorKind::Globes => BalloonKind::from_label_id(class_id),
      DetectorKind::Text => BalloonKind::Text,
    }
  }
}

#[derive(Debug, Clone, Copy)]
pub struct Detector {
  kind: DetectorKind,
  input_width: u32,
  input_height: u32,
  conf_threshold: f32,
  nms_threshold: f32,
}

impl Detector {
  pub fn new(kind: DetectorKind) -> Self {
    Detector {
      kind,
      input_width: DETECT_INPUT_WIDTH,
      input_height: DETECT_INPUT_HEIGHT,
      conf_threshold: CONF_THRESHOLD,
      nms_threshold: NMS_THRESHOLD,
    }
  }

  pub fn input_size(mut self, width: u32, height: u32) -> Self {
    self.input_width = width.max(1);
    self.input_height = height.max(1);
    self
  }

  pub fn thresholds(mut self, conf: f32, nms: f32) -> Self {
    self.conf_threshold = conf;
    self.nms_threshold = nms;
    self
  }

  pub fn kind(&self) -> DetectorKind {
    self.kind
  }
}

impl Model for Detector {
  type Input = RgbaImage;
  type Output = Vec<NormalizedDetection>;

  fn preprocess(
    &self,
    session: &dyn InferenceSession,
    input: &RgbaImage,
  ) -> Result<NamedTensors, SessionError> {
    if input.width() == 0 || input.height() == 0 {
      return Err(SessionError::Shape(format!(
        "图像尺寸为 {}x{}",
        input.width(),
        input.height()
      )));
    }
    let resized = imageops::resize(
      input,
      self.input_width,
      self.input_height,
      imageops::FilterType::Triangle,
    );
    let tensor = BgrNchwF32Frame::from(&resized).into_tensor();
    positional_inputs(session, vec![tensor])
  }

  fn postprocess(
    &self,
    input: &RgbaImage,
    outputs: &NamedTensors,
  ) -> Result<Self::Output, SessionError> {
    let boxes = output_at(outputs, 0)?
      .as_f32()
      .ok_or_else(|| SessionError::UnsupportedType("检测框输出应为 float32".into()))?;
    let scores = output_at(outputs, 1)?
      .as_f32()
      .ok_or_else(|| SessionError::UnsupportedType("分数输出应为 float32".into()))?;
    if boxes.len() % 4 != 0 {
      return Err(SessionError::Shape(format!("检测框输出长度 {}", boxes.len())));
    }

    let candidates = postprocess_with_threshold(
      boxes,
      scores,
      self.input_width,
      self.input_height,
      self.conf_threshold,
    );
    let mut kept = nms(candidates, self.nms_threshold);
    rescale(
      &mut kept,
      input.width(),
      input.height(),
      self.input_width,
      self.input_height,
    );
    debug!("{} 模型检测到 {} 个目标", self.kind.name(), kept.len());
    Ok(normalize(&kept, input.width(), input.height()))
  }
}

/// 一页图像上两个检测模型的合并结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageDetections {
  pub filename: String,
  pub globes: Vec<NormalizedDetection>,
  pub text: Vec<NormalizedDetection>,
}

impl PageDetections {
  /// 转为带类别的检测结果，`bbox` 为归一化的 `[x_min, y_min, x_max, y_max]`
  pub fn result(&self) -> DetectResult<BalloonKind> {
    let labelled = self
      .globes
      .iter()
      .map(|d| (DetectorKind::Globes, d))
      .chain(self.text.iter().map(|d| (DetectorKind::Text, d)));

    let items = labelled
      .map(|(kind, d)| {
        let [xc, yc, bw, bh] = d.bbox;
        DetectItem {
          kind: kind.kind_of(d.class),
          score: d.confidence,
          bbox: [xc - bw / 2.0, yc - bh / 2.0, xc + bw / 2.0, yc + bh / 2.0],
        }
      })
      .collect();
    DetectResult { items }
  }
}

/// 按文件名合并两个模型的结果，顺序以对白框结果为准，只出现在文字结果中的页追加在后
pub fn combine_detections(
  globes: Vec<(String, Vec<NormalizedDetection>)>,
  text: Vec<(String, Vec<NormalizedDetection>)>,
) -> Vec<PageDetections> {
  let mut pages: Vec<PageDetections> = globes
    .into_iter()
    .map(|(filename, globes)| PageDetections {
      filename,
      globes,
      text: Vec::new(),
    })
    .collect();

  for (filename, detections) in text {
    match pages.iter_mut().find(|p| p.filename == filename) {
      Some(page) => page.text.extend(detections),
      None => pages.push(PageDetections {
        filename,
        globes: Vec::new(),
        text: detections,
      }),
    }
  }
  pages
}
