// 该文件是 Fukidashi （对白框） 项目的一部分。
// src/model.rs - 模型
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use serde::{Deserialize, Serialize};

use crate::{
  session::{InferenceSession, SessionError},
  tensor::NamedTensors,
};

/// 模型的前后处理，推理本身交给会话
pub trait Model {
  type Input;
  type Output;

  fn preprocess(
    &self,
    session: &dyn InferenceSession,
    input: &Self::Input,
  ) -> Result<NamedTensors, SessionError>;

  fn postprocess(
    &self,
    input: &Self::Input,
    outputs: &NamedTensors,
  ) -> Result<Self::Output, SessionError>;

  fn infer(
    &self,
    session: &mut dyn InferenceSession,
    input: &Self::Input,
  ) -> Result<Self::Output, SessionError> {
    let inputs = self.preprocess(&*session, input)?;
    let outputs = session.run(inputs)?;
    self.postprocess(input, &outputs)
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectItem<T> {
  pub kind: T,
  pub score: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectResult<T> {
  pub items: Box<[DetectItem<T>]>,
}

impl<T> DetectResult<T> {
  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }
}

pub trait WithLabel: Sized + std::fmt::Debug {
  fn to_label_str(&self) -> String;
  fn from_label_id(id: u32) -> Self;
}

/// 对白框与文字的类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalloonKind {
  Normal,
  Scream,
  Touched,
  Think,
  Sentence,
  Text,
}

impl WithLabel for BalloonKind {
  fn to_label_str(&self) -> String {
    match self {
      BalloonKind::Normal => "normal",
      BalloonKind::Scream => "scream",
      BalloonKind::Touched => "touched",
      BalloonKind::Think => "think",
      BalloonKind::Sentence => "sentence",
      BalloonKind::Text => "text",
    }
    .to_string()
  }

  /// 对白框模型的类别编号，未知编号视为普通对白框
  fn from_label_id(id: u32) -> Self {
    match id {
      1 => BalloonKind::Scream,
      2 => BalloonKind::Touched,
      3 => BalloonKind::Think,
      4 => BalloonKind::Sentence,
      _ => BalloonKind::Normal,
    }
  }
}

mod detect;
pub use self::detect::{
  CONF_THRESHOLD, DETECT_INPUT_HEIGHT, DETECT_INPUT_WIDTH, Detection, Detector, DetectorKind,
  NMS_THRESHOLD, NormalizedDetection, PageDetections, combine_detections, iou, nms, normalize,
  postprocess, postprocess_with_threshold, rescale,
};

mod inpaint;
pub use self::inpaint::{InpaintTile, Inpainter};

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn unknown_globe_classes_are_normal() {
    assert_eq!(BalloonKind::from_label_id(0), BalloonKind::Normal);
    assert_eq!(BalloonKind::from_label_id(3), BalloonKind::Think);
    assert_eq!(BalloonKind::from_label_id(42), BalloonKind::Normal);
    assert_eq!(BalloonKind::Text.to_label_str(), "text");
  }
}
