// 该文件是 Fukidashi （对白框） 项目的一部分。
// src/config.rs - 流水线配置
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

use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
  PipelineError,
  mask::MaskPolarity,
  model::{CONF_THRESHOLD, DETECT_INPUT_HEIGHT, DETECT_INPUT_WIDTH, Detector, DetectorKind, Inpainter, NMS_THRESHOLD},
  planner::DEFAULT_TILE_SIZE,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
  pub globes_model: String,
  pub text_model: String,
  pub input_width: u32,
  pub input_height: u32,
  pub conf_threshold: f32,
  pub nms_threshold: f32,
}

impl Default for DetectionConfig {
  fn default() -> Self {
    DetectionConfig {
      globes_model: "globes".to_string(),
      text_model: "text".to_string(),
      input_width: DETECT_INPUT_WIDTH,
      input_height: DETECT_INPUT_HEIGHT,
      conf_threshold: CONF_THRESHOLD,
      nms_threshold: NMS_THRESHOLD,
    }
  }
}

impl DetectionConfig {
  pub fn detector(&self, kind: DetectorKind) -> Detector {
    Detector::new(kind)
      .input_size(self.input_width, self.input_height)
      .thresholds(self.conf_threshold, self.nms_threshold)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InpaintConfig {
  pub model: String,
  /// 填充画布边长
  pub working_size: u32,
  /// 分块边长
  pub tile_size: u32,
  /// 模型输入掩码的极性
  pub mask_polarity: MaskPolarity,
  /// 拼接后把掩码之外的像素恢复为原图
  pub preserve_unmasked: bool,
}

impl Default for InpaintConfig {
  fn default() -> Self {
    InpaintConfig {
      model: "inpaint".to_string(),
      working_size: 1024,
      tile_size: DEFAULT_TILE_SIZE,
      mask_polarity: MaskPolarity::PreserveHigh,
      preserve_unmasked: true,
    }
  }
}

impl InpaintConfig {
  pub fn inpainter(&self) -> Inpainter {
    Inpainter::new(self.mask_polarity)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
  pub detection: DetectionConfig,
  pub inpainting: InpaintConfig,
  pub worker_timeout_secs: u64,
  pub intra_threads: usize,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    PipelineConfig {
      detection: DetectionConfig::default(),
      inpainting: InpaintConfig::default(),
      worker_timeout_secs: 300,
      intra_threads: 1,
    }
  }
}

impl PipelineConfig {
  pub fn load(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
    let path = path.as_ref();
    info!("读取配置文件: {}", path.display());
    let config = serde_json::from_slice(&std::fs::read(path)?)?;
    Ok(config)
  }

  pub fn worker_timeout(&self) -> Duration {
    Duration::from_secs(self.worker_timeout_secs.max(1))
  }
}
