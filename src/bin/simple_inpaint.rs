// 该文件是 Fukidashi （对白框） 项目的一部分。
// src/bin/simple_inpaint.rs - 修复测试代码
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use clap::Parser;
use url::Url;

use fukidashi::{
  FromUrl,
  config::PipelineConfig,
  fragment::ModelBuffer,
  input::{ImageFileInput, load_mask},
  output::{Render, SaveImageFileOutput},
  session::OnnxSessionFactory,
  task::{EditSource, InpaintProgress, InpaintRequest, InpaintTask},
};
use tracing::info;

/// 用一张掩码图修复单页
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 修复模型（ONNX）
  #[arg(long, value_name = "MODEL")]
  pub model: PathBuf,
  /// 输入页面，例如 image:///page.png
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 掩码图，亮像素为需要修复的区域
  #[arg(long, value_name = "MASK")]
  pub mask: PathBuf,
  /// 输出路径，例如 image:///out.png
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,
  /// 模型输入掩码以 255 表示编辑区域
  #[arg(long)]
  pub edit_high: bool,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型文件路径: {}", args.model.display());
  info!("输入来源: {}", args.input);
  info!("掩码: {}", args.mask.display());
  info!("输出路径: {}", args.output);

  let pages = ImageFileInput::from_url(&args.input)?.load_pages()?;
  let mask = load_mask(&args.mask)?;
  let model = ModelBuffer::new(std::fs::read(&args.model)?);
  let output = SaveImageFileOutput::from_url(&args.output)?;

  let mut config = PipelineConfig::default();
  if args.edit_high {
    config.inpainting.mask_polarity = fukidashi::mask::MaskPolarity::EditHigh;
  }
  let task = InpaintTask::new(Arc::new(OnnxSessionFactory::default()), &config);

  let requests = pages
    .iter()
    .map(|page| InpaintRequest {
      filename: page.filename.clone(),
      image: Some(page.image.clone()),
      edits: EditSource::Mask(mask.clone()),
    })
    .collect();

  info!("开始修复...");
  let now = std::time::Instant::now();
  let outcomes = task.run(requests, model, |progress| {
    if let InpaintProgress::Patch(p) = progress {
      info!("分块 {}/{}", p.completed_patches, p.total_patches);
    }
  })?;
  info!("修复完成，耗时: {:.2?}", now.elapsed());

  for (page, outcome) in pages.iter().zip(&outcomes) {
    output.render_result(page, &outcome.image)?;
  }

  Ok(())
}
