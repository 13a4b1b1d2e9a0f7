// 该文件是 Fukidashi （对白框） 项目的一部分。
// src/bin/simple_detect.rs - 检测测试代码
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
  input::ImageFileInput,
  output::{OutputWrapper, Render},
  session::OnnxSessionFactory,
  task::DetectionTask,
};
use tracing::info;

/// 使用未分片的模型文件直接检测
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 对白框检测模型（ONNX）
  #[arg(long, value_name = "MODEL")]
  pub globes: PathBuf,
  /// 文字检测模型（ONNX）
  #[arg(long, value_name = "MODEL")]
  pub text: PathBuf,
  /// 输入来源
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出路径
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("对白框模型: {}", args.globes.display());
  info!("文字模型: {}", args.text.display());
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let pages = ImageFileInput::from_url(&args.input)?.load_pages()?;
  let globes = ModelBuffer::new(std::fs::read(&args.globes)?);
  let text = ModelBuffer::new(std::fs::read(&args.text)?);
  let output = OutputWrapper::from_url(&args.output)?;

  let config = PipelineConfig::default();
  let task = DetectionTask::new(Arc::new(OnnxSessionFactory::default()), &config);

  info!("开始推理...");
  let now = std::time::Instant::now();
  let results = task.run(&pages, globes, text, |p| {
    info!("[{}] {} {}/{}", p.worker_id, p.filename, p.completed, p.total)
  })?;
  info!("推理完成，耗时: {:.2?}", now.elapsed());

  for (page, result) in pages.iter().zip(&results) {
    output.render_result(page, result)?;
  }

  Ok(())
}
