// 该文件是 Fukidashi （对白框） 项目的一部分。
// src/main.rs - 项目主程序
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

mod args;

use std::{path::Path, sync::Arc};

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

use fukidashi::{
  FromUrl,
  cache::{FileModelCache, MemoryModelCache, ModelCache},
  config::PipelineConfig,
  fragment::{NativeModule, Reconstructor},
  input::{InputWrapper, read_edits},
  output::{OutputWrapper, Render},
  session::SessionFactory,
  source::DirectoryModelSource,
  store::ModelStore,
  task::{DetectionTask, InpaintProgress, InpaintRequest, InpaintTask},
};

use args::{Args, Command, ModelArgs};

#[cfg(feature = "native_reconstruct")]
fn load_native(path: &str) -> Result<NativeModule> {
  Ok(NativeModule::load(path)?)
}

#[cfg(not(feature = "native_reconstruct"))]
fn load_native(path: &str) -> Result<NativeModule> {
  bail!("未启用 native_reconstruct 特性, 无法加载 {}", path)
}

#[cfg(feature = "onnx")]
fn session_factory(config: &PipelineConfig) -> Result<Arc<dyn SessionFactory>> {
  let factory = fukidashi::session::OnnxSessionFactory::default().intra_threads(config.intra_threads);
  Ok(Arc::new(factory))
}

#[cfg(not(feature = "onnx"))]
fn session_factory(_config: &PipelineConfig) -> Result<Arc<dyn SessionFactory>> {
  bail!("未启用 onnx 特性, 无法运行推理")
}

fn open_store(args: &ModelArgs) -> Result<ModelStore> {
  let source = DirectoryModelSource::from_url(&args.models)?;
  let cache: Box<dyn ModelCache> = match &args.cache {
    Some(url) => Box::new(FileModelCache::from_url(url)?),
    None => Box::new(MemoryModelCache::new()),
  };
  let reconstructor = match &args.native {
    Some(path) => Reconstructor::new(load_native(path)?),
    None => Reconstructor::default(),
  };
  info!("重建模块: {}", reconstructor.module().name());
  Ok(ModelStore::new(Box::new(source), cache, reconstructor))
}

fn detect(config: &PipelineConfig, models: &ModelArgs, input: &Url, output: &Url) -> Result<()> {
  let pages = InputWrapper::from_url(input)?.load_pages()?;
  let output = OutputWrapper::from_url(output)?;

  let mut store = open_store(models)?;
  let globes = store.load(&config.detection.globes_model)?;
  let text = store.load(&config.detection.text_model)?;

  let task = DetectionTask::new(session_factory(config)?, config);
  let now = std::time::Instant::now();
  let results = task.run(&pages, globes, text, |progress| {
    info!(
      "[{}] {} {}/{} ({:.0}%)",
      progress.worker_id,
      progress.filename,
      progress.completed,
      progress.total,
      progress.percentage()
    );
  })?;
  info!("检测完成，耗时: {:.2?}", now.elapsed());

  for result in &results {
    let Some(page) = pages.iter().find(|p| p.filename == result.filename) else {
      continue;
    };
    info!(
      "{}: {} 个对白框, {} 处文字",
      page.filename,
      result.globes.len(),
      result.text.len()
    );
    output.render_result(page, result)?;
  }
  Ok(())
}

fn inpaint(
  config: &PipelineConfig,
  models: &ModelArgs,
  input: &Url,
  edits: &Path,
  output: &Url,
) -> Result<()> {
  let pages = InputWrapper::from_url(input)?.load_pages()?;
  let mut edits = read_edits(edits)?;
  let output = OutputWrapper::from_url(output)?;

  let mut requests = Vec::new();
  for page in &pages {
    let Some(page_edits) = edits.remove(&page.filename) else {
      continue;
    };
    requests.push(InpaintRequest {
      filename: page.filename.clone(),
      image: Some(page.image.clone()),
      edits: page_edits.load()?,
    });
  }
  for filename in edits.keys() {
    warn!("编辑记录中的 {} 没有对应的页面", filename);
  }
  if requests.is_empty() {
    bail!("没有需要修复的页面");
  }

  let mut store = open_store(models)?;
  let model = store.load(&config.inpainting.model)?;
  let task = InpaintTask::new(session_factory(config)?, config);
  let outcomes = task.run(requests, model, |progress| match progress {
    InpaintProgress::Patch(p) => info!(
      "分块 {}/{} ({:.0}%)",
      p.completed_patches, p.total_patches, p.percentage
    ),
    InpaintProgress::Image(p) => info!(
      "{} 完成, {}/{} ({:.0}%)",
      p.filename, p.completed_images, p.total_images, p.percentage
    ),
  })?;

  for outcome in &outcomes {
    if outcome.skipped {
      continue;
    }
    let Some(page) = pages.iter().find(|p| p.filename == outcome.filename) else {
      continue;
    };
    output.render_result(page, &outcome.image)?;
  }
  Ok(())
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let args = Args::parse();
  let config = match &args.config {
    Some(path) => PipelineConfig::load(path)?,
    None => PipelineConfig::default(),
  };

  match args.command {
    Command::Detect {
      models,
      input,
      output,
    } => detect(&config, &models, &input, &output),
    Command::Inpaint {
      models,
      input,
      edits,
      output,
    } => inpaint(&config, &models, &input, &edits, &output),
    Command::Reconstruct {
      models,
      name,
      output,
    } => {
      let mut store = open_store(&models)?;
      let buffer = store.load(&name)?;
      std::fs::write(&output, buffer.as_bytes())
        .with_context(|| format!("无法写入模型: {}", output.display()))?;
      info!("模型 {} 已写入 {}, sha256 {}", name, output.display(), buffer.sha256_hex());
      Ok(())
    }
    Command::Split {
      model,
      name,
      models,
    } => {
      let bytes = std::fs::read(&model).with_context(|| format!("无法读取模型: {}", model.display()))?;
      let original_name = model
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("{}.onnx", name));
      let target = DirectoryModelSource::from_url(&models)?;
      let metadata = target.publish(&name, &bytes, &original_name)?;
      info!(
        "模型 {} 发布为版本 {}, {} 个分片",
        name,
        metadata.version,
        metadata.fragments.len()
      );
      Ok(())
    }
  }
}
