// 该文件是 Fukidashi （对白框） 项目的一部分。
// tests/detection_pipeline.rs - 检测流水线集成测试
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

use std::sync::Arc;

use image::{Rgba, RgbaImage};

use fukidashi::{
  PipelineError, ValidationError,
  config::PipelineConfig,
  fragment::ModelBuffer,
  model::{BalloonKind, DETECT_INPUT_HEIGHT, DETECT_INPUT_WIDTH},
  session::{InferenceSession, SessionError, SessionFactory},
  task::{DetectionTask, Page},
  tensor::{NamedTensors, Tensor},
  worker::InferenceError,
};

/// 按模型字节返回固定结果的检测会话
struct FixedDetector {
  inputs: Vec<String>,
  outputs: Vec<String>,
  boxes: Vec<f32>,
  scores: Vec<f32>,
  classes: i64,
}

impl InferenceSession for FixedDetector {
  fn input_names(&self) -> &[String] {
    &self.inputs
  }

  fn output_names(&self) -> &[String] {
    &self.outputs
  }

  fn run(&mut self, inputs: NamedTensors) -> Result<NamedTensors, SessionError> {
    let image = inputs
      .get("images")
      .ok_or_else(|| SessionError::MissingInput("images".into()))?;
    let expected = vec![1, 3, DETECT_INPUT_HEIGHT as i64, DETECT_INPUT_WIDTH as i64];
    if image.dims != expected {
      return Err(SessionError::Shape(format!("{:?}", image.dims)));
    }
    let n = self.boxes.len() as i64 / 4;
    Ok(
      NamedTensors::new()
        .with("boxes", Tensor::f32(self.boxes.clone(), vec![1, n, 4]))
        .with("scores", Tensor::f32(self.scores.clone(), vec![1, n, self.classes])),
    )
  }
}

struct Broken {
  inputs: Vec<String>,
}

impl InferenceSession for Broken {
  fn input_names(&self) -> &[String] {
    &self.inputs
  }

  fn output_names(&self) -> &[String] {
    &[]
  }

  fn run(&mut self, _inputs: NamedTensors) -> Result<NamedTensors, SessionError> {
    Err(SessionError::Runtime("显存不足".into()))
  }
}

fn session(model: &ModelBuffer) -> Result<Box<dyn InferenceSession>, SessionError> {
  let names = |n: &[&str]| n.iter().map(|s| s.to_string()).collect::<Vec<_>>();
  match model.as_bytes() {
    b"globes" => Ok(Box::new(FixedDetector {
      inputs: names(&["images"]),
      outputs: names(&["boxes", "scores"]),
      // 第二个框与第一个高度重叠，应被抑制
      boxes: vec![0.1, 0.1, 0.5, 0.5, 0.11, 0.1, 0.5, 0.5, 0.0, 0.0, 0.05, 0.05],
      scores: vec![
        0.1, 0.9, 0.0, 0.0, 0.0, //
        0.1, 0.8, 0.0, 0.0, 0.0, //
        0.2, 0.1, 0.0, 0.0, 0.0,
      ],
      classes: 5,
    })),
    b"text" => Ok(Box::new(FixedDetector {
      inputs: names(&["images"]),
      outputs: names(&["boxes", "scores"]),
      boxes: vec![0.6, 0.6, 0.9, 0.9],
      scores: vec![0.7],
      classes: 1,
    })),
    b"broken" => Ok(Box::new(Broken {
      inputs: names(&["images"]),
    })),
    other => Err(SessionError::Runtime(format!("未知模型 {:?}", other))),
  }
}

fn factory() -> Arc<dyn SessionFactory> {
  Arc::new(session)
}

fn pages(n: usize) -> Vec<Page> {
  (0..n)
    .map(|i| Page {
      filename: format!("{:03}.png", i),
      image: RgbaImage::from_pixel(100, 200, Rgba([255, 255, 255, 255])),
    })
    .collect()
}

#[test]
fn detections_are_grouped_per_page_in_input_order() {
  let task = DetectionTask::new(factory(), &PipelineConfig::default());
  let mut progress = Vec::new();
  let results = task
    .run(
      &pages(3),
      ModelBuffer::new(b"globes".to_vec()),
      ModelBuffer::new(b"text".to_vec()),
      |p| progress.push((p.worker_id.clone(), p.completed)),
    )
    .expect("检测");

  let names: Vec<_> = results.iter().map(|r| r.filename.as_str()).collect();
  assert_eq!(names, ["000.png", "001.png", "002.png"]);
  assert_eq!(progress.len(), 6);
  assert!(progress.contains(&("globes2".to_string(), 3)));
  assert!(progress.contains(&("text1".to_string(), 2)));

  for page in &results {
    assert_eq!(page.globes.len(), 1);
    assert_eq!(page.text.len(), 1);
    let globe = page.globes[0];
    assert_eq!(globe.class, 1);
    for (got, want) in globe.bbox.iter().zip([0.3f32, 0.3, 0.4, 0.4]) {
      assert!((got - want).abs() < 1e-4, "{:?}", globe.bbox);
    }

    let result = page.result();
    assert_eq!(result.items[0].kind, BalloonKind::Scream);
    assert_eq!(result.items[1].kind, BalloonKind::Text);
  }
}

#[test]
fn a_single_page_uses_only_the_first_half() {
  let task = DetectionTask::new(factory(), &PipelineConfig::default());
  let mut workers = Vec::new();
  let results = task
    .run(
      &pages(1),
      ModelBuffer::new(b"globes".to_vec()),
      ModelBuffer::new(b"text".to_vec()),
      |p| workers.push(p.worker_id.clone()),
    )
    .expect("检测");

  assert_eq!(results.len(), 1);
  workers.sort();
  assert_eq!(workers, ["globes1", "text1"]);
}

#[test]
fn a_failing_model_fails_the_batch() {
  let task = DetectionTask::new(factory(), &PipelineConfig::default());
  let err = task
    .run(
      &pages(4),
      ModelBuffer::new(b"globes".to_vec()),
      ModelBuffer::new(b"broken".to_vec()),
      |_| {},
    )
    .expect_err("应失败");

  match err {
    PipelineError::Inference(InferenceError::Worker { worker, message }) => {
      assert!(worker.starts_with("text"), "{}", worker);
      assert!(message.contains("显存不足"), "{}", message);
    }
    other => panic!("意外的错误: {}", other),
  }
}

#[test]
fn invalid_batches_are_rejected_before_any_worker_starts() {
  let task = DetectionTask::new(factory(), &PipelineConfig::default());
  let globes = ModelBuffer::new(b"globes".to_vec());
  let text = ModelBuffer::new(b"text".to_vec());

  let err = task
    .run(&[], globes.clone(), text.clone(), |_| {})
    .expect_err("空批次");
  assert!(matches!(err, PipelineError::Validation(ValidationError::EmptyBatch)));

  let mut bad = pages(2);
  bad[1].filename.clear();
  let err = task.run(&bad, globes, text, |_| {}).expect_err("缺少文件名");
  assert!(matches!(err, PipelineError::Validation(ValidationError::MissingFilename)));
}
