// 该文件是 Fukidashi （对白框） 项目的一部分。
// tests/inpaint_pipeline.rs - 修复流水线集成测试
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

use image::{GrayImage, Luma, Rgba, RgbaImage};

use fukidashi::{
  PipelineError, ValidationError,
  config::PipelineConfig,
  fragment::ModelBuffer,
  mask::BrushStroke,
  session::{InferenceSession, SessionError, SessionFactory},
  task::{EditSource, InpaintProgress, InpaintRequest, InpaintTask},
  tensor::{NamedTensors, Tensor},
  worker::InferenceError,
};

const PAPER: Rgba<u8> = Rgba([200, 100, 50, 255]);

/// 把编辑区域全部涂黑的修复模型
struct Blackout {
  inputs: Vec<String>,
  outputs: Vec<String>,
  fail: bool,
}

impl InferenceSession for Blackout {
  fn input_names(&self) -> &[String] {
    &self.inputs
  }

  fn output_names(&self) -> &[String] {
    &self.outputs
  }

  fn run(&mut self, inputs: NamedTensors) -> Result<NamedTensors, SessionError> {
    if self.fail {
      return Err(SessionError::Runtime("模型崩溃".into()));
    }
    let image = inputs
      .get("image")
      .ok_or_else(|| SessionError::MissingInput("image".into()))?;
    let mask = inputs
      .get("mask")
      .ok_or_else(|| SessionError::MissingInput("mask".into()))?;
    if mask.dims[2..] != image.dims[2..] || mask.dims[1] != 1 {
      return Err(SessionError::Shape(format!("{:?} / {:?}", image.dims, mask.dims)));
    }
    Ok(NamedTensors::new().with("output", Tensor::u8(vec![0; image.len()], image.dims.clone())))
  }
}

fn session(model: &ModelBuffer) -> Result<Box<dyn InferenceSession>, SessionError> {
  Ok(Box::new(Blackout {
    inputs: vec!["image".into(), "mask".into()],
    outputs: vec!["output".into()],
    fail: model.as_bytes() == b"broken",
  }))
}

fn task() -> InpaintTask {
  let mut config = PipelineConfig::default();
  config.inpainting.working_size = 256;
  config.inpainting.tile_size = 128;
  let factory: Arc<dyn SessionFactory> = Arc::new(session);
  InpaintTask::new(factory, &config)
}

fn page(filename: &str, edits: EditSource) -> InpaintRequest {
  InpaintRequest {
    filename: filename.to_string(),
    image: Some(RgbaImage::from_pixel(300, 200, PAPER)),
    edits,
  }
}

fn is_black(p: &Rgba<u8>) -> bool {
  p.0[..3] == [0, 0, 0]
}

#[test]
fn edits_are_inpainted_and_everything_else_is_untouched() {
  let mut mask = GrayImage::new(300, 200);
  for y in 100..120 {
    for x in 200..220 {
      mask.put_pixel(x, y, Luma([255]));
    }
  }
  let requests = vec![
    page(
      "strokes.png",
      EditSource::Strokes(vec![BrushStroke {
        points: vec![(50.0, 50.0)],
        base_width: 20.0,
        zoom: 1.0,
      }]),
    ),
    page("blank.png", EditSource::Strokes(Vec::new())),
    page("mask.png", EditSource::Mask(mask)),
  ];

  let mut images = Vec::new();
  let mut patches = 0;
  let outcomes = task()
    .run(requests, ModelBuffer::new(b"inpaint".to_vec()), |p| match p {
      InpaintProgress::Patch(_) => patches += 1,
      InpaintProgress::Image(p) => images.push((p.completed_images, p.percentage)),
    })
    .expect("修复");

  assert_eq!(outcomes.len(), 3);
  assert_eq!(images, [(1, 33.0), (2, 67.0), (3, 100.0)]);
  assert_eq!(patches, 2);

  let strokes = &outcomes[0];
  assert!(!strokes.skipped);
  assert!(is_black(strokes.image.get_pixel(50, 50)));
  assert_eq!(strokes.image.get_pixel(250, 150), &PAPER);
  assert_eq!(strokes.image.get_pixel(80, 50), &PAPER);

  let blank = &outcomes[1];
  assert!(blank.skipped);
  assert!(blank.image.pixels().all(|p| *p == PAPER));

  let masked = &outcomes[2];
  assert!(!masked.skipped);
  assert!(is_black(masked.image.get_pixel(210, 110)));
  assert_eq!(masked.image.get_pixel(199, 110), &PAPER);
  assert_eq!(masked.image.get_pixel(50, 50), &PAPER);
}

#[test]
fn long_strokes_are_inpainted_end_to_end() {
  let request = page(
    "swipe.png",
    EditSource::Strokes(vec![BrushStroke {
      points: vec![(20.0, 100.0), (280.0, 100.0)],
      base_width: 16.0,
      zoom: 1.0,
    }]),
  );
  let mut patches = 0;
  let outcomes = task()
    .run(vec![request], ModelBuffer::new(b"inpaint".to_vec()), |p| {
      if let InpaintProgress::Patch(_) = p {
        patches += 1;
      }
    })
    .expect("修复");

  let swipe = &outcomes[0];
  assert!(!swipe.skipped);
  assert!(patches >= 2, "{} 个分块", patches);
  for y in 96..=104 {
    for x in 20..=280 {
      assert!(is_black(swipe.image.get_pixel(x, y)), "({}, {}) 没有被修复", x, y);
    }
  }
  assert_eq!(swipe.image.get_pixel(150, 130), &PAPER);
  assert_eq!(swipe.image.get_pixel(5, 100), &PAPER);
}

#[test]
fn missing_images_are_rejected_up_front() {
  let mut request = page("a.png", EditSource::Strokes(Vec::new()));
  request.image = None;
  let err = task()
    .run(vec![request], ModelBuffer::new(b"inpaint".to_vec()), |_| {})
    .expect_err("缺少图像");
  assert!(matches!(
    err,
    PipelineError::Validation(ValidationError::MissingImage(name)) if name == "a.png"
  ));
}

#[test]
fn model_failures_stop_the_run() {
  let request = page(
    "a.png",
    EditSource::Strokes(vec![BrushStroke {
      points: vec![(10.0, 10.0), (60.0, 10.0)],
      base_width: 8.0,
      zoom: 2.0,
    }]),
  );
  let err = task()
    .run(vec![request], ModelBuffer::new(b"broken".to_vec()), |_| {})
    .expect_err("应失败");
  match err {
    PipelineError::Inference(InferenceError::Worker { message, .. }) => {
      assert!(message.contains("模型崩溃"), "{}", message)
    }
    other => panic!("意外的错误: {}", other),
  }
}
