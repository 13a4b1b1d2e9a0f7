// 该文件是 Fukidashi （对白框） 项目的一部分。
// src/fragment.rs - 模型分片重建
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

use std::{fmt, ops::Deref, sync::Arc};

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::ValidationError;

mod builtin;
mod native;
mod split;

pub use self::native::{FreeFn, FreeModelFn, MallocFn, NativeModule, ReconstructModelFn};
pub use self::split::{
  DEFAULT_ENCRYPTED_INDEX, DEFAULT_FRAGMENT_COUNT, FragmentInfo, ModelMetadata, SplitOutput,
  bump_version, generate_key, split_model,
};

/// 只读的模型权重，可在多个工作线程之间共享
#[derive(Clone, PartialEq, Eq)]
pub struct ModelBuffer(Arc<[u8]>);

impl ModelBuffer {
  pub fn new(bytes: Vec<u8>) -> Self {
    ModelBuffer(Arc::from(bytes))
  }

  pub fn as_bytes(&self) -> &[u8] {
    &self.0
  }

  pub fn sha256_hex(&self) -> String {
    hex::encode(Sha256::digest(&self.0))
  }
}

impl Deref for ModelBuffer {
  type Target = [u8];

  fn deref(&self) -> &Self::Target {
    &self.0
  }
}

impl From<Vec<u8>> for ModelBuffer {
  fn from(bytes: Vec<u8>) -> Self {
    ModelBuffer::new(bytes)
  }
}

impl fmt::Debug for ModelBuffer {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "ModelBuffer({} bytes)", self.0.len())
  }
}

/// 一组模型分片，其中恰好一个分片被加密
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelFragmentSet {
  pub fragments: Vec<Vec<u8>>,
  pub encrypted_index: usize,
  pub key: Vec<u8>,
}

impl ModelFragmentSet {
  pub fn validate(&self) -> Result<(), ValidationError> {
    if self.fragments.is_empty() {
      return Err(ValidationError::EmptyFragments);
    }
    if let Some(index) = self.fragments.iter().position(Vec::is_empty) {
      return Err(ValidationError::EmptyFragment(index));
    }
    if self.encrypted_index >= self.fragments.len() {
      return Err(ValidationError::EncryptedIndexOutOfRange {
        index: self.encrypted_index,
        count: self.fragments.len(),
      });
    }
    if self.key.is_empty() {
      return Err(ValidationError::EmptyKey);
    }
    Ok(())
  }
}

#[derive(Error, Debug)]
pub enum ReconstructionError {
  #[error("分片校验失败: {0}")]
  Invalid(#[from] ValidationError),
  #[error("原生内存分配失败: {0} 字节")]
  AllocationFailed(usize),
  #[error("重建例程返回空指针")]
  NullResult,
  #[error("重建例程返回无效长度: {0}")]
  InvalidLength(i32),
  #[error("分片数据超出原生接口范围: {0}")]
  TooLarge(usize),
  #[error("模型校验和不匹配: 期望 {expected}, 实际 {actual}")]
  Checksum { expected: String, actual: String },
  #[error("加密错误: {0}")]
  Cipher(String),
  #[error("无法加载原生模块: {0}")]
  Library(String),
}

/// 通过原生模块把分片重建为完整模型
pub struct Reconstructor {
  module: NativeModule,
}

impl Default for Reconstructor {
  fn default() -> Self {
    Reconstructor::new(NativeModule::builtin())
  }
}

impl Reconstructor {
  pub fn new(module: NativeModule) -> Self {
    Reconstructor { module }
  }

  pub fn module(&self) -> &NativeModule {
    &self.module
  }

  /// 消耗分片集合，返回重建后的模型
  ///
  /// 所有原生内存都由守卫持有，任何退出路径都会释放。
  pub fn reconstruct(&self, set: ModelFragmentSet) -> Result<ModelBuffer, ReconstructionError> {
    set.validate()?;
    let count = i32::try_from(set.fragments.len())
      .map_err(|_| ReconstructionError::TooLarge(set.fragments.len()))?;
    let key_len =
      i32::try_from(set.key.len()).map_err(|_| ReconstructionError::TooLarge(set.key.len()))?;
    let lengths = set
      .fragments
      .iter()
      .map(|f| i32::try_from(f.len()).map_err(|_| ReconstructionError::TooLarge(f.len())))
      .collect::<Result<Vec<i32>, _>>()?;

    info!(
      "使用 {} 模块重建模型: {} 个分片, 加密分片索引 {}",
      self.module.name(),
      count,
      set.encrypted_index
    );

    let fragments = set
      .fragments
      .iter()
      .map(|f| self.module.alloc_copy(f))
      .collect::<Result<Vec<_>, _>>()?;
    let pointers: Vec<*const u8> = fragments.iter().map(|a| a.as_ptr() as *const u8).collect();
    let pointer_array = self.module.alloc_copy_of(&pointers)?;
    let length_array = self.module.alloc_copy_of(&lengths)?;
    let key = self.module.alloc_copy(&set.key)?;
    let out_len = self.module.alloc_copy_of(&[0i32])?;

    let result = self.module.call_reconstruct(
      pointer_array.as_ptr() as *const *const u8,
      length_array.as_ptr() as *const i32,
      count,
      set.encrypted_index as i32,
      key.as_ptr() as *const u8,
      key_len,
      out_len.as_ptr() as *mut i32,
    );
    // SAFETY: out_len 指向本次调用分配的 4 字节
    let len = unsafe { std::ptr::read_unaligned(out_len.as_ptr() as *const i32) };

    let Some(model) = result else {
      error!("重建例程返回空指针");
      return Err(ReconstructionError::NullResult);
    };
    if len <= 0 {
      error!("重建例程返回无效长度: {}", len);
      return Err(ReconstructionError::InvalidLength(len));
    }

    let bytes = model.copy_out(len as usize);
    debug!("重建模型大小: {:.2} MB", bytes.len() as f64 / (1024.0 * 1024.0));
    Ok(ModelBuffer::new(bytes))
  }

  /// 重建后与元数据中的 SHA-256 比对
  pub fn reconstruct_verified(
    &self,
    set: ModelFragmentSet,
    expected_sha256: Option<&str>,
  ) -> Result<ModelBuffer, ReconstructionError> {
    let buffer = self.reconstruct(set)?;
    if let Some(expected) = expected_sha256 {
      let actual = buffer.sha256_hex();
      if !actual.eq_ignore_ascii_case(expected) {
        error!("模型校验和不匹配: 期望 {}, 实际 {}", expected, actual);
        return Err(ReconstructionError::Checksum {
          expected: expected.to_string(),
          actual,
        });
      }
    }
    Ok(buffer)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::ffi::c_void;
  use std::sync::atomic::{AtomicI32, AtomicIsize, AtomicUsize, Ordering};

  static LIVE_ALLOCATIONS: AtomicIsize = AtomicIsize::new(0);
  static FREE_MODEL_CALLS: AtomicUsize = AtomicUsize::new(0);
  /// 计数重建例程报告的长度，负数表示报告真实长度
  static REPORTED_LENGTH: AtomicI32 = AtomicI32::new(-1);

  unsafe extern "C" fn counting_malloc(size: usize) -> *mut c_void {
    LIVE_ALLOCATIONS.fetch_add(1, Ordering::SeqCst);
    unsafe { libc::malloc(size.max(1)) }
  }

  unsafe extern "C" fn counting_free(ptr: *mut c_void) {
    LIVE_ALLOCATIONS.fetch_sub(1, Ordering::SeqCst);
    unsafe { libc::free(ptr) }
  }

  unsafe extern "C" fn failing_reconstruct(
    _fragments: *const *const u8,
    _lengths: *const i32,
    _count: i32,
    _encrypted_index: i32,
    _key: *const u8,
    _key_len: i32,
    out_len: *mut i32,
  ) -> *mut u8 {
    unsafe { *out_len = 0 };
    std::ptr::null_mut()
  }

  unsafe extern "C" fn counting_free_model(ptr: *mut u8) {
    FREE_MODEL_CALLS.fetch_add(1, Ordering::SeqCst);
    unsafe { counting_free(ptr as *mut c_void) }
  }

  /// 不解密，只按顺序拼接分片，结果缓冲区同样计入分配数
  unsafe extern "C" fn concatenating_reconstruct(
    fragments: *const *const u8,
    lengths: *const i32,
    count: i32,
    _encrypted_index: i32,
    _key: *const u8,
    _key_len: i32,
    out_len: *mut i32,
  ) -> *mut u8 {
    let lengths = unsafe { std::slice::from_raw_parts(lengths, count as usize) };
    let fragments = unsafe { std::slice::from_raw_parts(fragments, count as usize) };
    let total: i32 = lengths.iter().sum();
    let out = unsafe { counting_malloc(total as usize) } as *mut u8;
    let mut offset = 0usize;
    for (&fragment, &len) in fragments.iter().zip(lengths) {
      unsafe { std::ptr::copy_nonoverlapping(fragment, out.add(offset), len as usize) };
      offset += len as usize;
    }
    let reported = REPORTED_LENGTH.load(Ordering::SeqCst);
    unsafe { *out_len = if reported < 0 { total } else { reported } };
    out
  }

  fn key() -> Vec<u8> {
    (0u8..32).collect()
  }

  fn sample_model() -> Vec<u8> {
    (0..4099u32).map(|i| (i * 31 % 251) as u8).collect()
  }

  #[test]
  fn split_then_reconstruct_round_trips() {
    let model = sample_model();
    let SplitOutput { set, metadata } = split_model(&model, 4, 3, &key(), "balloons.onnx").expect("拆分");

    assert_ne!(set.fragments[3], model[model.len() / 4 * 3..].to_vec());
    let buffer = Reconstructor::default()
      .reconstruct_verified(set, Some(&metadata.sha256))
      .expect("重建");
    assert_eq!(buffer.as_bytes(), model.as_slice());
  }

  #[test]
  fn encrypted_fragment_in_the_middle_keeps_order() {
    let model = sample_model();
    let SplitOutput { set, .. } = split_model(&model, 5, 1, &key()[..16], "m.onnx").expect("拆分");
    let buffer = Reconstructor::default().reconstruct(set).expect("重建");
    assert_eq!(buffer.as_bytes(), model.as_slice());
  }

  #[test]
  fn validation_runs_before_native_calls() {
    let reconstructor = Reconstructor::default();
    let empty = ModelFragmentSet {
      fragments: vec![],
      encrypted_index: 0,
      key: key(),
    };
    assert!(matches!(
      reconstructor.reconstruct(empty),
      Err(ReconstructionError::Invalid(ValidationError::EmptyFragments))
    ));

    let out_of_range = ModelFragmentSet {
      fragments: vec![vec![1], vec![2]],
      encrypted_index: 2,
      key: key(),
    };
    assert!(matches!(
      reconstructor.reconstruct(out_of_range),
      Err(ReconstructionError::Invalid(
        ValidationError::EncryptedIndexOutOfRange { index: 2, count: 2 }
      ))
    ));

    let zero_length = ModelFragmentSet {
      fragments: vec![vec![1], vec![]],
      encrypted_index: 0,
      key: key(),
    };
    assert!(matches!(
      reconstructor.reconstruct(zero_length),
      Err(ReconstructionError::Invalid(ValidationError::EmptyFragment(1)))
    ));

    let no_key = ModelFragmentSet {
      fragments: vec![vec![1]],
      encrypted_index: 0,
      key: vec![],
    };
    assert!(matches!(
      reconstructor.reconstruct(no_key),
      Err(ReconstructionError::Invalid(ValidationError::EmptyKey))
    ));
  }

  #[test]
  fn wrong_key_yields_reconstruction_error() {
    let model = sample_model();
    let SplitOutput { mut set, .. } = split_model(&model, 4, 3, &key(), "m.onnx").expect("拆分");
    set.key = vec![7u8; 32];
    // 错误密钥几乎总是导致填充校验失败，偶尔解出的也不会是原模型
    match Reconstructor::default().reconstruct(set) {
      Err(ReconstructionError::NullResult) => {}
      Ok(buffer) => assert_ne!(buffer.as_bytes(), model.as_slice()),
      Err(e) => panic!("意外的错误: {}", e),
    }
  }

  #[test]
  fn checksum_mismatch_is_reported() {
    let model = sample_model();
    let SplitOutput { set, .. } = split_model(&model, 4, 3, &key(), "m.onnx").expect("拆分");
    let result = Reconstructor::default().reconstruct_verified(set, Some("00"));
    assert!(matches!(result, Err(ReconstructionError::Checksum { .. })));
  }

  #[test]
  fn native_allocations_are_released_on_every_exit() {
    let set = || ModelFragmentSet {
      fragments: vec![vec![1, 2, 3], vec![4, 5]],
      encrypted_index: 1,
      key: key(),
    };

    let failing = Reconstructor::new(NativeModule::from_fns(
      "failing",
      counting_malloc,
      counting_free,
      failing_reconstruct,
      counting_free_model,
    ));
    let result = failing.reconstruct(set());
    assert!(matches!(result, Err(ReconstructionError::NullResult)));
    assert_eq!(LIVE_ALLOCATIONS.load(Ordering::SeqCst), 0);
    assert_eq!(FREE_MODEL_CALLS.load(Ordering::SeqCst), 0);

    let concatenating = Reconstructor::new(NativeModule::from_fns(
      "concatenating",
      counting_malloc,
      counting_free,
      concatenating_reconstruct,
      counting_free_model,
    ));

    REPORTED_LENGTH.store(0, Ordering::SeqCst);
    let result = concatenating.reconstruct(set());
    assert!(matches!(result, Err(ReconstructionError::InvalidLength(0))));
    assert_eq!(LIVE_ALLOCATIONS.load(Ordering::SeqCst), 0);
    assert_eq!(FREE_MODEL_CALLS.load(Ordering::SeqCst), 1);

    REPORTED_LENGTH.store(-1, Ordering::SeqCst);
    let buffer = concatenating.reconstruct(set()).expect("重建");
    assert_eq!(buffer.as_bytes(), &[1, 2, 3, 4, 5]);
    assert_eq!(LIVE_ALLOCATIONS.load(Ordering::SeqCst), 0);
    assert_eq!(FREE_MODEL_CALLS.load(Ordering::SeqCst), 2);
  }
}
