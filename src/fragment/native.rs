// 该文件是 Fukidashi （对白框） 项目的一部分。
// src/fragment/native.rs - 原生重建模块与内存守卫
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

use std::ffi::c_void;

use tracing::debug;
#[cfg(feature = "native_reconstruct")]
use tracing::info;
use url::Url;

use super::{ReconstructionError, builtin};
use crate::{FromUrl, FromUrlWithScheme};

pub type MallocFn = unsafe extern "C" fn(size: usize) -> *mut c_void;
pub type FreeFn = unsafe extern "C" fn(ptr: *mut c_void);
pub type ReconstructModelFn = unsafe extern "C" fn(
  fragments: *const *const u8,
  lengths: *const i32,
  num_fragments: i32,
  encrypted_index: i32,
  key: *const u8,
  key_len: i32,
  out_len: *mut i32,
) -> *mut u8;
pub type FreeModelFn = unsafe extern "C" fn(model: *mut u8);

/// 原生重建模块的函数表
pub struct NativeModule {
  name: String,
  malloc: MallocFn,
  free: FreeFn,
  reconstruct_model: ReconstructModelFn,
  free_model: FreeModelFn,
  #[cfg(feature = "native_reconstruct")]
  _library: Option<libloading::Library>,
}

impl NativeModule {
  /// 使用库内置的重建例程
  pub fn builtin() -> Self {
    Self::from_fns(
      "builtin",
      builtin::builtin_malloc,
      builtin::builtin_free,
      builtin::reconstruct_model,
      builtin::free_model,
    )
  }

  pub fn from_fns(
    name: &str,
    malloc: MallocFn,
    free: FreeFn,
    reconstruct_model: ReconstructModelFn,
    free_model: FreeModelFn,
  ) -> Self {
    NativeModule {
      name: name.to_string(),
      malloc,
      free,
      reconstruct_model,
      free_model,
      #[cfg(feature = "native_reconstruct")]
      _library: None,
    }
  }

  /// 从共享库加载 `reconstruct_model` 与 `free_model`，内存分配使用系统 C 库
  #[cfg(feature = "native_reconstruct")]
  pub fn load(path: &str) -> Result<Self, ReconstructionError> {
    info!("加载原生重建模块: {}", path);
    // SAFETY: 共享库按约定导出与函数表签名一致的符号
    unsafe {
      let library = libloading::Library::new(path)
        .map_err(|e| ReconstructionError::Library(format!("{}: {}", path, e)))?;
      let reconstruct_model: ReconstructModelFn = *library
        .get::<ReconstructModelFn>(b"reconstruct_model")
        .map_err(|e| ReconstructionError::Library(format!("缺少符号 reconstruct_model: {}", e)))?;
      let free_model: FreeModelFn = *library
        .get::<FreeModelFn>(b"free_model")
        .map_err(|e| ReconstructionError::Library(format!("缺少符号 free_model: {}", e)))?;

      Ok(NativeModule {
        name: path.to_string(),
        malloc: builtin::builtin_malloc,
        free: builtin::builtin_free,
        reconstruct_model,
        free_model,
        _library: Some(library),
      })
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub(crate) fn alloc(&self, len: usize) -> Result<NativeAlloc<'_>, ReconstructionError> {
    // SAFETY: malloc 只接收长度，返回值在下方判空
    let ptr = unsafe { (self.malloc)(len.max(1)) } as *mut u8;
    if ptr.is_null() {
      return Err(ReconstructionError::AllocationFailed(len));
    }
    Ok(NativeAlloc {
      module: self,
      ptr,
      len,
    })
  }

  pub(crate) fn alloc_copy(&self, bytes: &[u8]) -> Result<NativeAlloc<'_>, ReconstructionError> {
    let alloc = self.alloc(bytes.len())?;
    // SAFETY: 目标缓冲区刚分配，长度不小于 bytes.len()
    unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), alloc.ptr, bytes.len()) };
    Ok(alloc)
  }

  pub(crate) fn alloc_copy_of<T: Copy>(
    &self,
    values: &[T],
  ) -> Result<NativeAlloc<'_>, ReconstructionError> {
    let size = std::mem::size_of_val(values);
    // SAFETY: T 为 Copy 类型，按字节复制其内存表示
    let bytes = unsafe { std::slice::from_raw_parts(values.as_ptr() as *const u8, size) };
    self.alloc_copy(bytes)
  }

  #[allow(clippy::too_many_arguments)]
  pub(crate) fn call_reconstruct(
    &self,
    fragments: *const *const u8,
    lengths: *const i32,
    num_fragments: i32,
    encrypted_index: i32,
    key: *const u8,
    key_len: i32,
    out_len: *mut i32,
  ) -> Option<NativeModel<'_>> {
    // SAFETY: 所有指针均由本模块分配，且在调用期间有效
    let ptr = unsafe {
      (self.reconstruct_model)(
        fragments,
        lengths,
        num_fragments,
        encrypted_index,
        key,
        key_len,
        out_len,
      )
    };
    if ptr.is_null() {
      None
    } else {
      Some(NativeModel { module: self, ptr })
    }
  }
}

impl FromUrlWithScheme for NativeModule {
  const SCHEME: &'static str = "native";
}

impl FromUrl for NativeModule {
  type Error = ReconstructionError;

  /// `native:///path/to/libreconstruct.so` 加载共享库，`native:builtin` 使用内置例程
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ReconstructionError::Library(format!(
        "期望方案 '{}', 实际方案 '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }
    if url.path() == "builtin" || url.path().is_empty() {
      return Ok(NativeModule::builtin());
    }

    #[cfg(feature = "native_reconstruct")]
    {
      NativeModule::load(url.path())
    }
    #[cfg(not(feature = "native_reconstruct"))]
    {
      Err(ReconstructionError::Library(
        "未启用 native_reconstruct 特性".to_string(),
      ))
    }
  }
}

/// 一块原生内存，离开作用域时释放
pub(crate) struct NativeAlloc<'m> {
  module: &'m NativeModule,
  ptr: *mut u8,
  len: usize,
}

impl NativeAlloc<'_> {
  pub(crate) fn as_ptr(&self) -> *mut u8 {
    self.ptr
  }
}

impl Drop for NativeAlloc<'_> {
  fn drop(&mut self) {
    debug!("释放原生内存: {} 字节", self.len);
    // SAFETY: ptr 由同一模块的 malloc 分配且只释放一次
    unsafe { (self.module.free)(self.ptr as *mut c_void) };
  }
}

/// 重建例程返回的模型缓冲区，离开作用域时交还给 `free_model`
pub(crate) struct NativeModel<'m> {
  module: &'m NativeModule,
  ptr: *mut u8,
}

impl NativeModel<'_> {
  pub(crate) fn copy_out(&self, len: usize) -> Vec<u8> {
    // SAFETY: 重建例程保证缓冲区至少有 len 字节
    unsafe { std::slice::from_raw_parts(self.ptr, len) }.to_vec()
  }
}

impl Drop for NativeModel<'_> {
  fn drop(&mut self) {
    // SAFETY: ptr 由 reconstruct_model 返回，只释放一次
    unsafe { (self.module.free_model)(self.ptr) };
  }
}
