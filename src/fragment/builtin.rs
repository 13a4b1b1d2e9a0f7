// 该文件是 Fukidashi （对白框） 项目的一部分。
// src/fragment/builtin.rs - 内置重建例程
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

use std::{borrow::Cow, ffi::c_void};

use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::Pkcs7};

use super::ReconstructionError;

pub const IV_LEN: usize = 16;
const BLOCK_LEN: usize = 16;

type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type Aes192CbcDec = cbc::Decryptor<aes::Aes192>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes192CbcEnc = cbc::Encryptor<aes::Aes192>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;

fn cipher_error(e: impl std::fmt::Display) -> ReconstructionError {
  ReconstructionError::Cipher(e.to_string())
}

/// 解密分片：前 16 字节为 IV，其后为 PKCS#7 填充的 AES-CBC 密文
pub(crate) fn decrypt_fragment(data: &[u8], key: &[u8]) -> Result<Vec<u8>, ReconstructionError> {
  if data.len() <= IV_LEN || (data.len() - IV_LEN) % BLOCK_LEN != 0 {
    return Err(ReconstructionError::Cipher(format!(
      "密文长度无效: {}",
      data.len()
    )));
  }
  let (iv, body) = data.split_at(IV_LEN);

  match key.len() {
    16 => Aes128CbcDec::new_from_slices(key, iv)
      .map_err(cipher_error)?
      .decrypt_padded_vec_mut::<Pkcs7>(body)
      .map_err(cipher_error),
    24 => Aes192CbcDec::new_from_slices(key, iv)
      .map_err(cipher_error)?
      .decrypt_padded_vec_mut::<Pkcs7>(body)
      .map_err(cipher_error),
    32 => Aes256CbcDec::new_from_slices(key, iv)
      .map_err(cipher_error)?
      .decrypt_padded_vec_mut::<Pkcs7>(body)
      .map_err(cipher_error),
    n => Err(ReconstructionError::Cipher(format!("不支持的密钥长度: {}", n))),
  }
}

/// 加密分片，输出为 IV 与密文的拼接
pub(crate) fn encrypt_fragment(
  data: &[u8],
  key: &[u8],
  iv: &[u8; IV_LEN],
) -> Result<Vec<u8>, ReconstructionError> {
  let body = match key.len() {
    16 => Aes128CbcEnc::new_from_slices(key, iv)
      .map_err(cipher_error)?
      .encrypt_padded_vec_mut::<Pkcs7>(data),
    24 => Aes192CbcEnc::new_from_slices(key, iv)
      .map_err(cipher_error)?
      .encrypt_padded_vec_mut::<Pkcs7>(data),
    32 => Aes256CbcEnc::new_from_slices(key, iv)
      .map_err(cipher_error)?
      .encrypt_padded_vec_mut::<Pkcs7>(data),
    n => return Err(ReconstructionError::Cipher(format!("不支持的密钥长度: {}", n))),
  };

  let mut out = Vec::with_capacity(IV_LEN + body.len());
  out.extend_from_slice(iv);
  out.extend_from_slice(&body);
  Ok(out)
}

pub(super) unsafe extern "C" fn builtin_malloc(size: usize) -> *mut c_void {
  unsafe { libc::malloc(size) }
}

pub(super) unsafe extern "C" fn builtin_free(ptr: *mut c_void) {
  unsafe { libc::free(ptr) }
}

/// 解密指定分片，并按原顺序拼接所有分片
///
/// 失败时返回空指针，`out_len` 置 0；成功时返回的缓冲区需由 [`free_model`] 释放。
pub(super) unsafe extern "C" fn reconstruct_model(
  fragments: *const *const u8,
  lengths: *const i32,
  num_fragments: i32,
  encrypted_index: i32,
  key: *const u8,
  key_len: i32,
  out_len: *mut i32,
) -> *mut u8 {
  if out_len.is_null() {
    return std::ptr::null_mut();
  }
  unsafe { *out_len = 0 };

  if fragments.is_null()
    || lengths.is_null()
    || key.is_null()
    || num_fragments <= 0
    || key_len <= 0
    || encrypted_index < 0
    || encrypted_index >= num_fragments
  {
    return std::ptr::null_mut();
  }

  let count = num_fragments as usize;
  let (pointers, lengths, key) = unsafe {
    (
      std::slice::from_raw_parts(fragments, count),
      std::slice::from_raw_parts(lengths, count),
      std::slice::from_raw_parts(key, key_len as usize),
    )
  };

  let mut parts: Vec<Cow<'_, [u8]>> = Vec::with_capacity(count);
  for (index, (&ptr, &len)) in pointers.iter().zip(lengths).enumerate() {
    if ptr.is_null() || len <= 0 {
      return std::ptr::null_mut();
    }
    let data = unsafe { std::slice::from_raw_parts(ptr, len as usize) };
    if index == encrypted_index as usize {
      match decrypt_fragment(data, key) {
        Ok(plain) => parts.push(Cow::Owned(plain)),
        Err(_) => return std::ptr::null_mut(),
      }
    } else {
      parts.push(Cow::Borrowed(data));
    }
  }

  let total: usize = parts.iter().map(|p| p.len()).sum();
  let Ok(total_i32) = i32::try_from(total) else {
    return std::ptr::null_mut();
  };
  if total == 0 {
    return std::ptr::null_mut();
  }

  let out = unsafe { libc::malloc(total) } as *mut u8;
  if out.is_null() {
    return std::ptr::null_mut();
  }
  let mut offset = 0;
  for part in &parts {
    unsafe { std::ptr::copy_nonoverlapping(part.as_ptr(), out.add(offset), part.len()) };
    offset += part.len();
  }
  unsafe { *out_len = total_i32 };
  out
}

pub(super) unsafe extern "C" fn free_model(model: *mut u8) {
  unsafe { libc::free(model as *mut c_void) }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn encrypt_then_decrypt_restores_plaintext() {
    let key = [3u8; 24];
    let iv = [9u8; IV_LEN];
    let plain = b"fragment payload".repeat(5);

    let sealed = encrypt_fragment(&plain, &key, &iv).expect("加密");
    assert_eq!(&sealed[..IV_LEN], &iv);
    assert_eq!((sealed.len() - IV_LEN) % BLOCK_LEN, 0);
    assert_eq!(decrypt_fragment(&sealed, &key).expect("解密"), plain);
  }

  #[test]
  fn block_aligned_plaintext_gets_full_padding_block() {
    let key = [1u8; 16];
    let sealed = encrypt_fragment(&[0u8; 32], &key, &[0u8; IV_LEN]).expect("加密");
    assert_eq!(sealed.len(), IV_LEN + 48);
  }

  #[test]
  fn truncated_ciphertext_is_rejected() {
    let key = [1u8; 32];
    assert!(decrypt_fragment(&[0u8; IV_LEN], &key).is_err());
    assert!(decrypt_fragment(&[0u8; IV_LEN + 5], &key).is_err());
  }

  #[test]
  fn unsupported_key_length_is_rejected() {
    assert!(encrypt_fragment(b"x", &[0u8; 20], &[0u8; IV_LEN]).is_err());
  }
}
