// 该文件是 Jiannan （剑南东川） 项目的一部分。
// src/decode.rs - 图像载荷解码
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

use std::io::Cursor;

use image::{ImageFormat, ImageReader};
use thiserror::Error;
use tracing::debug;

use crate::frame::RgbFrame;

#[derive(Error, Debug)]
pub enum DecodeError {
  #[error("图像数据损坏: {0}")]
  Malformed(String),
  #[error("不支持的图像类型: {0}")]
  Unsupported(String),
  #[error("图像超出限制: {0}")]
  TooLarge(String),
}

impl DecodeError {
  pub fn kind(&self) -> &'static str {
    match self {
      DecodeError::Malformed(_) => "malformed",
      DecodeError::Unsupported(_) => "unsupported",
      DecodeError::TooLarge(_) => "too_large",
    }
  }
}

/// 解码上限。字节数在任何解码动作之前检查，
/// 像素尺寸在分配像素缓冲之前检查（头部信息即可得到）。
#[derive(Debug, Clone, Copy)]
pub struct DecodeLimits {
  pub max_bytes: usize,
  pub max_dimension: u32,
}

impl Default for DecodeLimits {
  fn default() -> Self {
    Self {
      max_bytes: 8 * 1024 * 1024,
      max_dimension: 4096,
    }
  }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Decoder {
  limits: DecodeLimits,
}

impl Decoder {
  pub fn new(limits: DecodeLimits) -> Self {
    Self { limits }
  }

  pub fn limits(&self) -> &DecodeLimits {
    &self.limits
  }

  /// 把载荷字节解码为 RGB 帧。
  ///
  /// 声明类型必须与字节的魔数一致；超出字节或尺寸上限的载荷
  /// 在分配像素内存之前即被拒绝。失败不会产生部分帧。
  pub fn decode(&self, bytes: &[u8], declared_type: &str) -> Result<RgbFrame, DecodeError> {
    if bytes.len() > self.limits.max_bytes {
      return Err(DecodeError::TooLarge(format!(
        "载荷 {} 字节, 上限 {} 字节",
        bytes.len(),
        self.limits.max_bytes
      )));
    }

    let declared = ImageFormat::from_mime_type(declared_type)
      .ok_or_else(|| DecodeError::Unsupported(declared_type.to_string()))?;
    if !matches!(declared, ImageFormat::Png | ImageFormat::Jpeg) {
      return Err(DecodeError::Unsupported(declared_type.to_string()));
    }

    let sniffed = image::guess_format(bytes)
      .map_err(|e| DecodeError::Malformed(format!("无法识别图像头: {}", e)))?;
    if sniffed != declared {
      return Err(DecodeError::Malformed(format!(
        "声明类型为 {:?}, 字节魔数为 {:?}",
        declared, sniffed
      )));
    }

    // 仅读取头部取得尺寸，炸弹式载荷到此为止
    let (width, height) = ImageReader::with_format(Cursor::new(bytes), declared)
      .into_dimensions()
      .map_err(|e| DecodeError::Malformed(format!("无法读取图像尺寸: {}", e)))?;
    if width == 0 || height == 0 {
      return Err(DecodeError::Malformed(format!(
        "图像尺寸无效: {}x{}",
        width, height
      )));
    }
    if width > self.limits.max_dimension || height > self.limits.max_dimension {
      return Err(DecodeError::TooLarge(format!(
        "图像 {}x{}, 单边上限 {}",
        width, height, self.limits.max_dimension
      )));
    }

    let image = ImageReader::with_format(Cursor::new(bytes), declared)
      .decode()
      .map_err(|e| DecodeError::Malformed(format!("解码失败: {}", e)))?;
    debug!("解码完成: {}x{} ({:?})", width, height, declared);

    Ok(RgbFrame::from(image.to_rgb8()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::RgbImage;

  fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::new(width, height);
    let mut buffer = Cursor::new(Vec::new());
    image
      .write_to(&mut buffer, ImageFormat::Png)
      .expect("PNG 编码失败");
    buffer.into_inner()
  }

  #[test]
  fn valid_png_decodes_within_limits() {
    let decoder = Decoder::default();
    let frame = decoder.decode(&png_bytes(16, 8), "image/png").expect("应当解码成功");
    assert_eq!(frame.width(), 16);
    assert_eq!(frame.height(), 8);
  }

  #[test]
  fn payload_over_byte_limit_is_too_large() {
    let decoder = Decoder::new(DecodeLimits {
      max_bytes: 16,
      max_dimension: 4096,
    });
    let err = decoder.decode(&png_bytes(16, 16), "image/png").unwrap_err();
    assert_eq!(err.kind(), "too_large");
  }

  #[test]
  fn dimensions_over_limit_are_too_large_before_decode() {
    let decoder = Decoder::new(DecodeLimits {
      max_bytes: 8 * 1024 * 1024,
      max_dimension: 16,
    });
    let err = decoder.decode(&png_bytes(32, 8), "image/png").unwrap_err();
    assert_eq!(err.kind(), "too_large");
  }

  #[test]
  fn garbage_bytes_are_malformed() {
    let decoder = Decoder::default();
    let err = decoder.decode(&[0u8; 64], "image/png").unwrap_err();
    assert_eq!(err.kind(), "malformed");
  }

  #[test]
  fn declared_type_must_match_magic_bytes() {
    let decoder = Decoder::default();
    let err = decoder.decode(&png_bytes(8, 8), "image/jpeg").unwrap_err();
    assert_eq!(err.kind(), "malformed");
  }

  #[test]
  fn unknown_content_type_is_unsupported() {
    let decoder = Decoder::default();
    let err = decoder.decode(&png_bytes(8, 8), "image/bmp").unwrap_err();
    assert_eq!(err.kind(), "unsupported");
  }
}
