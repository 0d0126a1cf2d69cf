// 该文件是 Jiannan （剑南东川） 项目的一部分。
// src/engine.rs - 推理引擎定义
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

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::frame::{RGB_CHANNELS, RgbFrame};

#[cfg(feature = "engine_blob")]
mod blob;
#[cfg(feature = "engine_blob")]
pub use self::blob::{BlobConfigError, BlobEngine, BlobEngineBuilder};

/// 推理引擎，即上下文池中被检出的上下文。
///
/// `analyze` 取 `&mut self`：对底层库的调用只能通过独占检出的
/// 上下文进行，不做任何并发假设。
pub trait Engine: Send {
  fn name(&self) -> &'static str;

  /// 引擎期望的输入尺寸 (宽, 高)
  fn input_size(&self) -> (u32, u32);

  fn analyze(&mut self, tensor: &Tensor) -> Result<Vec<Region>, EngineError>;
}

/// 按需构造引擎上下文，由上下文池在容量内惰性调用。
pub trait EngineBuilder: Send + Sync {
  fn build(&self) -> Result<Box<dyn Engine>, EngineError>;
}

#[derive(Error, Debug)]
pub enum EngineError {
  #[error("张量形状不匹配: 期望 {expected} 字节, 实际 {actual} 字节")]
  ShapeMismatch { expected: usize, actual: usize },
  #[error("引擎故障: {0}")]
  Backend(String),
}

/// 变换阶段产出的 NHWC 字节张量。
#[derive(Debug, Clone)]
pub struct Tensor {
  data: Box<[u8]>,
  width: u32,
  height: u32,
  channels: usize,
}

impl Tensor {
  pub fn from_frame(frame: RgbFrame) -> Self {
    let width = frame.width();
    let height = frame.height();
    Self {
      data: frame.into_nhwc(),
      width,
      height,
      channels: RGB_CHANNELS,
    }
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn channels(&self) -> usize {
    self.channels
  }

  pub fn as_nhwc(&self) -> &[u8] {
    &self.data
  }

  pub fn expected_len(&self) -> usize {
    self.channels * (self.width as usize) * (self.height as usize)
  }
}

/// 单个检出区域。
///
/// bbox 为归一化 [x_min, y_min, x_max, y_max]，原点在图像左上角，
/// 相对原始图像；score 取值 [0, 1]；area 为模型输入空间的像素数。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
  pub label: String,
  pub score: f32,
  pub bbox: [f32; 4],
  pub area: u32,
}

#[derive(Error, Debug)]
pub enum EngineSelectError {
  #[error("未知的引擎方案: {0}")]
  UnknownScheme(String),
  #[cfg(feature = "engine_blob")]
  #[error("Blob 引擎配置错误: {0}")]
  Blob(#[from] BlobConfigError),
}

/// 按 URL 方案选择引擎构造器。
pub fn builder_from_url(url: &Url) -> Result<Box<dyn EngineBuilder>, EngineSelectError> {
  #[cfg(feature = "engine_blob")]
  {
    use crate::{FromUrl, FromUrlWithScheme};
    if url.scheme() == BlobEngineBuilder::SCHEME {
      return Ok(Box::new(BlobEngineBuilder::from_url(url)?));
    }
  }

  Err(EngineSelectError::UnknownScheme(url.scheme().to_string()))
}
