// 该文件是 Jiannan （剑南东川） 项目的一部分。
// src/engine/blob.rs - 连通域斑块引擎
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

use std::collections::HashMap;

use image::{GrayImage, Luma};
use imageproc::region_labelling::{Connectivity, connected_components};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  engine::{Engine, EngineBuilder, EngineError, Region, Tensor},
};

const BLOB_INPUT_W: u32 = 512;
const BLOB_INPUT_H: u32 = 512;
const BLOB_DEFAULT_THRESHOLD: u8 = 128;
const BLOB_DEFAULT_MIN_AREA: u32 = 64;
const BLOB_DEFAULT_MAX_REGIONS: usize = 64;
const BLOB_LABEL: &str = "blob";

#[derive(Error, Debug)]
pub enum BlobConfigError {
  #[error("引擎 URL 必须使用 {0} 方案, 实际为 {1}")]
  SchemeMismatch(&'static str, String),
  #[error("引擎参数 {name} 的值无效: {value}")]
  BadValue { name: String, value: String },
  #[error("未知的引擎参数: {0}")]
  UnknownParam(String),
}

/// 斑块引擎构造器，经 `blob:?threshold=..&min-area=..&max-regions=..` 配置。
#[derive(Debug, Clone)]
pub struct BlobEngineBuilder {
  threshold: u8,
  min_area: u32,
  max_regions: usize,
}

impl Default for BlobEngineBuilder {
  fn default() -> Self {
    Self {
      threshold: BLOB_DEFAULT_THRESHOLD,
      min_area: BLOB_DEFAULT_MIN_AREA,
      max_regions: BLOB_DEFAULT_MAX_REGIONS,
    }
  }
}

impl FromUrlWithScheme for BlobEngineBuilder {
  const SCHEME: &'static str = "blob";
}

impl FromUrl for BlobEngineBuilder {
  type Error = BlobConfigError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(BlobConfigError::SchemeMismatch(
        Self::SCHEME,
        url.scheme().to_string(),
      ));
    }

    let mut builder = Self::default();
    for (name, value) in url.query_pairs() {
      let bad = || BlobConfigError::BadValue {
        name: name.to_string(),
        value: value.to_string(),
      };
      match name.as_ref() {
        "threshold" => builder.threshold = value.parse().map_err(|_| bad())?,
        "min-area" => builder.min_area = value.parse().map_err(|_| bad())?,
        "max-regions" => builder.max_regions = value.parse().map_err(|_| bad())?,
        other => return Err(BlobConfigError::UnknownParam(other.to_string())),
      }
    }

    Ok(builder)
  }
}

impl EngineBuilder for BlobEngineBuilder {
  fn build(&self) -> Result<Box<dyn Engine>, EngineError> {
    debug!(
      "构造斑块引擎: threshold={} min_area={} max_regions={}",
      self.threshold, self.min_area, self.max_regions
    );
    Ok(Box::new(BlobEngine {
      threshold: self.threshold,
      min_area: self.min_area,
      max_regions: self.max_regions,
    }))
  }
}

/// 阈值化 + 八连通域标记的斑块检测。
///
/// 占据引擎插槽的默认实现；NPU 一类的原生后端以同样的方式
/// 实现 `Engine` 即可替换。
pub struct BlobEngine {
  threshold: u8,
  min_area: u32,
  max_regions: usize,
}

struct Extent {
  min_x: u32,
  min_y: u32,
  max_x: u32,
  max_y: u32,
  count: u32,
}

impl Engine for BlobEngine {
  fn name(&self) -> &'static str {
    "blob"
  }

  fn input_size(&self) -> (u32, u32) {
    (BLOB_INPUT_W, BLOB_INPUT_H)
  }

  fn analyze(&mut self, tensor: &Tensor) -> Result<Vec<Region>, EngineError> {
    let expected = tensor.expected_len();
    let actual = tensor.as_nhwc().len();
    if expected != actual || (tensor.width(), tensor.height()) != self.input_size() {
      return Err(EngineError::ShapeMismatch { expected, actual });
    }

    let width = tensor.width();
    let height = tensor.height();
    let data = tensor.as_nhwc();

    // 灰度 + 阈值化为二值图
    let mut binary = GrayImage::new(width, height);
    for y in 0..height {
      for x in 0..width {
        let idx = ((y * width + x) as usize) * tensor.channels();
        let luma = (299 * data[idx] as u32 + 587 * data[idx + 1] as u32 + 114 * data[idx + 2] as u32)
          / 1000;
        let value = if luma as u8 > self.threshold { 255 } else { 0 };
        binary.put_pixel(x, y, Luma([value]));
      }
    }

    let labels = connected_components(&binary, Connectivity::Eight, Luma([0u8]));

    // 逐标签累计包围盒
    let mut extents: HashMap<u32, Extent> = HashMap::new();
    for (x, y, pixel) in labels.enumerate_pixels() {
      let label = pixel[0];
      if label == 0 {
        continue;
      }
      extents
        .entry(label)
        .and_modify(|e| {
          e.min_x = e.min_x.min(x);
          e.min_y = e.min_y.min(y);
          e.max_x = e.max_x.max(x);
          e.max_y = e.max_y.max(y);
          e.count += 1;
        })
        .or_insert(Extent {
          min_x: x,
          min_y: y,
          max_x: x,
          max_y: y,
          count: 1,
        });
    }

    let mut regions: Vec<Region> = extents
      .into_values()
      .filter(|e| e.count >= self.min_area)
      .map(|e| {
        let box_w = e.max_x - e.min_x + 1;
        let box_h = e.max_y - e.min_y + 1;
        let fill = e.count as f32 / (box_w * box_h) as f32;
        Region {
          label: BLOB_LABEL.to_string(),
          score: fill.clamp(0.0, 1.0),
          bbox: [
            e.min_x as f32 / width as f32,
            e.min_y as f32 / height as f32,
            (e.max_x + 1) as f32 / width as f32,
            (e.max_y + 1) as f32 / height as f32,
          ],
          area: e.count,
        }
      })
      .collect();

    regions.sort_by(|a, b| b.area.cmp(&a.area));
    regions.truncate(self.max_regions);

    debug!("检出 {} 个斑块", regions.len());
    Ok(regions)
  }
}
