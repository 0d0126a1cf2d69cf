// 该文件是 Jiannan （剑南东川） 项目的一部分。
// src/pipeline.rs - 处理流水线
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

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use image::imageops::FilterType;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::engine::{Engine, EngineError, Region, Tensor};
use crate::frame::RgbFrame;

pub const STAGE_NORMALIZE: &str = "normalize";
pub const STAGE_TRANSFORM: &str = "transform";
pub const STAGE_ANALYZE: &str = "analyze";

/// 请求级截止时间，覆盖解码、等待上下文与流水线执行。
///
/// 取消是协作式的：只在阶段边界检查，绝不打断正在执行的阶段。
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
  at: Instant,
  budget: Duration,
}

impl Deadline {
  pub fn after(budget: Duration) -> Self {
    Self {
      at: Instant::now() + budget,
      budget,
    }
  }

  pub fn budget(&self) -> Duration {
    self.budget
  }

  pub fn remaining(&self) -> Duration {
    self.at.saturating_duration_since(Instant::now())
  }

  pub fn expired(&self) -> bool {
    Instant::now() >= self.at
  }
}

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("截止时间已到, 放弃 {0} 阶段")]
  Deadline(&'static str),
  #[error("阶段 {stage} 失败: {cause}")]
  Stage {
    stage: &'static str,
    #[source]
    cause: EngineError,
  },
}

/// 各阶段耗时，单位微秒。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageTimings {
  pub normalize_us: u64,
  pub transform_us: u64,
  pub analyze_us: u64,
  pub total_us: u64,
}

/// 一次流水线执行的结构化结果，即对外的线上契约。
///
/// bbox 归一化到 [0, 1]，原点在原始图像左上角；score 取值 [0, 1]。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
  pub engine: String,
  pub width: u32,
  pub height: u32,
  pub regions: Vec<Region>,
  pub timing: StageTimings,
  pub finished_at: DateTime<Utc>,
}

fn ensure_alive(deadline: &Deadline, stage: &'static str) -> Result<(), PipelineError> {
  if deadline.expired() {
    return Err(PipelineError::Deadline(stage));
  }
  Ok(())
}

/// 归一化阶段：缩放到引擎输入尺寸。
///
/// 整幅缩放（不保留纵横比），因此模型空间的归一化坐标
/// 与原始图像的归一化坐标一致。
fn normalize(frame: RgbFrame, width: u32, height: u32) -> RgbFrame {
  if frame.width() == width && frame.height() == height {
    return frame;
  }
  let resized = image::imageops::resize(&frame.to_rgb_image(), width, height, FilterType::Triangle);
  RgbFrame::from(resized)
}

/// 对一帧执行 归一化 → 变换 → 分析。
///
/// 帧在本次执行内被消耗；上下文仅在调用期间被借用。任一阶段失败
/// 即放弃其余阶段，不返回部分结果。
pub fn run(
  frame: RgbFrame,
  engine: &mut dyn Engine,
  deadline: &Deadline,
) -> Result<PipelineResult, PipelineError> {
  let source_width = frame.width();
  let source_height = frame.height();
  let started = Instant::now();

  ensure_alive(deadline, STAGE_NORMALIZE)?;
  let now = Instant::now();
  let (input_width, input_height) = engine.input_size();
  let normalized = normalize(frame, input_width, input_height);
  let normalize_us = now.elapsed().as_micros() as u64;

  ensure_alive(deadline, STAGE_TRANSFORM)?;
  let now = Instant::now();
  let tensor = Tensor::from_frame(normalized);
  let transform_us = now.elapsed().as_micros() as u64;

  ensure_alive(deadline, STAGE_ANALYZE)?;
  let now = Instant::now();
  let regions = engine.analyze(&tensor).map_err(|cause| PipelineError::Stage {
    stage: STAGE_ANALYZE,
    cause,
  })?;
  let analyze_us = now.elapsed().as_micros() as u64;

  debug!(
    "流水线完成: {} 个区域, 耗时 {:.2?}",
    regions.len(),
    started.elapsed()
  );

  Ok(PipelineResult {
    engine: engine.name().to_string(),
    width: source_width,
    height: source_height,
    regions,
    timing: StageTimings {
      normalize_us,
      transform_us,
      analyze_us,
      total_us: started.elapsed().as_micros() as u64,
    },
    finished_at: Utc::now(),
  })
}
