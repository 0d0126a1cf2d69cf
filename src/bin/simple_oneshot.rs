// 该文件是 Jiannan （剑南东川） 项目的一部分。
// src/bin/simple_oneshot.rs - 单次推理
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

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use image::ImageFormat;
use tracing::info;
use url::Url;

use jiannan::context::ContextPool;
use jiannan::decode::Decoder;
use jiannan::engine;
use jiannan::pipeline::{self, Deadline};

/// Jiannan 单次推理参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 输入图像文件路径 (PNG/JPEG)
  #[arg(long, value_name = "FILE")]
  pub input: PathBuf,

  /// 引擎 URL
  #[arg(long, default_value = "blob:", value_name = "URL")]
  pub engine: Url,

  /// 单次执行预算（毫秒）
  #[arg(long, default_value = "10000", value_name = "MS")]
  pub timeout_ms: u64,

  /// 保存标注图像的路径
  #[cfg(feature = "render")]
  #[arg(long, value_name = "FILE")]
  pub output: Option<PathBuf>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("输入文件: {}", args.input.display());
  info!("引擎: {}", args.engine);

  let bytes = std::fs::read(&args.input)?;
  let declared = ImageFormat::from_path(&args.input)?.to_mime_type();

  let decoder = Decoder::default();
  let frame = decoder.decode(&bytes, declared)?;
  info!("帧尺寸: {}x{}", frame.width(), frame.height());

  let builder = engine::builder_from_url(&args.engine)?;
  let pool = ContextPool::new(1, builder);
  let deadline = Deadline::after(Duration::from_millis(args.timeout_ms));
  let mut ctx = pool.acquire(deadline.remaining())?;

  #[cfg(feature = "render")]
  let kept = frame.clone();

  info!("开始推理...");
  let now = std::time::Instant::now();
  let result = pipeline::run(frame, &mut *ctx, &deadline)?;
  info!("推理完成, 耗时: {:.2?}", now.elapsed());
  drop(ctx);

  println!("{}", serde_json::to_string_pretty(&result)?);

  #[cfg(feature = "render")]
  if let Some(path) = &args.output {
    let image = jiannan::render::annotate(&kept, &result.regions);
    image.save(path)?;
    info!("标注图像已保存: {}", path.display());
  }

  Ok(())
}
