// 该文件是 Jiannan （剑南东川） 项目的一部分。
// src/args.rs - 项目参数配置
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

use clap::Parser;
use url::Url;

/// Jiannan 服务参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 监听端口
  #[arg(long, default_value = "8000", value_name = "PORT")]
  pub port: u16,

  /// 执行槽位数量（同时也是引擎上下文池容量）
  #[arg(long, default_value = "2", value_name = "COUNT")]
  pub pool_size: usize,

  /// 单请求预算（毫秒），覆盖解码、等待上下文与流水线执行
  #[arg(long, default_value = "10000", value_name = "MS")]
  pub timeout_ms: u64,

  /// 载荷字节上限
  #[arg(long, default_value = "8388608", value_name = "BYTES")]
  pub max_payload: usize,

  /// 图像单边像素上限
  #[arg(long, default_value = "4096", value_name = "PIXELS")]
  pub max_dimension: u32,

  /// 等待队列上限，超出即以 503 快速拒绝
  #[arg(long, default_value = "32", value_name = "COUNT")]
  pub queue_bound: usize,

  /// 引擎 URL
  /// 支持方案:
  /// - blob: 阈值化连通域检测, 例 blob:?threshold=128&min-area=64
  #[arg(long, default_value = "blob:", value_name = "URL")]
  pub engine: Url,
}
