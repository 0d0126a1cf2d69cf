// 该文件是 Jiannan （剑南东川） 项目的一部分。
// src/main.rs - 服务主程序
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

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

use jiannan::args::Args;
use jiannan::context::ContextPool;
use jiannan::decode::DecodeLimits;
use jiannan::engine;
use jiannan::server;
use jiannan::task::{Dispatcher, ServiceConfig};

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("引擎: {}", args.engine);
  info!("槽位数量: {}", args.pool_size);
  info!("请求预算: {} 毫秒", args.timeout_ms);

  let builder = engine::builder_from_url(&args.engine)?;
  let pool = Arc::new(ContextPool::new(args.pool_size, builder));

  let config = ServiceConfig {
    workers: args.pool_size,
    queue_bound: args.queue_bound,
    request_timeout: Duration::from_millis(args.timeout_ms),
    limits: DecodeLimits {
      max_bytes: args.max_payload,
      max_dimension: args.max_dimension,
    },
  };
  let dispatcher = Arc::new(Dispatcher::new(config, pool));

  let app = server::router(dispatcher);
  let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
  let listener = TcpListener::bind(addr).await?;
  info!("服务启动: http://{}", addr);

  axum::serve(listener, app)
    .with_graceful_shutdown(async {
      let _ = tokio::signal::ctrl_c().await;
      info!("收到中断信号, 开始退出");
    })
    .await?;

  info!("服务退出");
  Ok(())
}
