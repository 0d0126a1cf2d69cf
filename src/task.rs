// 该文件是 Jiannan （剑南东川） 项目的一部分。
// src/task.rs - 请求调度与生命周期
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

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, mpsc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::context::{ContextError, ContextPool};
use crate::decode::{DecodeError, DecodeLimits, Decoder};
use crate::pipeline::{self, Deadline, PipelineError, PipelineResult};

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// 入站请求：载荷字节、声明类型与请求号。
///
/// 进入执行后由对应槽位独占，产生终态后即被丢弃。
#[derive(Debug)]
pub struct ImageRequest {
  pub id: u64,
  pub content_type: String,
  pub payload: Vec<u8>,
}

impl ImageRequest {
  pub fn new(content_type: impl Into<String>, payload: Vec<u8>) -> Self {
    Self {
      id: NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed),
      content_type: content_type.into(),
      payload,
    }
  }
}

/// 服务级错误分类，所有上游错误在生命周期边界收敛到这里。
#[derive(Error, Debug)]
pub enum ServiceError {
  #[error("图像解码失败: {0}")]
  Decode(#[from] DecodeError),
  #[error("引擎上下文耗尽: 等待 {waited_ms} 毫秒后仍不可用")]
  ResourceExhausted { waited_ms: u64 },
  #[error("服务过载: 等待队列已满 (上限 {queue_bound})")]
  Overloaded { queue_bound: usize },
  #[error("请求超时: 预算 {budget_ms} 毫秒")]
  Timeout { budget_ms: u64 },
  #[error("处理失败 (阶段 {stage}): {detail}")]
  Processing { stage: &'static str, detail: String },
}

impl ServiceError {
  /// 线上契约中的错误种类标识。
  pub fn kind(&self) -> &'static str {
    match self {
      ServiceError::Decode(e) => e.kind(),
      ServiceError::ResourceExhausted { .. } => "resource_exhausted",
      ServiceError::Overloaded { .. } => "overloaded",
      ServiceError::Timeout { .. } => "timeout",
      ServiceError::Processing { .. } => "processing",
    }
  }
}

impl From<ContextError> for ServiceError {
  fn from(err: ContextError) -> Self {
    match err {
      ContextError::Exhausted { waited_ms } => ServiceError::ResourceExhausted { waited_ms },
      ContextError::Init(e) => ServiceError::Processing {
        stage: "context",
        detail: e.to_string(),
      },
    }
  }
}

/// 每个请求恰好一个终态。
#[derive(Debug)]
pub enum RequestOutcome {
  Success(PipelineResult),
  Failure(ServiceError),
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
  /// 执行槽位数量，与上下文池容量一致
  pub workers: usize,
  /// 等待队列上限，超出即快速拒绝
  pub queue_bound: usize,
  /// 覆盖 解码 + 等待上下文 + 流水线 的单请求预算
  pub request_timeout: Duration,
  pub limits: DecodeLimits,
}

impl Default for ServiceConfig {
  fn default() -> Self {
    Self {
      workers: 2,
      queue_bound: 32,
      request_timeout: Duration::from_secs(10),
      limits: DecodeLimits::default(),
    }
  }
}

#[derive(Debug, Clone, Copy)]
enum SlotState {
  Idle,
  Decoding,
  AwaitingContext,
  Processing,
  Completing,
}

fn transition(slot: usize, request: u64, state: SlotState) {
  debug!("槽位 {} (请求 {}) -> {:?}", slot, request, state);
}

struct Job {
  request: ImageRequest,
  deadline: Deadline,
  reply: Sender<RequestOutcome>,
}

/// 等待某个请求终态的句柄。
pub struct OutcomeHandle {
  id: u64,
  deadline: Deadline,
  rx: Receiver<RequestOutcome>,
}

impl OutcomeHandle {
  pub fn id(&self) -> u64 {
    self.id
  }

  /// 阻塞等待终态。
  ///
  /// 截止时间先到即返回 `Timeout`；在途阶段会继续跑完，
  /// 其结果被丢弃，上下文照常由守卫归还。
  pub fn wait(self) -> RequestOutcome {
    match self.rx.recv_timeout(self.deadline.remaining()) {
      Ok(outcome) => outcome,
      Err(RecvTimeoutError::Timeout) => {
        debug!("请求 {} 超时, 在途结果将被丢弃", self.id);
        RequestOutcome::Failure(ServiceError::Timeout {
          budget_ms: self.deadline.budget().as_millis() as u64,
        })
      }
      Err(RecvTimeoutError::Disconnected) => RequestOutcome::Failure(ServiceError::Processing {
        stage: "dispatch",
        detail: "工作线程意外退出".to_string(),
      }),
    }
  }
}

/// 固定槽位的工作池与准入控制。
///
/// 槽位按 Idle → Decoding → AwaitingContext → Processing →
/// Completing → Idle 流转，失败路径同样回到 Idle，绝不滞留。
pub struct Dispatcher {
  tx: Option<SyncSender<Job>>,
  workers: Vec<JoinHandle<()>>,
  config: ServiceConfig,
}

impl Dispatcher {
  pub fn new(config: ServiceConfig, pool: Arc<ContextPool>) -> Self {
    let (tx, rx) = mpsc::sync_channel::<Job>(config.queue_bound);
    let shared_rx = Arc::new(Mutex::new(rx));

    let workers = (0..config.workers.max(1))
      .map(|slot| {
        let rx = shared_rx.clone();
        let pool = pool.clone();
        let decoder = Decoder::new(config.limits);
        thread::Builder::new()
          .name(format!("jiannan-worker-{slot}"))
          .spawn(move || worker_loop(slot, rx, pool, decoder))
          .expect("无法创建工作线程")
      })
      .collect();

    info!(
      "调度器启动: {} 个执行槽位, 队列上限 {}, 请求预算 {:?}",
      config.workers.max(1),
      config.queue_bound,
      config.request_timeout
    );

    Self {
      tx: Some(tx),
      workers,
      config,
    }
  }

  pub fn config(&self) -> &ServiceConfig {
    &self.config
  }

  /// 准入控制：队列有空位则接收，否则立即以 `Overloaded` 拒绝。
  pub fn submit(&self, request: ImageRequest) -> Result<OutcomeHandle, ServiceError> {
    let id = request.id;
    let deadline = Deadline::after(self.config.request_timeout);
    let (reply_tx, reply_rx) = mpsc::channel();

    let tx = self.tx.as_ref().expect("调度器已关闭");
    match tx.try_send(Job {
      request,
      deadline,
      reply: reply_tx,
    }) {
      Ok(()) => Ok(OutcomeHandle {
        id,
        deadline,
        rx: reply_rx,
      }),
      Err(TrySendError::Full(_)) => {
        warn!("请求 {} 被拒绝: 等待队列已满", id);
        Err(ServiceError::Overloaded {
          queue_bound: self.config.queue_bound,
        })
      }
      Err(TrySendError::Disconnected(_)) => Err(ServiceError::Processing {
        stage: "dispatch",
        detail: "工作线程已退出".to_string(),
      }),
    }
  }

  /// 生命周期入口：提交并等待，任何路径都恰好产生一个终态。
  pub fn handle(&self, request: ImageRequest) -> RequestOutcome {
    match self.submit(request) {
      Ok(handle) => handle.wait(),
      Err(e) => RequestOutcome::Failure(e),
    }
  }
}

impl Drop for Dispatcher {
  fn drop(&mut self) {
    // 关闭队列, 等待槽位清空
    drop(self.tx.take());
    for handle in self.workers.drain(..) {
      let _ = handle.join();
    }
  }
}

fn worker_loop(slot: usize, rx: Arc<Mutex<Receiver<Job>>>, pool: Arc<ContextPool>, decoder: Decoder) {
  loop {
    let job = {
      let guard = rx.lock().expect("任务队列互斥锁中毒");
      guard.recv()
    };
    let Ok(job) = job else {
      debug!("槽位 {} 收到关闭信号, 退出", slot);
      break;
    };

    let id = job.request.id;
    let outcome = execute(slot, job.request, &job.deadline, &pool, &decoder);
    // 调用方可能已超时离开, 此时结果被丢弃
    if job.reply.send(outcome).is_err() {
      debug!("请求 {} 的调用方已离开, 结果被丢弃", id);
    }
    transition(slot, id, SlotState::Idle);
  }
}

fn execute(
  slot: usize,
  request: ImageRequest,
  deadline: &Deadline,
  pool: &ContextPool,
  decoder: &Decoder,
) -> RequestOutcome {
  let id = request.id;

  transition(slot, id, SlotState::Decoding);
  let frame = match decoder.decode(&request.payload, &request.content_type) {
    Ok(frame) => frame,
    Err(e) => return RequestOutcome::Failure(ServiceError::Decode(e)),
  };
  // 载荷在解码后不再需要
  drop(request);

  if deadline.expired() {
    return RequestOutcome::Failure(ServiceError::Timeout {
      budget_ms: deadline.budget().as_millis() as u64,
    });
  }

  transition(slot, id, SlotState::AwaitingContext);
  let mut ctx = match pool.acquire(deadline.remaining()) {
    Ok(ctx) => ctx,
    Err(e) => return RequestOutcome::Failure(e.into()),
  };

  transition(slot, id, SlotState::Processing);
  let outcome = match pipeline::run(frame, &mut *ctx, deadline) {
    Ok(result) => RequestOutcome::Success(result),
    Err(PipelineError::Deadline(stage)) => {
      debug!("请求 {} 在 {} 阶段边界放弃", id, stage);
      RequestOutcome::Failure(ServiceError::Timeout {
        budget_ms: deadline.budget().as_millis() as u64,
      })
    }
    Err(PipelineError::Stage { stage, cause }) => RequestOutcome::Failure(ServiceError::Processing {
      stage,
      detail: cause.to_string(),
    }),
  };

  transition(slot, id, SlotState::Completing);
  // ctx 守卫在此归还上下文 —— 成功与失败路径一致
  drop(ctx);
  outcome
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::engine::{Engine, EngineBuilder, EngineError, Region, Tensor};

  struct EmptyEngine;

  impl Engine for EmptyEngine {
    fn name(&self) -> &'static str {
      "empty"
    }

    fn input_size(&self) -> (u32, u32) {
      (8, 8)
    }

    fn analyze(&mut self, _tensor: &Tensor) -> Result<Vec<Region>, EngineError> {
      Ok(Vec::new())
    }
  }

  struct EmptyBuilder;

  impl EngineBuilder for EmptyBuilder {
    fn build(&self) -> Result<Box<dyn Engine>, EngineError> {
      Ok(Box::new(EmptyEngine))
    }
  }

  fn png_bytes() -> Vec<u8> {
    let image = image::RgbImage::new(16, 16);
    let mut buffer = std::io::Cursor::new(Vec::new());
    image
      .write_to(&mut buffer, image::ImageFormat::Png)
      .expect("PNG 编码失败");
    buffer.into_inner()
  }

  #[test]
  fn valid_request_reaches_success() {
    let pool = Arc::new(ContextPool::new(1, Box::new(EmptyBuilder)));
    let dispatcher = Dispatcher::new(ServiceConfig::default(), pool);

    let outcome = dispatcher.handle(ImageRequest::new("image/png", png_bytes()));
    assert!(matches!(outcome, RequestOutcome::Success(_)));
  }

  #[test]
  fn decode_failure_becomes_failure_outcome() {
    let pool = Arc::new(ContextPool::new(1, Box::new(EmptyBuilder)));
    let dispatcher = Dispatcher::new(ServiceConfig::default(), pool.clone());

    let outcome = dispatcher.handle(ImageRequest::new("image/png", vec![0u8; 32]));
    match outcome {
      RequestOutcome::Failure(e) => assert_eq!(e.kind(), "malformed"),
      RequestOutcome::Success(_) => panic!("损坏载荷不应成功"),
    }
    // 解码失败不触碰上下文池
    assert_eq!(pool.built(), 0);
  }

  #[test]
  fn request_ids_are_unique() {
    let a = ImageRequest::new("image/png", Vec::new());
    let b = ImageRequest::new("image/png", Vec::new());
    assert_ne!(a.id, b.id);
  }
}
