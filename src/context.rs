// 该文件是 Jiannan （剑南东川） 项目的一部分。
// src/context.rs - 引擎上下文池
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

use std::ops::{Deref, DerefMut};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

use crate::engine::{Engine, EngineBuilder, EngineError};

#[derive(Error, Debug)]
pub enum ContextError {
  #[error("引擎上下文耗尽: 等待 {waited_ms} 毫秒后仍不可用")]
  Exhausted { waited_ms: u64 },
  #[error("构造引擎上下文失败: {0}")]
  Init(#[from] EngineError),
}

/// 有界引擎上下文池。
///
/// 上下文在容量内惰性构造，只在池销毁（进程退出）时销毁。
/// 检出以 `ContextGuard` 表达：持有期内独占，离开作用域即归还，
/// 任何退出路径上都不会泄漏或二次归还。
pub struct ContextPool {
  state: Mutex<PoolState>,
  available: Condvar,
  capacity: usize,
  builder: Box<dyn EngineBuilder>,
}

struct PoolState {
  idle: Vec<Box<dyn Engine>>,
  built: usize,
}

impl ContextPool {
  pub fn new(capacity: usize, builder: Box<dyn EngineBuilder>) -> Self {
    Self {
      state: Mutex::new(PoolState {
        idle: Vec::with_capacity(capacity),
        built: 0,
      }),
      available: Condvar::new(),
      capacity,
      builder,
    }
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  /// 已构造的上下文数量。
  pub fn built(&self) -> usize {
    self.state.lock().expect("上下文池互斥锁中毒").built
  }

  /// 当前空闲（未被检出）的上下文数量。
  pub fn idle(&self) -> usize {
    self.state.lock().expect("上下文池互斥锁中毒").idle.len()
  }

  /// 检出一个上下文，最多等待 `timeout`。
  ///
  /// 池未满时在锁外构造新上下文；构造失败会退还名额并唤醒
  /// 其他等待者。
  pub fn acquire(&self, timeout: Duration) -> Result<ContextGuard<'_>, ContextError> {
    let deadline = Instant::now() + timeout;
    let mut state = self.state.lock().expect("上下文池互斥锁中毒");

    loop {
      if let Some(engine) = state.idle.pop() {
        debug!("检出上下文, 空闲 {}/{}", state.idle.len(), state.built);
        return Ok(ContextGuard {
          pool: self,
          engine: Some(engine),
        });
      }

      if state.built < self.capacity {
        state.built += 1;
        drop(state);
        match self.builder.build() {
          Ok(engine) => {
            debug!("惰性构造新上下文");
            return Ok(ContextGuard {
              pool: self,
              engine: Some(engine),
            });
          }
          Err(e) => {
            let mut state = self.state.lock().expect("上下文池互斥锁中毒");
            state.built -= 1;
            drop(state);
            self.available.notify_one();
            return Err(ContextError::Init(e));
          }
        }
      }

      let now = Instant::now();
      if now >= deadline {
        warn!("等待上下文超时 ({:?})", timeout);
        return Err(ContextError::Exhausted {
          waited_ms: timeout.as_millis() as u64,
        });
      }
      let (next, _) = self
        .available
        .wait_timeout(state, deadline - now)
        .expect("上下文池互斥锁中毒");
      state = next;
    }
  }

  fn put_back(&self, engine: Box<dyn Engine>) {
    let mut state = self.state.lock().expect("上下文池互斥锁中毒");
    state.idle.push(engine);
    debug!("归还上下文, 空闲 {}/{}", state.idle.len(), state.built);
    drop(state);
    self.available.notify_one();
  }
}

/// 作用域内独占持有的上下文，Drop 时归还到池。
pub struct ContextGuard<'a> {
  pool: &'a ContextPool,
  engine: Option<Box<dyn Engine>>,
}

impl std::fmt::Debug for ContextGuard<'_> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ContextGuard")
      .field("engine", &self.engine.is_some())
      .finish()
  }
}

impl Deref for ContextGuard<'_> {
  type Target = dyn Engine;

  fn deref(&self) -> &Self::Target {
    self.engine.as_deref().expect("上下文已被归还")
  }
}

impl DerefMut for ContextGuard<'_> {
  fn deref_mut(&mut self) -> &mut Self::Target {
    self.engine.as_deref_mut().expect("上下文已被归还")
  }
}

impl Drop for ContextGuard<'_> {
  fn drop(&mut self) {
    if let Some(engine) = self.engine.take() {
      self.pool.put_back(engine);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::engine::{Region, Tensor};

  struct NullEngine;

  impl Engine for NullEngine {
    fn name(&self) -> &'static str {
      "null"
    }

    fn input_size(&self) -> (u32, u32) {
      (8, 8)
    }

    fn analyze(&mut self, _tensor: &Tensor) -> Result<Vec<Region>, EngineError> {
      Ok(Vec::new())
    }
  }

  struct NullBuilder;

  impl EngineBuilder for NullBuilder {
    fn build(&self) -> Result<Box<dyn Engine>, EngineError> {
      Ok(Box::new(NullEngine))
    }
  }

  struct FailingBuilder;

  impl EngineBuilder for FailingBuilder {
    fn build(&self) -> Result<Box<dyn Engine>, EngineError> {
      Err(EngineError::Backend("设备不可用".to_string()))
    }
  }

  #[test]
  fn contexts_are_built_lazily_and_reused() {
    let pool = ContextPool::new(2, Box::new(NullBuilder));
    assert_eq!(pool.built(), 0);

    {
      let _a = pool.acquire(Duration::from_millis(10)).expect("检出失败");
      assert_eq!(pool.built(), 1);
      assert_eq!(pool.idle(), 0);
    }
    assert_eq!(pool.idle(), 1);

    // 再次检出复用已构造的上下文
    let _b = pool.acquire(Duration::from_millis(10)).expect("检出失败");
    assert_eq!(pool.built(), 1);
  }

  #[test]
  fn acquire_times_out_when_capacity_is_held() {
    let pool = ContextPool::new(1, Box::new(NullBuilder));
    let _held = pool.acquire(Duration::from_millis(10)).expect("检出失败");

    let err = pool.acquire(Duration::from_millis(20)).unwrap_err();
    assert!(matches!(err, ContextError::Exhausted { .. }));
  }

  #[test]
  fn failed_construction_releases_the_slot() {
    let pool = ContextPool::new(1, Box::new(FailingBuilder));
    assert!(matches!(
      pool.acquire(Duration::from_millis(10)),
      Err(ContextError::Init(_))
    ));
    // 名额被退还，后续检出仍会尝试构造而不是直接耗尽
    assert_eq!(pool.built(), 0);
    assert!(matches!(
      pool.acquire(Duration::from_millis(10)),
      Err(ContextError::Init(_))
    ));
  }
}
