//! 用户事件与订阅分发
//!
//! 事件处理器在 Reader 线程上同步调用，不得阻塞。
//! 处理器内的 panic 会被捕获、记录并吞掉，不会传播到引擎。

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;

use crate::manager::registry::X10Module;
use crate::protocol::{Command, HouseCode, SecurityEvent, UnitCode};

/// 对外事件
#[derive(Debug, Clone)]
pub enum X10Event {
    /// 连接就绪状态变化
    ConnectionStatus(bool),
    /// 模块属性变化（目前只有 "Level"）
    ModuleChanged {
        module: Arc<X10Module>,
        property: &'static str,
    },
    /// 解码出一个 PLC 地址字节
    PlcAddressReceived { house: HouseCode, unit: UnitCode },
    /// 解码出一个 PLC 功能字节
    PlcFunctionReceived { command: Command, house: HouseCode },
    /// 收到一段原始 RF 字节（去重后）
    RfDataReceived(Vec<u8>),
    /// 解码出一条 RF 标准设备命令
    RfCommandReceived {
        command: Command,
        house: HouseCode,
        unit: UnitCode,
    },
    /// 解码出一条 RF 安防事件
    RfSecurityReceived { event: SecurityEvent, address: u32 },
}

type Listener = Arc<dyn Fn(&X10Event) + Send + Sync>;

/// 事件分发器（进程内订阅列表）
#[derive(Default)]
pub struct EventDispatcher {
    listeners: RwLock<Vec<Listener>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册一个事件处理器
    pub fn subscribe(&self, listener: impl Fn(&X10Event) + Send + Sync + 'static) {
        self.listeners.write().push(Arc::new(listener));
    }

    /// 向所有处理器分发一个事件
    ///
    /// 在调用前克隆订阅列表，处理器内部可以安全地再订阅。
    pub(crate) fn dispatch(&self, event: &X10Event) {
        let listeners: Vec<Listener> = self.listeners.read().clone();
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                warn!("event handler panicked, ignoring");
            }
        }
    }
}
