//! 链路共享上下文
//!
//! 调用者线程（发送路径）、Reader 线程和监护线程共享的全部状态：
//! 命令锁、ACK 监视器（互斥量 + 条件变量）、I/O 错误标志、
//! 写半句柄、模块注册表与事件分发器。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::Local;
use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{trace, warn};

use crate::manager::config::X10Config;
use crate::manager::error::X10Error;
use crate::manager::events::{EventDispatcher, X10Event};
use crate::manager::registry::ModuleRegistry;
use crate::protocol::{HouseCode, encode};
use crate::transport::TransportWriter;

/// 协议链路状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LinkState {
    /// 空闲，可以发送
    Ready,
    /// 串口后端：等待控制器回显校验和
    WaitingChecksum,
    /// 等待控制器确认字节 0x55
    WaitingAck,
    /// 已应答短轮询，等待控制器下发数据帧
    WaitingPollReply,
}

/// ACK 监视器保护的发送状态
pub(crate) struct AckState {
    pub state: LinkState,
    /// 串口后端期望的校验和（前两字节之和的低 8 位）
    pub expected_checksum: u8,
    /// 最近一次发送的帧（超时重发用）
    pub last_sent: Vec<u8>,
    /// 本次等待的起点
    pub wait_start: Instant,
}

impl AckState {
    fn new() -> Self {
        Self {
            state: LinkState::Ready,
            expected_checksum: 0,
            last_sent: Vec::new(),
            wait_start: Instant::now(),
        }
    }
}

/// 链路共享上下文
pub(crate) struct LinkContext {
    pub config: RwLock<X10Config>,
    /// 串行化整个命令序列（地址帧 + 功能帧作为原子单元下发）
    pub command_lock: Mutex<()>,
    /// ACK 监视器：单次 发送→确认 交换期间的状态
    pub ack: Mutex<AckState>,
    /// Reader 观察到状态迁移时唤醒发送路径
    pub ack_signal: Condvar,
    /// Reader/写路径置位、监护线程消费的 I/O 错误标志
    pub io_error: AtomicBool,
    /// 连接就绪闩锁（首个轮询/状态响应到达时置位）
    ready: AtomicBool,
    /// 当前后端是否为 USB（决定 ACK 机制和 Dim 帧变体）
    pub usb_backend: AtomicBool,
    /// 时间基准（时间戳以毫秒偏移存储，便于原子读写）
    epoch: Instant,
    last_rx_ms: AtomicU64,
    /// 传输写半（发送路径与 Reader 应答共享）
    pub writer: Mutex<Option<Box<dyn TransportWriter>>>,
    pub events: Arc<EventDispatcher>,
    pub registry: ModuleRegistry,
}

impl LinkContext {
    pub fn new(config: X10Config) -> Arc<Self> {
        let events = Arc::new(EventDispatcher::new());
        let registry = ModuleRegistry::new(events.clone());
        registry.rebuild(&config.house_codes);
        let usb = config.is_usb();

        Arc::new(Self {
            config: RwLock::new(config),
            command_lock: Mutex::new(()),
            ack: Mutex::new(AckState::new()),
            ack_signal: Condvar::new(),
            io_error: AtomicBool::new(false),
            ready: AtomicBool::new(false),
            usb_backend: AtomicBool::new(usb),
            epoch: Instant::now(),
            last_rx_ms: AtomicU64::new(0),
            writer: Mutex::new(None),
            events,
            registry,
        })
    }

    /// 刷新最近入站时间戳（宏帧/RF 帧到达时调用，驱动发送速率限制）
    pub fn touch_rx(&self) {
        // 0 保留为"从未收到"的哨兵值
        let now = self.epoch.elapsed().as_millis() as u64;
        self.last_rx_ms.store(now.max(1), Ordering::Relaxed);
    }

    /// 距最近一次入站的时间（从未收到过字节时返回一个大值）
    pub fn since_last_rx(&self) -> Duration {
        let last = self.last_rx_ms.load(Ordering::Relaxed);
        if last == 0 {
            return Duration::from_secs(u64::MAX >> 32);
        }
        let now = self.epoch.elapsed().as_millis() as u64;
        Duration::from_millis(now.saturating_sub(last))
    }

    /// 通过写半直接写出一段字节（不经过 ACK 状态机）
    ///
    /// 非瞬态的传输错误置位 I/O 错误标志，交给监护线程重连。
    pub fn write_raw(&self, data: &[u8]) -> Result<(), X10Error> {
        let mut writer = self.writer.lock();
        let Some(writer) = writer.as_mut() else {
            return Err(X10Error::NotConnected);
        };
        match writer.write(data) {
            Ok(()) => {
                trace!("TX {:02X?}", data);
                Ok(())
            },
            Err(e) => {
                if !e.is_transient() {
                    warn!("transport write failed: {}", e);
                    self.io_error.store(true, Ordering::SeqCst);
                }
                Err(e.into())
            },
        }
    }

    /// 写入就绪闩锁，状态变化时发出 `ConnectionStatus` 事件
    pub fn set_ready(&self, ready: bool) {
        let previous = self.ready.swap(ready, Ordering::SeqCst);
        if previous != ready {
            self.events.dispatch(&X10Event::ConnectionStatus(ready));
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// 连接是否可用（已就绪且没有未处理的 I/O 错误）
    pub fn is_connected(&self) -> bool {
        self.is_ready() && !self.io_error.load(Ordering::SeqCst)
    }

    /// 重置 ACK 状态机（新会话安装时调用）
    pub fn reset_link(&self) {
        let mut ack = self.ack.lock();
        ack.state = LinkState::Ready;
        ack.last_sent.clear();
        ack.expected_checksum = 0;
        self.ack_signal.notify_all();
    }

    /// 下发时间帧（就绪指示、0xA5 请求与 USB 初始化序列共用）
    pub fn send_time_set(&self, battery_clear: bool) {
        let house = {
            let config = self.config.read();
            config.house_codes.first().copied().unwrap_or(HouseCode::A)
        };
        let usb = self.usb_backend.load(Ordering::SeqCst);
        let frame = encode::time_set_frame(&Local::now().naive_local(), house, battery_clear, usb);
        if let Err(e) = self.write_raw(&frame) {
            warn!("failed to send time set frame: {}", e);
        }
    }
}
