//! X10 SDK - X10 家庭自动化驱动库
//!
//! 跨平台的 X10 电力线/射频控制器驱动，支持两种硬件控制器：
//!
//! - **串口控制器**（CM11 一类）：4800 波特异步串口，poll/ACK 帧协议
//! - **USB 控制器**（CM15 一类）：双 Bulk 端点（IN=0x81 / OUT=0x02），
//!   额外接收 RF 标准命令帧和 RF 安防事件帧
//!
//! # 架构层次
//!
//! - **传输层** (`transport`): 字节级 open/read/write，串口与 USB 两种后端
//! - **协议层** (`protocol`): 出站帧编码、入站帧分类与解码
//! - **管理层** (`manager`): 协议引擎（ACK 状态机、重发、RF 去重）、
//!   模块注册表（可观察的亮度镜像）、连接监护（断线重连）与对外 Facade

pub mod manager;
pub mod protocol;
pub mod transport;

// Re-export 核心类型（简化用户导入）
pub use manager::{ModuleRegistry, X10Config, X10Error, X10Event, X10Manager, X10Module};
pub use protocol::{Command, HouseCode, ProtocolError, SecurityEvent, UnitCode};
pub use transport::{TransportError, TransportReader, TransportWriter};
