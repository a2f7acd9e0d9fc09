//! 管理层模块
//!
//! 管理层是 SDK 的核心业务逻辑层，负责：
//! - 发送路径：命令锁串行化 + ACK/校验和状态机 + 超时重发
//! - Reader 线程：入站帧分类、解码、注册表更新与事件分发
//! - 模块注册表：每个可寻址单元最近一次已知亮度的可观察镜像
//! - 连接监护：I/O 错误后自动重建会话（热插拔友好）
//! - 对外 Facade：`X10Manager`

mod config;
mod context;
mod error;
mod events;
mod manager_impl;
mod reader;
mod registry;
mod supervisor;
mod transmit;

pub use config::X10Config;
pub use error::X10Error;
pub use events::X10Event;
pub use manager_impl::X10Manager;
pub use registry::{ModuleRegistry, X10Module};
