//! 传输层核心定义
//!
//! 提供统一的字节传输抽象，支持串口（CM11 一类）和 USB（CM15 一类）两种后端。
//! 打开后端即得到拆分的读/写两半，读半由 Reader 线程独占，
//! 写半由发送路径与引擎应答共享。

use thiserror::Error;

pub mod serial;
pub mod usb;

pub use serial::SerialTransport;
pub use usb::UsbTransport;

/// 传输层统一错误类型
#[derive(Error, Debug)]
pub enum TransportError {
    /// IO 底层错误
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    /// 设备相关错误（设备未找到、已断开、被占用等）
    #[error("Device Error: {0}")]
    Device(#[from] DeviceError),

    /// 读取/写入超时（非致命，可以重试）
    #[error("Timeout")]
    Timeout,

    /// 解析中的缓冲区溢出（非致命，当前事件被丢弃）
    #[error("Buffer overflow")]
    BufferOverflow,
}

impl TransportError {
    /// 判断是否为瞬态错误
    ///
    /// 瞬态错误不触发重连；其余错误置位 I/O 错误标志，由监护线程重建连接。
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Timeout | TransportError::BufferOverflow)
    }
}

/// 设备/后端错误的结构化分类（不绑定具体后端实现）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceErrorKind {
    Unknown,
    /// 设备未找到/不存在（热拔插或枚举不到）
    NotFound,
    /// 设备已断开
    NoDevice,
    /// 权限不足/被拒绝
    AccessDenied,
    /// 资源忙/被占用
    Busy,
    /// 其他 IO/后端错误
    Backend,
}

/// 结构化设备错误：kind + message（保留人类可读信息，供日志/上层策略判断）
#[derive(Error, Debug, Clone)]
#[error("{kind:?}: {message}")]
pub struct DeviceError {
    pub kind: DeviceErrorKind,
    pub message: String,
}

impl DeviceError {
    pub fn new(kind: DeviceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// 判断是否为致命错误（设备已不可用，需要重连）
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind,
            DeviceErrorKind::NoDevice | DeviceErrorKind::AccessDenied | DeviceErrorKind::NotFound
        )
    }
}

/// 读半 Trait（Reader 线程独占）
///
/// 语义：
/// - 阻塞直到收到一段字节或超时
/// - 瞬态超时返回空序列（不是错误）
/// - 设备消失返回 `TransportError::Device`
pub trait TransportReader: Send {
    /// 读取一段入站字节（可能为空）
    fn read(&mut self) -> Result<Vec<u8>, TransportError>;
}

/// 写半 Trait（发送路径与引擎应答共享，外层加锁）
pub trait TransportWriter: Send {
    /// 写出完整载荷
    fn write(&mut self, data: &[u8]) -> Result<(), TransportError>;
}

/// 传输后端的读/写两半
pub type TransportPair = (Box<dyn TransportReader>, Box<dyn TransportWriter>);

/// 按端口名打开传输后端
///
/// 字面量 `"USB"` 选择 USB 后端，其余字符串按串口设备路径处理。
/// 打开成功后两种后端都已写出状态请求字节 `0x8B`。
pub fn open(port_name: &str) -> Result<TransportPair, TransportError> {
    if port_name == "USB" {
        UsbTransport::open()
    } else {
        SerialTransport::open(port_name)
    }
}
