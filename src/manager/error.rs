//! 管理层错误类型定义

use crate::protocol::ProtocolError;
use crate::transport::TransportError;
use thiserror::Error;

/// 管理层错误类型
#[derive(Error, Debug)]
pub enum X10Error {
    /// 传输层错误
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// 协议解析错误
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// 当前没有打开的连接
    #[error("Not connected")]
    NotConnected,

    /// 房屋码配置无法解析
    #[error("Invalid house code list: {0:?}")]
    InvalidHouseCodes(String),
}
