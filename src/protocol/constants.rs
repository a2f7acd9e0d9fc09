//! 协议常量定义
//!
//! 集中定义所有帧类型字节和时序常量，避免在代码中散落"魔法数"。

use std::time::Duration;

/// 出站地址帧头（`[0x04, house|unit]`）
pub const FRAME_ADDRESS: u8 = 0x04;

/// 出站功能帧头（`[0x06, house|function]`）
pub const FRAME_FUNCTION: u8 = 0x06;

/// 控制器确认字节（命令被接受）
pub const PLC_READY: u8 = 0x55;

/// PLC 轮询字节（短帧）/ PLC 数据帧前导字节（长帧）
pub const PLC_POLL: u8 = 0x5A;

/// 滤波失败轮询字节（原样回复）
pub const PLC_FILTER_FAIL_POLL: u8 = 0xF3;

/// 宏帧前导字节（无语义效果，仅刷新接收时间戳）
pub const FRAME_MACRO: u8 = 0x5B;

/// RF 帧前导字节（标准命令 6 字节 / 安防事件 8 字节）
pub const FRAME_RF: u8 = 0x5D;

/// 控制器请求下发时间
pub const PLC_TIME_REQUEST: u8 = 0xA5;

/// 主机对 PLC 轮询的应答字节
pub const PLC_REPLY_TO_POLL: u8 = 0xC3;

/// 时间下发帧头（串口/USB 共用）
pub const FRAME_TIME_SET: u8 = 0x9B;

/// USB 监听房屋码配置帧头
pub const FRAME_MONITORED_CODES: u8 = 0xBB;

/// 状态请求字节（打开连接后立即发送）
pub const STATUS_REQUEST: u8 = 0x8B;

/// 校验和应答字节（主机确认控制器回显）
pub const CHECKSUM_ACK: u8 = 0x00;

/// RF 帧第二字节：标准设备命令
pub const RF_PREFIX_STANDARD: u8 = 0x20;

/// RF 帧第二字节：安防事件
pub const RF_PREFIX_SECURITY: u8 = 0x29;

/// Dim/Bright 幅值满量程（USB 变体和入站 PLC 数据均以 0..210 表示）
pub const DIM_FULL_SCALE: f64 = 210.0;

/// RF Dim/Bright 单步幅值（按 1/210 缩放）
pub const RF_DIM_STEP: u8 = 0x0F;

/// 串口 Dim 档位数（0..22，编码进功能帧头的高 5 位）
pub const SERIAL_DIM_STEPS: u8 = 22;

/// ACK/校验和等待超时
pub const ACK_TIMEOUT: Duration = Duration::from_secs(5);

/// 发送前要求的最小入站静默间隔（速率限制）
pub const MIN_RX_GAP: Duration = Duration::from_millis(500);

/// RF 重复帧抑制窗口
pub const RF_DUPLICATE_WINDOW: Duration = Duration::from_millis(500);

/// 超时后的最大重发次数
pub const COMMAND_RESEND_MAX: u32 = 1;

/// 断线重连前的退避时间
pub const RECONNECT_BACKOFF: Duration = Duration::from_secs(3);

/// 监护线程的巡检周期
pub const SUPERVISOR_TICK: Duration = Duration::from_secs(1);

/// Disconnect 时等待工作线程退出的期限
pub const JOIN_DEADLINE: Duration = Duration::from_secs(5);

/// 入站帧首字节的分类
///
/// 短帧（长度 ≤2）与长帧（长度 >3）共用 `PlcPoll` 前导字节，
/// 由引擎根据长度进一步区分。
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Address = FRAME_ADDRESS,
    Function = FRAME_FUNCTION,
    PlcReady = PLC_READY,
    PlcPoll = PLC_POLL,
    PlcFilterFailPoll = PLC_FILTER_FAIL_POLL,
    Macro = FRAME_MACRO,
    Rf = FRAME_RF,
    PlcTimeRequest = PLC_TIME_REQUEST,
    PlcReplyToPoll = PLC_REPLY_TO_POLL,
}

impl FrameType {
    /// 按首字节分类入站帧
    pub fn from_byte(byte: u8) -> Option<FrameType> {
        match byte {
            FRAME_ADDRESS => Some(FrameType::Address),
            FRAME_FUNCTION => Some(FrameType::Function),
            PLC_READY => Some(FrameType::PlcReady),
            PLC_POLL => Some(FrameType::PlcPoll),
            PLC_FILTER_FAIL_POLL => Some(FrameType::PlcFilterFailPoll),
            FRAME_MACRO => Some(FrameType::Macro),
            FRAME_RF => Some(FrameType::Rf),
            PLC_TIME_REQUEST => Some(FrameType::PlcTimeRequest),
            PLC_REPLY_TO_POLL => Some(FrameType::PlcReplyToPoll),
            _ => None,
        }
    }
}
