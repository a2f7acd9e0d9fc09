//! 入站帧解码
//!
//! 解码函数只做字节到结构的转换，不触碰任何共享状态；
//! 形状校验失败返回 `ProtocolError`，由引擎记录日志后丢弃。

use crate::protocol::ProtocolError;
use crate::protocol::codes::{Command, HouseCode, SecurityEvent, UnitCode};
use crate::protocol::constants::*;

/// 按位翻转一个字节（bit 0 ↔ bit 7）
pub fn reverse_byte(byte: u8) -> u8 {
    let mut result = 0u8;
    let mut byte = byte;
    for _ in 0..8 {
        result = (result << 1) | (byte & 1);
        byte >>= 1;
    }
    result
}

/// 解码后的 RF 标准设备命令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RfStandardCommand {
    pub house: HouseCode,
    /// 针对单个单元的 On/Off 时有效；房屋级命令为 `NotSet`
    pub unit: UnitCode,
    pub command: Command,
}

/// 解码 6 字节 RF 标准命令帧
///
/// 帧形：`[0x5D, 0x20, b2, b3, b4, b5]`，要求 `b3 & !b2 == b3` 且
/// `b5 & !b4 == b5`（每对字节互为补码掩码）。
/// 房屋 nibble 是 b2 高 nibble 的 4 位翻转；单元序号从 b2/b4 的
/// 离散位重组（位序按最高位为 bit 0 计）。
pub fn decode_rf_standard(frame: &[u8]) -> Result<RfStandardCommand, ProtocolError> {
    if frame.len() != 6 {
        return Err(ProtocolError::InvalidLength {
            expected: 6,
            actual: frame.len(),
        });
    }
    if frame[0] != FRAME_RF || frame[1] != RF_PREFIX_STANDARD {
        return Err(ProtocolError::InvalidRfFrame(format!(
            "unexpected prefix {:02X} {:02X}",
            frame[0], frame[1]
        )));
    }

    let (b2, b3, b4, b5) = (frame[2], frame[3], frame[4], frame[5]);
    if (b3 & !b2) != b3 || (b5 & !b4) != b5 {
        return Err(ProtocolError::InvalidRfFrame(format!(
            "complement check failed: {b2:02X} {b3:02X} {b4:02X} {b5:02X}"
        )));
    }

    let house = HouseCode::from_nibble(reverse_byte(b2 >> 4) >> 4);

    match b4 {
        0x98 => Ok(RfStandardCommand {
            house,
            unit: UnitCode::NotSet,
            command: Command::Dim,
        }),
        0x88 => Ok(RfStandardCommand {
            house,
            unit: UnitCode::NotSet,
            command: Command::Bright,
        }),
        0x90 => Ok(RfStandardCommand {
            house,
            unit: UnitCode::NotSet,
            command: Command::AllLightsOn,
        }),
        0x80 => Ok(RfStandardCommand {
            house,
            unit: UnitCode::NotSet,
            command: Command::AllUnitsOff,
        }),
        _ => {
            // 单元序号的四个位散布在 b2/b4 中
            let unit_index = ((b2 >> 2) & 1)
                | (((b4 >> 6) & 1) << 1)
                | (((b4 >> 3) & 1) << 2)
                | (((b4 >> 4) & 1) << 3);
            let unit = UnitCode::from_number(unit_index + 1).unwrap_or(UnitCode::NotSet);
            let command = if (b4 >> 5) & 1 == 0 {
                Command::On
            } else {
                Command::Off
            };
            Ok(RfStandardCommand {
                house,
                unit,
                command,
            })
        },
    }
}

/// 解码后的 RF 安防事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RfSecurityMessage {
    pub event: SecurityEvent,
    /// 24 位设备地址（b2, b6, b7 拼接）
    pub address: u32,
}

/// 解码 8 字节 RF 安防帧
///
/// 帧形：`[0x5D, 0x29, b2, b3, b4, b5, b6, b7]`，要求 `b3 ^ b2 == 0x0F`
/// 且 `b5 ^ b4 == 0xFF`。b7 为 0x80 时归一化为 0x00。
pub fn decode_rf_security(frame: &[u8]) -> Result<RfSecurityMessage, ProtocolError> {
    if frame.len() != 8 {
        return Err(ProtocolError::InvalidLength {
            expected: 8,
            actual: frame.len(),
        });
    }
    if frame[0] != FRAME_RF || frame[1] != RF_PREFIX_SECURITY {
        return Err(ProtocolError::InvalidRfFrame(format!(
            "unexpected prefix {:02X} {:02X}",
            frame[0], frame[1]
        )));
    }

    let (b2, b3, b4, b5, b6, mut b7) = (frame[2], frame[3], frame[4], frame[5], frame[6], frame[7]);
    if b3 ^ b2 != 0x0F || b5 ^ b4 != 0xFF {
        return Err(ProtocolError::InvalidRfFrame(format!(
            "complement check failed: {b2:02X} {b3:02X} {b4:02X} {b5:02X}"
        )));
    }
    if b7 == 0x80 {
        b7 = 0x00;
    }

    let event = SecurityEvent::from_byte(b4).ok_or(ProtocolError::UnknownSecurityEvent(b4))?;
    let address = ((b2 as u32) << 16) | ((b6 as u32) << 8) | b7 as u32;

    Ok(RfSecurityMessage { event, address })
}

/// PLC 扩展轮询帧中的一个解码条目
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlcItem {
    /// 地址字节：选中一个模块
    Address { house: HouseCode, unit: UnitCode },
    /// 功能字节：作用于当前已选中的模块集合。
    /// Dim/Bright 时 `magnitude` 为随后数据字节的幅值（0..210），否则为 0。
    Function {
        house: HouseCode,
        command: Command,
        magnitude: u8,
    },
}

/// 解码 PLC 扩展轮询帧（`0x5A` 前导，长度 > 3）
///
/// 第二字节是报文长度（计入功能位图字节），第三字节是位图：
/// 第 i 位区分第 i 个数据字节是地址（0）还是功能（1）。
/// USB 控制器的位图与数据以整体倒序到达，`reversed = true` 时先还原。
pub fn decode_plc_message(frame: &[u8], reversed: bool) -> Result<Vec<PlcItem>, ProtocolError> {
    if frame.len() < 4 || frame[0] != PLC_POLL {
        return Err(ProtocolError::ParseError(format!(
            "not an extended PLC message: {frame:02X?}"
        )));
    }

    let message_length = frame[1] as usize;
    if message_length < 2 {
        return Err(ProtocolError::ParseError(format!(
            "PLC message length {message_length} too short"
        )));
    }
    let data_count = message_length - 1;
    if frame.len() < 3 + data_count {
        return Err(ProtocolError::InvalidLength {
            expected: 3 + data_count,
            actual: frame.len(),
        });
    }

    // 位图只有 8 位；更长的报文里高位数据字节一律按地址处理
    let bitmap = frame[2];
    let mut is_function: Vec<bool> = (0..data_count)
        .map(|i| i < 8 && (bitmap >> i) & 1 == 1)
        .collect();
    let mut data: Vec<u8> = frame[3..3 + data_count].to_vec();
    if reversed {
        is_function.reverse();
        data.reverse();
    }

    let mut items = Vec::new();
    let mut index = 0;
    while index < data.len() {
        let byte = data[index];
        let house = HouseCode::from_nibble(byte >> 4);
        if is_function[index] {
            let command = Command::from_nibble(byte & 0x0F);
            let magnitude = if matches!(command, Command::Dim | Command::Bright) {
                // 幅值占用下一个数据字节
                index += 1;
                data.get(index).copied().unwrap_or(0)
            } else {
                0
            };
            items.push(PlcItem::Function {
                house,
                command,
                magnitude,
            });
        } else {
            items.push(PlcItem::Address {
                house,
                unit: UnitCode::from_nibble(byte & 0x0F),
            });
        }
        index += 1;
    }

    Ok(items)
}
