//! 出站帧编码
//!
//! 所有编码函数返回定长数组或 `Vec<u8>`，不做任何 IO。
//! Dim/Bright 有两种线上表示：USB 控制器带独立幅值字节（0..210），
//! 串口控制器把档位（0..22）编码进功能帧头的高 5 位。

use chrono::{Datelike, NaiveDateTime, Timelike};

use crate::protocol::codes::{Command, HouseCode, UnitCode};
use crate::protocol::constants::*;

/// 地址帧 `[0x04, house|unit]`
pub fn address_frame(house: HouseCode, unit: UnitCode) -> [u8; 2] {
    [FRAME_ADDRESS, (house.nibble() << 4) | unit.nibble()]
}

/// 仅房屋的地址帧 `[0x04, house|0]`（用于 All-Lights-On / All-Units-Off）
pub fn house_address_frame(house: HouseCode) -> [u8; 2] {
    [FRAME_ADDRESS, house.nibble() << 4]
}

/// 功能帧 `[0x06, house|function]`（不带幅值）
pub fn function_frame(house: HouseCode, command: Command) -> [u8; 2] {
    [FRAME_FUNCTION, (house.nibble() << 4) | command.nibble()]
}

/// Dim/Bright 功能帧，USB 变体：幅值作为第三字节（0..210）
pub fn dim_function_frame_usb(house: HouseCode, command: Command, percent: u8) -> [u8; 3] {
    [
        FRAME_FUNCTION,
        (house.nibble() << 4) | command.nibble(),
        dim_magnitude(percent),
    ]
}

/// Dim/Bright 功能帧，串口变体：档位编码进帧头高 5 位
pub fn dim_function_frame_serial(house: HouseCode, command: Command, percent: u8) -> [u8; 2] {
    let dim_code = dim_value(percent) << 3;
    [
        FRAME_FUNCTION | dim_code | 0x04,
        (house.nibble() << 4) | command.nibble(),
    ]
}

/// 百分比 → 串口 Dim 档位（0..22），百分比钳制到 [0, 100]
pub fn dim_value(percent: u8) -> u8 {
    let percent = percent.min(100);
    (percent as f64 / 100.0 * SERIAL_DIM_STEPS as f64).floor() as u8
}

/// 串口 Dim 档位 → 归一化亮度（保留 2 位小数）
pub fn percentage_value(dim_code: u8) -> f64 {
    ((dim_code as f64 / SERIAL_DIM_STEPS as f64) * 100.0).round() / 100.0
}

/// 百分比 → USB 幅值字节（0..210），百分比钳制到 [0, 100]
pub fn dim_magnitude(percent: u8) -> u8 {
    let percent = percent.min(100);
    (percent as f64 / 100.0 * DIM_FULL_SCALE).floor() as u8
}

/// 时间下发帧
///
/// 帧头 0x9B，随后 6 字节编码时钟：
/// 秒、分（0..119，按小时奇偶折算）、时/2、年内天低 8 位、
/// 年内天第 8 位 + 星期位图（周日..周六 → bit 0..6）、
/// 控制字节（房屋 nibble 在高 4 位，低 4 位为 0x03，请求清除电池计时器时为 0x07）。
/// USB 控制器额外追加一个 0x02 尾字节（协议文档未说明，但硬件需要）。
pub fn time_set_frame(
    now: &NaiveDateTime,
    house: HouseCode,
    battery_clear: bool,
    usb: bool,
) -> Vec<u8> {
    let day_of_year = now.ordinal();
    let weekday_bit = 1u8 << now.weekday().num_days_from_sunday();

    let mut frame = vec![
        FRAME_TIME_SET,
        now.second() as u8,
        (now.minute() + (now.hour() % 2) * 60) as u8,
        (now.hour() / 2) as u8,
        (day_of_year & 0xFF) as u8,
        (if day_of_year > 255 { 0x80 } else { 0x00 }) | weekday_bit,
        (house.nibble() << 4) + if battery_clear { 0x07 } else { 0x03 },
    ];
    if usb {
        frame.push(0x02);
    }
    frame
}

/// USB 监听房屋码配置帧
///
/// 位图中每个房屋占一位，位序号等于线上 nibble 翻转最高位（nibble ^ 8）。
/// 尾部 7 字节为固定的厂商序列。
pub fn monitored_codes_frame(houses: &[HouseCode]) -> [u8; 10] {
    let mut bitmap: u16 = 0;
    for house in houses {
        if *house != HouseCode::NotSet {
            bitmap |= 1 << monitored_house_bit(*house);
        }
    }
    [
        FRAME_MONITORED_CODES,
        (bitmap >> 8) as u8,
        bitmap as u8,
        0x05,
        0x00,
        0x14,
        0x20,
        0x28,
        0x24,
        0x29,
    ]
}

/// 房屋码在监听位图中的位序号
pub fn monitored_house_bit(house: HouseCode) -> u8 {
    house.nibble() ^ 0x08
}
