//! 连接配置
//!
//! `port_name` 为字面量 `"USB"` 时选择 USB 后端，其余值按串口设备路径处理。
//! 房屋码列表决定注册表内容和 USB 控制器的监听位图。

use crate::manager::error::X10Error;
use crate::protocol::HouseCode;

/// 连接配置
///
/// # Example
///
/// ```
/// use x10_sdk::manager::X10Config;
///
/// // 默认配置：USB 后端，监听房屋 A
/// let config = X10Config::default();
///
/// // 串口后端
/// let config = X10Config {
///     port_name: "/dev/ttyUSB0".to_string(),
///     ..X10Config::default()
/// };
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct X10Config {
    /// 端口名：`"USB"` 或串口设备路径
    pub port_name: String,
    /// 监听的房屋码（决定注册表内容，每个房屋 16 个单元）
    pub house_codes: Vec<HouseCode>,
    /// 严格校验模式：开启后串口校验和不匹配时重发而不是盲目确认。
    /// 默认关闭，保持与控制器固件的既有交互兼容。
    pub strict_checksum: bool,
    /// 连续零字节阈值：超过即判定线路掉落触发重连，0 表示禁用该启发式
    pub zero_checksum_limit: u32,
}

impl Default for X10Config {
    fn default() -> Self {
        Self {
            port_name: "USB".to_string(),
            house_codes: vec![HouseCode::A],
            strict_checksum: false,
            zero_checksum_limit: 10,
        }
    }
}

impl X10Config {
    /// 是否选择 USB 后端
    pub fn is_usb(&self) -> bool {
        self.port_name == "USB"
    }

    /// 解析逗号分隔的大写房屋字母（如 `"A,C"`）
    ///
    /// 不容忍空白字符和空项。
    pub fn parse_house_codes(input: &str) -> Result<Vec<HouseCode>, X10Error> {
        let mut houses = Vec::new();
        for item in input.split(',') {
            let mut chars = item.chars();
            let house = match (chars.next(), chars.next()) {
                (Some(letter), None) => HouseCode::from_letter(letter),
                _ => None,
            };
            match house {
                Some(house) => houses.push(house),
                None => return Err(X10Error::InvalidHouseCodes(input.to_string())),
            }
        }
        Ok(houses)
    }
}
