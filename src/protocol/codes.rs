//! X10 地址码与命令码
//!
//! 房屋码/单元码的线上 nibble 编码不是字母序/数字序的，
//! 而是 X10 专有的排列（A=6, B=14, ...）。所有表以枚举判别值落实，
//! 并提供 nibble 与字母/序号之间的双向转换。

use std::fmt;

/// 房屋码 A..P
///
/// 判别值即线上 nibble 编码。
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HouseCode {
    A = 6,
    B = 14,
    C = 2,
    D = 10,
    E = 1,
    F = 9,
    G = 5,
    H = 13,
    I = 7,
    J = 15,
    K = 3,
    L = 11,
    M = 0,
    N = 8,
    O = 4,
    P = 12,
    NotSet = 0xFF,
}

impl HouseCode {
    /// 线上 nibble 值（`NotSet` 返回 0xFF）
    pub fn nibble(self) -> u8 {
        self as u8
    }

    /// 按线上 nibble 解码（nibble > 15 返回 `NotSet`）
    pub fn from_nibble(nibble: u8) -> HouseCode {
        match nibble {
            6 => HouseCode::A,
            14 => HouseCode::B,
            2 => HouseCode::C,
            10 => HouseCode::D,
            1 => HouseCode::E,
            9 => HouseCode::F,
            5 => HouseCode::G,
            13 => HouseCode::H,
            7 => HouseCode::I,
            15 => HouseCode::J,
            3 => HouseCode::K,
            11 => HouseCode::L,
            0 => HouseCode::M,
            8 => HouseCode::N,
            4 => HouseCode::O,
            12 => HouseCode::P,
            _ => HouseCode::NotSet,
        }
    }

    /// 按大写字母解析（仅接受 'A'..='P'）
    pub fn from_letter(letter: char) -> Option<HouseCode> {
        match letter {
            'A' => Some(HouseCode::A),
            'B' => Some(HouseCode::B),
            'C' => Some(HouseCode::C),
            'D' => Some(HouseCode::D),
            'E' => Some(HouseCode::E),
            'F' => Some(HouseCode::F),
            'G' => Some(HouseCode::G),
            'H' => Some(HouseCode::H),
            'I' => Some(HouseCode::I),
            'J' => Some(HouseCode::J),
            'K' => Some(HouseCode::K),
            'L' => Some(HouseCode::L),
            'M' => Some(HouseCode::M),
            'N' => Some(HouseCode::N),
            'O' => Some(HouseCode::O),
            'P' => Some(HouseCode::P),
            _ => None,
        }
    }

    /// 房屋字母（`NotSet` 返回 '?'）
    pub fn letter(self) -> char {
        match self {
            HouseCode::A => 'A',
            HouseCode::B => 'B',
            HouseCode::C => 'C',
            HouseCode::D => 'D',
            HouseCode::E => 'E',
            HouseCode::F => 'F',
            HouseCode::G => 'G',
            HouseCode::H => 'H',
            HouseCode::I => 'I',
            HouseCode::J => 'J',
            HouseCode::K => 'K',
            HouseCode::L => 'L',
            HouseCode::M => 'M',
            HouseCode::N => 'N',
            HouseCode::O => 'O',
            HouseCode::P => 'P',
            HouseCode::NotSet => '?',
        }
    }
}

impl fmt::Display for HouseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

/// 单元码 1..16
///
/// nibble 编码与房屋码使用同一排列（Unit1=6, Unit2=14, ...）。
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitCode {
    Unit1 = 6,
    Unit2 = 14,
    Unit3 = 2,
    Unit4 = 10,
    Unit5 = 1,
    Unit6 = 9,
    Unit7 = 5,
    Unit8 = 13,
    Unit9 = 7,
    Unit10 = 15,
    Unit11 = 3,
    Unit12 = 11,
    Unit13 = 0,
    Unit14 = 8,
    Unit15 = 4,
    Unit16 = 12,
    NotSet = 0xFF,
}

impl UnitCode {
    /// 线上 nibble 值
    pub fn nibble(self) -> u8 {
        self as u8
    }

    /// 单元序号 1..=16（`NotSet` 返回 0）
    pub fn number(self) -> u8 {
        match self {
            UnitCode::Unit1 => 1,
            UnitCode::Unit2 => 2,
            UnitCode::Unit3 => 3,
            UnitCode::Unit4 => 4,
            UnitCode::Unit5 => 5,
            UnitCode::Unit6 => 6,
            UnitCode::Unit7 => 7,
            UnitCode::Unit8 => 8,
            UnitCode::Unit9 => 9,
            UnitCode::Unit10 => 10,
            UnitCode::Unit11 => 11,
            UnitCode::Unit12 => 12,
            UnitCode::Unit13 => 13,
            UnitCode::Unit14 => 14,
            UnitCode::Unit15 => 15,
            UnitCode::Unit16 => 16,
            UnitCode::NotSet => 0,
        }
    }

    /// 按单元序号构造（仅接受 1..=16）
    pub fn from_number(number: u8) -> Option<UnitCode> {
        match number {
            1 => Some(UnitCode::Unit1),
            2 => Some(UnitCode::Unit2),
            3 => Some(UnitCode::Unit3),
            4 => Some(UnitCode::Unit4),
            5 => Some(UnitCode::Unit5),
            6 => Some(UnitCode::Unit6),
            7 => Some(UnitCode::Unit7),
            8 => Some(UnitCode::Unit8),
            9 => Some(UnitCode::Unit9),
            10 => Some(UnitCode::Unit10),
            11 => Some(UnitCode::Unit11),
            12 => Some(UnitCode::Unit12),
            13 => Some(UnitCode::Unit13),
            14 => Some(UnitCode::Unit14),
            15 => Some(UnitCode::Unit15),
            16 => Some(UnitCode::Unit16),
            _ => None,
        }
    }

    /// 按线上 nibble 解码
    pub fn from_nibble(nibble: u8) -> UnitCode {
        match nibble {
            6 => UnitCode::Unit1,
            14 => UnitCode::Unit2,
            2 => UnitCode::Unit3,
            10 => UnitCode::Unit4,
            1 => UnitCode::Unit5,
            9 => UnitCode::Unit6,
            5 => UnitCode::Unit7,
            13 => UnitCode::Unit8,
            7 => UnitCode::Unit9,
            15 => UnitCode::Unit10,
            3 => UnitCode::Unit11,
            11 => UnitCode::Unit12,
            0 => UnitCode::Unit13,
            8 => UnitCode::Unit14,
            4 => UnitCode::Unit15,
            12 => UnitCode::Unit16,
            _ => UnitCode::NotSet,
        }
    }
}

impl fmt::Display for UnitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

/// X10 功能命令
///
/// 判别值即标准功能字段的线上 nibble。
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    AllUnitsOff = 0x00,
    AllLightsOn = 0x01,
    On = 0x02,
    Off = 0x03,
    Dim = 0x04,
    Bright = 0x05,
    AllLightsOff = 0x06,
    Extended = 0x07,
    HailRequest = 0x08,
    HailAck = 0x09,
    PresetDim1 = 0x0A,
    PresetDim2 = 0x0B,
    ExtendedDataTransfer = 0x0C,
    StatusOn = 0x0D,
    StatusOff = 0x0E,
    StatusRequest = 0x0F,
    NotSet = 0xFF,
}

impl Command {
    /// 线上 nibble 值
    pub fn nibble(self) -> u8 {
        self as u8
    }

    /// 按线上 nibble 解码
    pub fn from_nibble(nibble: u8) -> Command {
        match nibble {
            0x00 => Command::AllUnitsOff,
            0x01 => Command::AllLightsOn,
            0x02 => Command::On,
            0x03 => Command::Off,
            0x04 => Command::Dim,
            0x05 => Command::Bright,
            0x06 => Command::AllLightsOff,
            0x07 => Command::Extended,
            0x08 => Command::HailRequest,
            0x09 => Command::HailAck,
            0x0A => Command::PresetDim1,
            0x0B => Command::PresetDim2,
            0x0C => Command::ExtendedDataTransfer,
            0x0D => Command::StatusOn,
            0x0E => Command::StatusOff,
            0x0F => Command::StatusRequest,
            _ => Command::NotSet,
        }
    }
}

/// RF 安防事件
///
/// 判别值即事件帧第 5 字节的原始值。各门磁传感器有电量低与防拆变体，
/// 遥控器包含布防/撤防/灯控/紧急按钮。
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecurityEvent {
    DoorSensor2Alert = 0x00,
    DoorSensor1AlertBatteryLow = 0x01,
    RemotePanic15 = 0x03,
    DoorSensor1Alert = 0x04,
    DoorSensor2AlertBatteryLow = 0x05,
    RemoteArmAway = 0x06,
    MotionAlert = 0x0C,
    MotionAlertBatteryLow = 0x0D,
    RemoteArmHome = 0x0E,
    RemotePanic = 0x26,
    DoorSensor2AlertTamper = 0x40,
    DoorSensor1AlertTamper = 0x44,
    RemoteLightOn = 0x46,
    DoorSensor2Normal = 0x80,
    DoorSensor1NormalBatteryLow = 0x81,
    DoorSensor1Normal = 0x84,
    DoorSensor2NormalBatteryLow = 0x85,
    RemoteDisarm = 0x86,
    MotionNormal = 0x8C,
    MotionNormalBatteryLow = 0x8D,
    DoorSensor2NormalTamper = 0xC0,
    DoorSensor1NormalTamper = 0xC4,
    RemoteLightOff = 0xC6,
    NotSet = 0xFF,
}

impl SecurityEvent {
    /// 按事件字节解码
    pub fn from_byte(byte: u8) -> Option<SecurityEvent> {
        match byte {
            0x00 => Some(SecurityEvent::DoorSensor2Alert),
            0x01 => Some(SecurityEvent::DoorSensor1AlertBatteryLow),
            0x03 => Some(SecurityEvent::RemotePanic15),
            0x04 => Some(SecurityEvent::DoorSensor1Alert),
            0x05 => Some(SecurityEvent::DoorSensor2AlertBatteryLow),
            0x06 => Some(SecurityEvent::RemoteArmAway),
            0x0C => Some(SecurityEvent::MotionAlert),
            0x0D => Some(SecurityEvent::MotionAlertBatteryLow),
            0x0E => Some(SecurityEvent::RemoteArmHome),
            0x26 => Some(SecurityEvent::RemotePanic),
            0x40 => Some(SecurityEvent::DoorSensor2AlertTamper),
            0x44 => Some(SecurityEvent::DoorSensor1AlertTamper),
            0x46 => Some(SecurityEvent::RemoteLightOn),
            0x80 => Some(SecurityEvent::DoorSensor2Normal),
            0x81 => Some(SecurityEvent::DoorSensor1NormalBatteryLow),
            0x84 => Some(SecurityEvent::DoorSensor1Normal),
            0x85 => Some(SecurityEvent::DoorSensor2NormalBatteryLow),
            0x86 => Some(SecurityEvent::RemoteDisarm),
            0x8C => Some(SecurityEvent::MotionNormal),
            0x8D => Some(SecurityEvent::MotionNormalBatteryLow),
            0xC0 => Some(SecurityEvent::DoorSensor2NormalTamper),
            0xC4 => Some(SecurityEvent::DoorSensor1NormalTamper),
            0xC6 => Some(SecurityEvent::RemoteLightOff),
            _ => None,
        }
    }
}
