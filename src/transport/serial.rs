//! 串口后端（CM11 一类控制器）
//!
//! 4800 波特 8N1 无流控，读/写超时 150ms。
//! 打开后用 `try_clone` 拆出第二个句柄，读写两半互不阻塞。

use std::io::{Read, Write};
use std::time::Duration;

use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use tracing::trace;

use crate::protocol::constants::{PLC_POLL, STATUS_REQUEST};
use crate::transport::{
    DeviceError, DeviceErrorKind, TransportError, TransportPair, TransportReader, TransportWriter,
};

/// 波特率固定为 4800（协议规定，不可配置）
const BAUD_RATE: u32 = 4800;

/// 读/写超时
const PORT_TIMEOUT: Duration = Duration::from_millis(150);

/// 入站累积缓冲区大小
const READ_BUFFER_SIZE: usize = 32;

/// 串口传输后端
pub struct SerialTransport;

impl SerialTransport {
    /// 打开串口设备并拆分为读/写两半
    ///
    /// 非 Windows 平台先检查设备路径存在（热拔插时避免驱动层长超时）。
    /// 打开成功后立即写出状态请求字节 `0x8B`。
    pub fn open(path: &str) -> Result<TransportPair, TransportError> {
        #[cfg(not(windows))]
        {
            if !std::path::Path::new(path).exists() {
                return Err(TransportError::Device(DeviceError::new(
                    DeviceErrorKind::NotFound,
                    format!("serial device {path} does not exist"),
                )));
            }
        }

        let mut port = serialport::new(path, BAUD_RATE)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(PORT_TIMEOUT)
            .open()
            .map_err(map_serial_error)?;

        let reader_port = port.try_clone().map_err(map_serial_error)?;

        port.write_all(&[STATUS_REQUEST])?;
        trace!("serial port {} opened, status request sent", path);

        Ok((
            Box::new(SerialReader { port: reader_port }),
            Box::new(SerialWriter { port }),
        ))
    }
}

/// 串口读半
pub struct SerialReader {
    port: Box<dyn SerialPort>,
}

impl TransportReader for SerialReader {
    /// 按累积策略读取一段入站字节
    ///
    /// 向 32 字节缓冲区反复读取，满足以下任一条件即停：
    /// (a) 首字节小于累积长度（带长度前缀的 PLC 帧已完整）；
    /// (b) 首字节大于 0x10 且驱动报告无更多待读字节。
    /// 累积结果是 PLC 响应（长度前缀落在 [2, 12]）时在头部补一个
    /// 合成的 `0x5A`，使帧形与 USB 控制器一致。
    fn read(&mut self) -> Result<Vec<u8>, TransportError> {
        let mut buffer = [0u8; READ_BUFFER_SIZE];
        let mut total = 0usize;

        loop {
            match self.port.read(&mut buffer[total..]) {
                Ok(0) => break,
                Ok(count) => {
                    total += count;
                    if (buffer[0] as usize) < total {
                        break;
                    }
                    if buffer[0] > 0x10 && self.port.bytes_to_read().unwrap_or(0) == 0 {
                        break;
                    }
                    if total >= READ_BUFFER_SIZE {
                        break;
                    }
                },
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => break,
                Err(e) => return Err(TransportError::Io(e)),
            }
        }

        if total == 0 {
            return Ok(Vec::new());
        }

        let mut data = buffer[..total].to_vec();
        if (2..=12).contains(&data[0]) {
            data.insert(0, PLC_POLL);
        }
        Ok(data)
    }
}

/// 串口写半
pub struct SerialWriter {
    port: Box<dyn SerialPort>,
}

impl TransportWriter for SerialWriter {
    fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        match self.port.write_all(data) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Err(TransportError::Timeout),
            Err(e) => Err(TransportError::Io(e)),
        }
    }
}

fn map_serial_error(error: serialport::Error) -> TransportError {
    let kind = match error.kind {
        serialport::ErrorKind::NoDevice => DeviceErrorKind::NoDevice,
        serialport::ErrorKind::InvalidInput => DeviceErrorKind::NotFound,
        serialport::ErrorKind::Io(_) => DeviceErrorKind::Backend,
        serialport::ErrorKind::Unknown => DeviceErrorKind::Unknown,
    };
    TransportError::Device(DeviceError::new(kind, error.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_nonexistent_path() {
        let result = SerialTransport::open("/dev/nonexistent-x10-serial");
        assert!(matches!(
            result,
            Err(TransportError::Device(DeviceError {
                kind: DeviceErrorKind::NotFound,
                ..
            }))
        ));
    }

    #[test]
    fn test_map_serial_error_no_device() {
        let error = serialport::Error::new(serialport::ErrorKind::NoDevice, "gone");
        match map_serial_error(error) {
            TransportError::Device(e) => {
                assert_eq!(e.kind, DeviceErrorKind::NoDevice);
                assert!(e.is_fatal());
            },
            other => panic!("Expected Device variant, got {:?}", other),
        }
    }
}
