//! USB 后端（CM15 一类控制器）
//!
//! 按 vid/pid 0x0BC7:0x0001 枚举设备，配置 1 / 接口 0，
//! Bulk IN 0x81 / Bulk OUT 0x02，单次传输 8 字节，包上限 16 字节。

use std::sync::Arc;
use std::time::Duration;

use rusb::{DeviceHandle, GlobalContext};
use tracing::trace;

use crate::protocol::constants::STATUS_REQUEST;
use crate::transport::{
    DeviceError, DeviceErrorKind, TransportError, TransportPair, TransportReader, TransportWriter,
};

/// X10 USB 控制器的 vid/pid
const VENDOR_ID: u16 = 0x0BC7;
const PRODUCT_ID: u16 = 0x0001;

const INTERFACE_NUMBER: u8 = 0;
const CONFIGURATION: u8 = 1;
const ENDPOINT_IN: u8 = 0x81;
const ENDPOINT_OUT: u8 = 0x02;

/// 单次 Bulk 传输块大小
const TRANSFER_CHUNK: usize = 8;

/// 最大包大小（两次传输拼接的上限）
const MAX_PACKET: usize = 16;

/// Bulk 传输超时
const USB_TIMEOUT: Duration = Duration::from_secs(1);

/// USB 设备核心：句柄 + 接口占用状态
///
/// 读/写两半共享同一个核心；最后一半析构时释放接口，
/// 把 USB 状态机交还操作系统，避免下次 claim 被拒绝。
struct UsbCore {
    handle: DeviceHandle<GlobalContext>,
}

impl Drop for UsbCore {
    fn drop(&mut self) {
        // 析构过程中即使失败（例如设备已断开）也不应该 panic
        let _ = self.handle.release_interface(INTERFACE_NUMBER);
        trace!("USB interface released");
    }
}

/// USB 传输后端
pub struct UsbTransport;

impl UsbTransport {
    /// 枚举并打开第一个 X10 USB 控制器，拆分为读/写两半
    ///
    /// 打开成功后立即写出状态请求字节 `0x8B`。
    pub fn open() -> Result<TransportPair, TransportError> {
        for device in rusb::devices().map_err(map_usb_error)?.iter() {
            let descriptor = match device.device_descriptor() {
                Ok(descriptor) => descriptor,
                Err(_) => continue,
            };
            if descriptor.vendor_id() != VENDOR_ID || descriptor.product_id() != PRODUCT_ID {
                continue;
            }

            let mut handle = device.open().map_err(map_usb_error)?;

            // Detach kernel driver on Linux/macOS（在 claim 之前）
            #[cfg(any(target_os = "linux", target_os = "macos"))]
            {
                if handle.kernel_driver_active(INTERFACE_NUMBER).unwrap_or(false) {
                    handle
                        .detach_kernel_driver(INTERFACE_NUMBER)
                        .map_err(map_usb_error)?;
                }
            }

            // 配置可能已经生效，失败不阻断后续 claim
            if let Err(e) = handle.set_active_configuration(CONFIGURATION) {
                trace!("set_active_configuration failed (may be normal): {}", e);
            }

            handle
                .claim_interface(INTERFACE_NUMBER)
                .map_err(map_usb_error)?;

            let core = Arc::new(UsbCore { handle });
            core.handle
                .write_bulk(ENDPOINT_OUT, &[STATUS_REQUEST], USB_TIMEOUT)
                .map_err(map_usb_error)?;
            trace!("USB controller opened, status request sent");

            return Ok((
                Box::new(UsbReader { core: core.clone() }),
                Box::new(UsbWriter { core }),
            ));
        }

        Err(TransportError::Device(DeviceError::new(
            DeviceErrorKind::NotFound,
            format!("no USB controller with id {VENDOR_ID:04X}:{PRODUCT_ID:04X}"),
        )))
    }
}

/// USB 读半
pub struct UsbReader {
    core: Arc<UsbCore>,
}

impl TransportReader for UsbReader {
    /// 读取一段入站字节
    ///
    /// 先发起一次 8 字节 Bulk IN 传输；若拿到完整的 8 字节块，
    /// 再向缓冲区剩余部分发起第二次 8 字节传输收取尾部。
    /// 任一阶段超时即返回已累积的字节。
    fn read(&mut self) -> Result<Vec<u8>, TransportError> {
        let mut buffer = [0u8; MAX_PACKET];

        let first = match self
            .core
            .handle
            .read_bulk(ENDPOINT_IN, &mut buffer[..TRANSFER_CHUNK], USB_TIMEOUT)
        {
            Ok(count) => count,
            Err(rusb::Error::Timeout) => return Ok(Vec::new()),
            Err(e) => return Err(map_usb_error(e)),
        };

        if first < TRANSFER_CHUNK {
            return Ok(buffer[..first].to_vec());
        }

        match self
            .core
            .handle
            .read_bulk(ENDPOINT_IN, &mut buffer[TRANSFER_CHUNK..], USB_TIMEOUT)
        {
            Ok(count) => Ok(buffer[..TRANSFER_CHUNK + count].to_vec()),
            Err(rusb::Error::Timeout) => Ok(buffer[..TRANSFER_CHUNK].to_vec()),
            Err(e) => Err(map_usb_error(e)),
        }
    }
}

/// USB 写半
pub struct UsbWriter {
    core: Arc<UsbCore>,
}

impl TransportWriter for UsbWriter {
    fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        match self.core.handle.write_bulk(ENDPOINT_OUT, data, USB_TIMEOUT) {
            Ok(_) => Ok(()),
            Err(e) => Err(map_usb_error(e)),
        }
    }
}

fn map_usb_error(error: rusb::Error) -> TransportError {
    match error {
        rusb::Error::Timeout => TransportError::Timeout,
        rusb::Error::Overflow => TransportError::BufferOverflow,
        rusb::Error::NoDevice | rusb::Error::NotFound => TransportError::Device(DeviceError::new(
            DeviceErrorKind::NoDevice,
            error.to_string(),
        )),
        rusb::Error::Access => TransportError::Device(DeviceError::new(
            DeviceErrorKind::AccessDenied,
            error.to_string(),
        )),
        rusb::Error::Busy => {
            TransportError::Device(DeviceError::new(DeviceErrorKind::Busy, error.to_string()))
        },
        other => TransportError::Device(DeviceError::new(
            DeviceErrorKind::Backend,
            other.to_string(),
        )),
    }
}
