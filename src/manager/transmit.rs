//! 发送路径
//!
//! 单写者：命令锁串行化整个命令序列（地址帧 + 功能帧连续下发），
//! 每一帧在 ACK 监视器上等待状态机回到 `Ready` 或超时。
//! Reader 线程观察到确认/校验和后通过条件变量唤醒这里的等待。

use std::thread;
use std::time::Duration;

use tracing::{trace, warn};

use crate::manager::context::{LinkContext, LinkState};
use crate::manager::error::X10Error;
use crate::protocol::constants::{ACK_TIMEOUT, COMMAND_RESEND_MAX, MIN_RX_GAP};

/// 把一组帧作为原子单元下发
///
/// 整个序列只获取一次命令锁；帧间不会插入其他调用者的字节。
pub(crate) fn send_sequence(ctx: &LinkContext, frames: &[Vec<u8>]) -> Result<(), X10Error> {
    let _command = ctx.command_lock.lock();
    for frame in frames {
        transmit_frame(ctx, frame)?;
    }
    Ok(())
}

/// 下发单帧并等待确认
///
/// 长度 ≤1 的裸控制字节（0x00、0x8B 等）绕过 ACK 等待，直接写出。
/// 超时后重发最多 `COMMAND_RESEND_MAX` 次；重发预算耗尽时清空
/// 最近发送缓冲、强制回到 `Ready` 并继续（对调用者静默）。
fn transmit_frame(ctx: &LinkContext, frame: &[u8]) -> Result<(), X10Error> {
    if frame.len() <= 1 {
        return ctx.write_raw(frame);
    }

    // 速率限制：距最近入站字节不足 500ms 时等待
    loop {
        let since = ctx.since_last_rx();
        if since >= MIN_RX_GAP {
            break;
        }
        thread::sleep((MIN_RX_GAP - since).min(Duration::from_millis(50)));
    }

    let usb = ctx.usb_backend.load(std::sync::atomic::Ordering::SeqCst);
    let mut ack = ctx.ack.lock();

    // 先武装状态机再写出，避免控制器回得太快而错过迁移
    ack.last_sent = frame.to_vec();
    ack.wait_start = std::time::Instant::now();
    if usb {
        ack.state = LinkState::WaitingAck;
    } else {
        ack.expected_checksum = frame[0].wrapping_add(frame[1]);
        ack.state = LinkState::WaitingChecksum;
    }

    if let Err(e) = ctx.write_raw(frame) {
        ack.state = LinkState::Ready;
        ack.last_sent.clear();
        return Err(e);
    }

    let mut resends = 0u32;
    loop {
        if ack.state == LinkState::Ready {
            break;
        }

        let elapsed = ack.wait_start.elapsed();
        if elapsed >= ACK_TIMEOUT {
            if resends < COMMAND_RESEND_MAX {
                resends += 1;
                warn!("no ACK within timeout, resending (attempt {})", resends);
                let last = ack.last_sent.clone();
                if let Err(e) = ctx.write_raw(&last) {
                    ack.state = LinkState::Ready;
                    ack.last_sent.clear();
                    return Err(e);
                }
                ack.wait_start = std::time::Instant::now();
                ack.state = if usb {
                    LinkState::WaitingAck
                } else {
                    LinkState::WaitingChecksum
                };
                continue;
            }
            // 重发预算耗尽：清空缓冲并继续（命令失败对调用者静默）
            warn!("resend budget spent, dropping frame {:02X?}", ack.last_sent);
            ack.last_sent.clear();
            ack.state = LinkState::Ready;
            break;
        }

        let remaining = ACK_TIMEOUT - elapsed;
        ctx.ack_signal.wait_for(&mut ack, remaining);
    }

    trace!("frame {:02X?} acknowledged", frame);
    Ok(())
}
