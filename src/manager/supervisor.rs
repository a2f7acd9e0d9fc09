//! 会话生命周期与连接监护
//!
//! 会话 = 一次连接尝试的传输读/写两半 + Reader 线程。
//! 监护线程每秒巡检一次 I/O 错误标志：发现错误即关闭会话、
//! 退避 3 秒后重开；设备不在场视为瞬态条件，持续重试直到 Disconnect。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::manager::context::LinkContext;
use crate::manager::error::X10Error;
use crate::manager::reader::reader_loop;
use crate::protocol::constants::{
    JOIN_DEADLINE, RECONNECT_BACKOFF, STATUS_REQUEST, SUPERVISOR_TICK,
};
use crate::protocol::encode;
use crate::transport::{self, TransportReader, TransportWriter};

/// 一次连接尝试的线程句柄
pub(crate) struct Session {
    reader: Option<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            reader: None,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// 安装一对已打开的传输两半并启动 Reader 线程
///
/// USB 后端在此下发 CM15 初始化序列（时间帧、监听位图、状态请求）。
pub(crate) fn install_session(
    ctx: &Arc<LinkContext>,
    session: &Arc<Mutex<Session>>,
    reader: Box<dyn TransportReader>,
    writer: Box<dyn TransportWriter>,
) {
    *ctx.writer.lock() = Some(writer);
    ctx.reset_link();

    let config = ctx.config.read().clone();
    ctx.usb_backend.store(config.is_usb(), Ordering::SeqCst);
    if config.is_usb() {
        ctx.send_time_set(false);
        if let Err(e) = ctx.write_raw(&encode::monitored_codes_frame(&config.house_codes)) {
            warn!("failed to send monitored codes frame: {}", e);
        }
        if let Err(e) = ctx.write_raw(&[STATUS_REQUEST]) {
            warn!("failed to send status request: {}", e);
        }
    }

    let stop = Arc::new(AtomicBool::new(false));
    let handle = {
        let ctx = ctx.clone();
        let stop = stop.clone();
        thread::spawn(move || reader_loop(reader, ctx, stop))
    };

    let mut session = session.lock();
    session.stop = stop;
    session.reader = Some(handle);
}

/// 按配置的端口名打开传输并安装会话
pub(crate) fn open_session(
    ctx: &Arc<LinkContext>,
    session: &Arc<Mutex<Session>>,
) -> Result<(), X10Error> {
    let port_name = ctx.config.read().port_name.clone();
    let (reader, writer) = transport::open(&port_name)?;
    install_session(ctx, session, reader, writer);
    Ok(())
}

/// 停止 Reader 线程、丢弃传输两半并复位就绪闩锁
pub(crate) fn close_session(ctx: &Arc<LinkContext>, session: &Arc<Mutex<Session>>) {
    let (handle, stop) = {
        let mut session = session.lock();
        (session.reader.take(), session.stop.clone())
    };
    stop.store(true, Ordering::SeqCst);
    if let Some(handle) = handle {
        join_with_deadline(handle, JOIN_DEADLINE);
    }
    // 丢弃两半即关闭底层设备
    *ctx.writer.lock() = None;
    ctx.set_ready(false);
}

/// 在期限内等待线程退出
///
/// 协作式取消 + 短读超时使线程通常在几百毫秒内退出；
/// 超过期限时放弃 join，让线程自行消亡。
pub(crate) fn join_with_deadline(handle: JoinHandle<()>, deadline: Duration) {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if handle.is_finished() {
            let _ = handle.join();
            return;
        }
        thread::sleep(Duration::from_millis(10));
    }
    warn!("worker thread did not stop within {:?}, detaching", deadline);
}

/// 监护线程循环
pub(crate) fn supervisor_loop(
    ctx: Arc<LinkContext>,
    session: Arc<Mutex<Session>>,
    stop: Arc<AtomicBool>,
) {
    while !stop.load(Ordering::SeqCst) {
        if !sleep_cancellable(&stop, SUPERVISOR_TICK) {
            return;
        }
        if !ctx.io_error.load(Ordering::SeqCst) {
            continue;
        }

        warn!("I/O error flagged, rebuilding connection");
        close_session(&ctx, &session);
        if !sleep_cancellable(&stop, RECONNECT_BACKOFF) {
            return;
        }
        match open_session(&ctx, &session) {
            Ok(()) => {
                ctx.io_error.store(false, Ordering::SeqCst);
                info!("connection re-established");
            },
            Err(e) => {
                // 设备可能尚未插回，下一个巡检周期继续重试
                warn!("reconnect attempt failed: {}", e);
            },
        }
    }
}

/// 可取消的睡眠；被取消时返回 false
fn sleep_cancellable(stop: &AtomicBool, duration: Duration) -> bool {
    let start = Instant::now();
    while start.elapsed() < duration {
        if stop.load(Ordering::SeqCst) {
            return false;
        }
        thread::sleep(Duration::from_millis(50));
    }
    true
}
