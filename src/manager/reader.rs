//! Reader 线程
//!
//! 单读者：阻塞在传输读半上，对每段入站字节按固定顺序套用分类规则，
//! 更新 ACK 状态机、把解码结果写入注册表并分发用户事件。
//! 解码器的会话状态（已寻址集合、地址闩锁、RF 去重窗口、零字节计数）
//! 保持为循环局部变量，不进入共享上下文。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use tracing::{error, trace, warn};

use crate::manager::context::{LinkContext, LinkState};
use crate::manager::events::X10Event;
use crate::manager::registry::{X10Module, round_level};
use crate::protocol::constants::*;
use crate::protocol::decode::{
    PlcItem, RfStandardCommand, decode_plc_message, decode_rf_security, decode_rf_standard,
};
use crate::protocol::{Command, HouseCode, UnitCode};
use crate::transport::TransportReader;

/// Reader 循环的本地解码状态
struct DecodeState {
    /// 已寻址集合：后续功能帧作用的模块累积
    addressed: Vec<Arc<X10Module>>,
    /// 下一个地址字节是否先清空已寻址集合
    new_address_data: bool,
    /// RF 去重：最近一条 RF 帧原始字节及其到达时刻
    last_rf: Vec<u8>,
    last_rf_at: Option<Instant>,
    /// 连续零字节计数（线路掉落启发式）
    zero_count: u32,
}

impl DecodeState {
    fn new() -> Self {
        Self {
            addressed: Vec::new(),
            new_address_data: true,
            last_rf: Vec::new(),
            last_rf_at: None,
            zero_count: 0,
        }
    }
}

/// Reader 线程循环
///
/// 读半超时返回空序列保证 `stop` 标志被高频检查；
/// 非瞬态读错误置位 I/O 错误标志并退出，由监护线程重建会话。
pub(crate) fn reader_loop(
    mut transport: Box<dyn TransportReader>,
    ctx: Arc<LinkContext>,
    stop: Arc<AtomicBool>,
) {
    let mut state = DecodeState::new();

    while !stop.load(Ordering::SeqCst) {
        let chunk = match transport.read() {
            Ok(chunk) => chunk,
            Err(e) if e.is_transient() => continue,
            Err(e) => {
                error!("transport read failed: {}", e);
                ctx.io_error.store(true, Ordering::SeqCst);
                break;
            },
        };
        if chunk.is_empty() {
            continue;
        }
        trace!("RX {:02X?}", chunk);
        process_chunk(&ctx, &chunk, &mut state);
    }
}

/// 对一段入站字节套用分类规则（顺序固定）
fn process_chunk(ctx: &LinkContext, chunk: &[u8], state: &mut DecodeState) {
    // 规则 1：等待已超过 ACK 超时仍未回到 Ready，强制复位
    {
        let mut ack = ctx.ack.lock();
        if ack.state != LinkState::Ready && ack.wait_start.elapsed() >= ACK_TIMEOUT {
            warn!("stuck in {:?} past ACK timeout, forcing Ready", ack.state);
            ack.state = LinkState::Ready;
            ctx.ack_signal.notify_all();
        }
    }

    let first = chunk[0];

    // 规则 2：命令确认
    {
        let mut ack = ctx.ack.lock();
        if ack.state == LinkState::WaitingAck && first == PLC_READY && chunk.len() <= 2 {
            ack.state = LinkState::Ready;
            ctx.ack_signal.notify_all();
            return;
        }
    }

    // 规则 3：接口就绪指示（状态响应 ≥13 字节，或 [0xFF, 0x00]）
    if (chunk.len() >= 13 || chunk == [0xFF, 0x00]) && !ctx.is_ready() {
        ctx.set_ready(true);
        ctx.send_time_set(false);
        let mut ack = ctx.ack.lock();
        ack.state = LinkState::Ready;
        ctx.ack_signal.notify_all();
        return;
    }

    // 规则 4：串口校验和回显
    {
        let mut ack = ctx.ack.lock();
        if ack.state == LinkState::WaitingChecksum && chunk.len() == 2 && chunk[1] == 0x00 {
            let strict = ctx.config.read().strict_checksum;
            if strict && first != ack.expected_checksum {
                warn!(
                    "checksum mismatch: expected {:02X}, got {:02X}, resending",
                    ack.expected_checksum, first
                );
                let last = ack.last_sent.clone();
                if ctx.write_raw(&last).is_ok() {
                    ack.wait_start = Instant::now();
                }
            } else {
                // 默认不验证校验和取值，直接确认（与控制器固件的既有交互保持一致）
                let _ = ctx.write_raw(&[CHECKSUM_ACK]);
                ack.state = LinkState::WaitingAck;
                ack.wait_start = Instant::now();
            }
            return;
        }
    }

    match FrameType::from_byte(first) {
        // 规则 5：宏帧只刷新接收时间戳
        Some(FrameType::Macro) => {
            ctx.touch_rx();
        },

        // 规则 6：RF 帧
        Some(FrameType::Rf) => {
            ctx.touch_rx();
            handle_rf(ctx, chunk, state);
        },

        // 规则 7：短轮询，应答 0xC3
        Some(FrameType::PlcPoll) if chunk.len() <= 2 => {
            ctx.set_ready(true);
            if ctx.write_raw(&[PLC_REPLY_TO_POLL]).is_ok() {
                let mut ack = ctx.ack.lock();
                if ack.state == LinkState::Ready {
                    ack.state = LinkState::WaitingPollReply;
                    ack.wait_start = Instant::now();
                }
            }
        },

        // 规则 8：滤波失败轮询，原样回复
        Some(FrameType::PlcFilterFailPoll) if chunk.len() <= 2 => {
            ctx.set_ready(true);
            let _ = ctx.write_raw(&[PLC_FILTER_FAIL_POLL]);
        },

        // 规则 9：扩展轮询数据帧
        Some(FrameType::PlcPoll) if chunk.len() > 3 => {
            handle_plc_message(ctx, chunk, state);
        },

        // 规则 10：控制器请求时间
        Some(FrameType::PlcTimeRequest) => {
            ctx.send_time_set(false);
        },

        // 规则 11：其余字节
        _ => {
            if first == 0x00 {
                // 连续零字节通常意味着串口线路掉落（部分平台上唯一的征兆）
                state.zero_count += 1;
                let limit = ctx.config.read().zero_checksum_limit;
                if limit > 0 && state.zero_count > limit {
                    warn!("more than {} zero bytes in a row, assuming line drop", limit);
                    state.zero_count = 0;
                    ctx.io_error.store(true, Ordering::SeqCst);
                }
            } else {
                let _ = ctx.write_raw(&[CHECKSUM_ACK]);
                state.zero_count = 0;
            }
        },
    }
}

/// 处理一条 RF 帧：去重、发布原始字节、解码并套用效果
fn handle_rf(ctx: &LinkContext, chunk: &[u8], state: &mut DecodeState) {
    if let Some(at) = state.last_rf_at
        && state.last_rf == chunk
        && at.elapsed() < RF_DUPLICATE_WINDOW
    {
        trace!("duplicate RF frame suppressed");
        return;
    }
    state.last_rf = chunk.to_vec();
    state.last_rf_at = Some(Instant::now());

    ctx.events.dispatch(&X10Event::RfDataReceived(chunk.to_vec()));

    if chunk.len() == 8 && chunk[1] == RF_PREFIX_SECURITY {
        match decode_rf_security(chunk) {
            Ok(message) => ctx.events.dispatch(&X10Event::RfSecurityReceived {
                event: message.event,
                address: message.address,
            }),
            Err(e) => warn!("dropping malformed RF security frame: {}", e),
        }
        return;
    }

    if chunk.len() == 6 && chunk[1] == RF_PREFIX_STANDARD {
        match decode_rf_standard(chunk) {
            Ok(command) => apply_rf_command(ctx, command, state),
            Err(e) => warn!("dropping malformed RF frame: {}", e),
        }
        return;
    }

    warn!("unrecognized RF frame shape: {:02X?}", chunk);
}

/// 把一条 RF 标准命令套用到注册表并发布事件
fn apply_rf_command(ctx: &LinkContext, command: RfStandardCommand, state: &mut DecodeState) {
    ctx.events.dispatch(&X10Event::RfCommandReceived {
        command: command.command,
        house: command.house,
        unit: command.unit,
    });

    let step = RF_DIM_STEP as f64 / DIM_FULL_SCALE;
    match command.command {
        Command::On | Command::Off if command.unit != UnitCode::NotSet => {
            // 已寻址集合重置为这一个单元
            let module = ctx.registry.get_or_create(command.house, command.unit);
            state.addressed.clear();
            state.addressed.push(module.clone());
            module.set_level(if command.command == Command::On { 1.0 } else { 0.0 });
        },
        Command::AllLightsOn if command.house != HouseCode::NotSet => {
            state.addressed.clear();
            ctx.registry.set_house_level(command.house, 1.0);
        },
        Command::AllUnitsOff if command.house != HouseCode::NotSet => {
            state.addressed.clear();
            ctx.registry.set_house_level(command.house, 0.0);
        },
        Command::Dim => {
            for module in &state.addressed {
                module.set_level(round_level(module.level() - step).max(0.0));
            }
        },
        Command::Bright => {
            for module in &state.addressed {
                module.set_level(round_level(module.level() + step).min(1.0));
            }
        },
        _ => {},
    }
}

/// 处理扩展轮询数据帧：逐字节解码为地址/功能并套用
fn handle_plc_message(ctx: &LinkContext, chunk: &[u8], state: &mut DecodeState) {
    let reversed = ctx.usb_backend.load(Ordering::SeqCst);
    let items = match decode_plc_message(chunk, reversed) {
        Ok(items) => items,
        Err(e) => {
            warn!("dropping malformed PLC message: {}", e);
            return;
        },
    };

    // 短轮询的应答已经得到数据，链路回到空闲
    {
        let mut ack = ctx.ack.lock();
        if ack.state == LinkState::WaitingPollReply {
            ack.state = LinkState::Ready;
            ctx.ack_signal.notify_all();
        }
    }

    for item in items {
        match item {
            PlcItem::Address { house, unit } => {
                if state.new_address_data {
                    state.new_address_data = false;
                    state.addressed.clear();
                }
                let module = ctx.registry.get_or_create(house, unit);
                if !state.addressed.iter().any(|m| m.address() == module.address()) {
                    state.addressed.push(module);
                }
                ctx.events.dispatch(&X10Event::PlcAddressReceived { house, unit });
            },
            PlcItem::Function {
                house,
                command,
                magnitude,
            } => {
                apply_plc_function(ctx, house, command, magnitude, state);
                ctx.events.dispatch(&X10Event::PlcFunctionReceived { command, house });
                state.new_address_data = true;
            },
        }
    }
}

/// 把一个 PLC 功能字节套用到已寻址集合 / 整个房屋
fn apply_plc_function(
    ctx: &LinkContext,
    house: HouseCode,
    command: Command,
    magnitude: u8,
    state: &mut DecodeState,
) {
    let amount = magnitude as f64 / DIM_FULL_SCALE;
    match command {
        Command::On => {
            for module in &state.addressed {
                module.set_level(1.0);
            }
        },
        Command::Off => {
            for module in &state.addressed {
                module.set_level(0.0);
            }
        },
        Command::Dim => {
            for module in &state.addressed {
                module.set_level(round_level(module.level() - amount).max(0.0));
            }
        },
        Command::Bright => {
            for module in &state.addressed {
                module.set_level(round_level(module.level() + amount).min(1.0));
            }
        },
        Command::AllUnitsOff => {
            state.addressed.clear();
            ctx.registry.set_house_level(house, 0.0);
        },
        Command::AllLightsOn => {
            state.addressed.clear();
            ctx.registry.set_house_level(house, 1.0);
        },
        _ => {
            trace!("PLC function {:?} has no registry effect", command);
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::config::X10Config;
    use crate::transport::{TransportError, TransportWriter};
    use parking_lot::Mutex as PlMutex;
    use std::sync::atomic::AtomicUsize;

    struct RecordingWriter {
        written: Arc<PlMutex<Vec<Vec<u8>>>>,
    }

    impl TransportWriter for RecordingWriter {
        fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
            self.written.lock().push(data.to_vec());
            Ok(())
        }
    }

    fn serial_context() -> (Arc<LinkContext>, Arc<PlMutex<Vec<Vec<u8>>>>) {
        let ctx = LinkContext::new(X10Config {
            port_name: "/dev/ttyUSB0".to_string(),
            ..X10Config::default()
        });
        ctx.usb_backend.store(false, Ordering::SeqCst);
        let written = Arc::new(PlMutex::new(Vec::new()));
        *ctx.writer.lock() = Some(Box::new(RecordingWriter {
            written: written.clone(),
        }));
        (ctx, written)
    }

    fn collect_events(ctx: &LinkContext) -> Arc<PlMutex<Vec<X10Event>>> {
        let events = Arc::new(PlMutex::new(Vec::new()));
        let events_clone = events.clone();
        ctx.events.subscribe(move |event| {
            events_clone.lock().push(event.clone());
        });
        events
    }

    #[test]
    fn test_short_poll_replied_with_c3() {
        let (ctx, written) = serial_context();
        let events = collect_events(&ctx);
        let mut state = DecodeState::new();

        process_chunk(&ctx, &[0x5A], &mut state);

        assert_eq!(written.lock().as_slice(), &[vec![0xC3]]);
        assert!(ctx.is_ready());
        assert!(
            events
                .lock()
                .iter()
                .any(|e| matches!(e, X10Event::ConnectionStatus(true)))
        );
        // 第二次轮询不再触发就绪事件
        process_chunk(&ctx, &[0x5A], &mut state);
        let count = events
            .lock()
            .iter()
            .filter(|e| matches!(e, X10Event::ConnectionStatus(true)))
            .count();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_filter_fail_poll_echoed() {
        let (ctx, written) = serial_context();
        let mut state = DecodeState::new();
        process_chunk(&ctx, &[0xF3], &mut state);
        assert_eq!(written.lock().as_slice(), &[vec![0xF3]]);
        assert!(ctx.is_ready());
    }

    #[test]
    fn test_serial_checksum_flow() {
        let (ctx, written) = serial_context();
        let mut state = DecodeState::new();

        // 模拟发送路径刚写出 [0x04, 0x25]
        {
            let mut ack = ctx.ack.lock();
            ack.state = LinkState::WaitingChecksum;
            ack.expected_checksum = 0x29;
            ack.last_sent = vec![0x04, 0x25];
            ack.wait_start = Instant::now();
        }

        // 控制器回显校验和 → 引擎确认 0x00 并等待 0x55
        process_chunk(&ctx, &[0x29, 0x00], &mut state);
        assert_eq!(written.lock().as_slice(), &[vec![0x00]]);
        assert_eq!(ctx.ack.lock().state, LinkState::WaitingAck);

        // 控制器确认 → 回到 Ready
        process_chunk(&ctx, &[0x55], &mut state);
        assert_eq!(ctx.ack.lock().state, LinkState::Ready);
    }

    #[test]
    fn test_checksum_value_not_verified_by_default() {
        let (ctx, written) = serial_context();
        let mut state = DecodeState::new();
        {
            let mut ack = ctx.ack.lock();
            ack.state = LinkState::WaitingChecksum;
            ack.expected_checksum = 0x29;
            ack.wait_start = Instant::now();
        }

        // 默认模式下错误的校验和取值照样被确认
        process_chunk(&ctx, &[0x77, 0x00], &mut state);
        assert_eq!(written.lock().as_slice(), &[vec![0x00]]);
        assert_eq!(ctx.ack.lock().state, LinkState::WaitingAck);
    }

    #[test]
    fn test_strict_checksum_resends() {
        let (ctx, written) = serial_context();
        ctx.config.write().strict_checksum = true;
        let mut state = DecodeState::new();
        {
            let mut ack = ctx.ack.lock();
            ack.state = LinkState::WaitingChecksum;
            ack.expected_checksum = 0x29;
            ack.last_sent = vec![0x04, 0x25];
            ack.wait_start = Instant::now();
        }

        process_chunk(&ctx, &[0x77, 0x00], &mut state);
        // 重发原帧而不是确认
        assert_eq!(written.lock().as_slice(), &[vec![0x04, 0x25]]);
        assert_eq!(ctx.ack.lock().state, LinkState::WaitingChecksum);
    }

    #[test]
    fn test_rf_a1_on_updates_module() {
        let (ctx, _) = serial_context();
        let events = collect_events(&ctx);
        let mut state = DecodeState::new();

        process_chunk(&ctx, &[0x5D, 0x20, 0x60, 0x9F, 0x00, 0xFF], &mut state);

        assert_eq!(ctx.registry.get("A1").unwrap().level(), 1.0);
        let events = events.lock();
        assert!(events.iter().any(|e| matches!(e, X10Event::RfDataReceived(d) if d.len() == 6)));
        assert!(events.iter().any(|e| matches!(
            e,
            X10Event::RfCommandReceived {
                command: Command::On,
                house: HouseCode::A,
                unit: UnitCode::Unit1
            }
        )));
    }

    #[test]
    fn test_rf_duplicate_suppressed() {
        let (ctx, _) = serial_context();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();
        ctx.events.subscribe(move |event| {
            if matches!(event, X10Event::RfCommandReceived { .. }) {
                counter_clone.fetch_add(1, Ordering::SeqCst);
            }
        });
        let mut state = DecodeState::new();

        let frame = [0x5D, 0x20, 0x60, 0x9F, 0x00, 0xFF];
        process_chunk(&ctx, &frame, &mut state);
        process_chunk(&ctx, &frame, &mut state);
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        // 不同的帧不受抑制
        process_chunk(&ctx, &[0x5D, 0x20, 0x60, 0x9F, 0x20, 0xDF], &mut state);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_rf_invalid_frame_no_effect() {
        let (ctx, _) = serial_context();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();
        ctx.events.subscribe(move |event| {
            if matches!(event, X10Event::RfCommandReceived { .. }) {
                counter_clone.fetch_add(1, Ordering::SeqCst);
            }
        });
        ctx.registry.rebuild(&[HouseCode::A]);
        let mut state = DecodeState::new();

        // b5 & !b4 != b5，补码校验失败
        process_chunk(&ctx, &[0x5D, 0x20, 0x60, 0x9F, 0x00, 0x01], &mut state);

        assert_eq!(counter.load(Ordering::SeqCst), 0);
        for module in ctx.registry.modules() {
            assert_eq!(module.level(), 0.0);
        }
    }

    #[test]
    fn test_rf_security_event() {
        let (ctx, _) = serial_context();
        let events = collect_events(&ctx);
        let mut state = DecodeState::new();

        process_chunk(
            &ctx,
            &[0x5D, 0x29, 0x60, 0x6F, 0x0C, 0xF3, 0x12, 0x80],
            &mut state,
        );

        assert!(events.lock().iter().any(|e| matches!(
            e,
            X10Event::RfSecurityReceived {
                event: crate::protocol::SecurityEvent::MotionAlert,
                address: 0x601200
            }
        )));
    }

    #[test]
    fn test_rf_dim_applies_to_addressed() {
        let (ctx, _) = serial_context();
        let mut state = DecodeState::new();

        // A1 ON 把已寻址集合重置为 A1
        process_chunk(&ctx, &[0x5D, 0x20, 0x60, 0x9F, 0x00, 0xFF], &mut state);
        // A 房屋 Dim 一步：1.0 - round(15/210) = 0.93
        process_chunk(&ctx, &[0x5D, 0x20, 0x60, 0x9F, 0x98, 0x67], &mut state);

        assert_eq!(ctx.registry.get("A1").unwrap().level(), 0.93);
    }

    #[test]
    fn test_plc_message_address_then_function() {
        let (ctx, _) = serial_context();
        let events = collect_events(&ctx);
        let mut state = DecodeState::new();

        // A1 地址 + A On 功能
        process_chunk(&ctx, &[0x5A, 0x03, 0x02, 0x66, 0x62], &mut state);

        assert_eq!(ctx.registry.get("A1").unwrap().level(), 1.0);
        let events = events.lock();
        assert!(events.iter().any(|e| matches!(
            e,
            X10Event::PlcAddressReceived {
                house: HouseCode::A,
                unit: UnitCode::Unit1
            }
        )));
        assert!(events.iter().any(|e| matches!(
            e,
            X10Event::PlcFunctionReceived {
                command: Command::On,
                house: HouseCode::A
            }
        )));
        // 功能字节之后闩锁复位，下一个地址重新开始累积
        assert!(state.new_address_data);
    }

    #[test]
    fn test_plc_addresses_accumulate_until_function() {
        let (ctx, _) = serial_context();
        let mut state = DecodeState::new();

        // 两个地址字节 + Off 功能：A1 与 A2 同时熄灭
        process_chunk(&ctx, &[0x5A, 0x04, 0x04, 0x66, 0x6E, 0x63], &mut state);

        assert_eq!(ctx.registry.get("A1").unwrap().level(), 0.0);
        assert_eq!(ctx.registry.get("A2").unwrap().level(), 0.0);
        assert_eq!(state.addressed.len(), 2);
    }

    #[test]
    fn test_plc_all_units_off() {
        let (ctx, _) = serial_context();
        ctx.registry.set_house_level(HouseCode::A, 1.0);
        let mut state = DecodeState::new();

        // A AllUnitsOff 功能字节（0x60 | 0x0）
        process_chunk(&ctx, &[0x5A, 0x02, 0x01, 0x60], &mut state);

        for module in ctx.registry.modules_of_house(HouseCode::A) {
            assert_eq!(module.level(), 0.0);
        }
        assert!(state.addressed.is_empty());
    }

    #[test]
    fn test_zero_counter_triggers_io_error() {
        let (ctx, written) = serial_context();
        ctx.config.write().zero_checksum_limit = 3;
        let mut state = DecodeState::new();

        for _ in 0..3 {
            process_chunk(&ctx, &[0x00], &mut state);
            assert!(!ctx.io_error.load(Ordering::SeqCst));
        }
        process_chunk(&ctx, &[0x00], &mut state);
        assert!(ctx.io_error.load(Ordering::SeqCst));
        // 零字节不回 ACK
        assert!(written.lock().is_empty());
    }

    #[test]
    fn test_unknown_byte_acked_and_resets_zero_counter() {
        let (ctx, written) = serial_context();
        let mut state = DecodeState::new();

        process_chunk(&ctx, &[0x00], &mut state);
        process_chunk(&ctx, &[0x42], &mut state);
        assert_eq!(state.zero_count, 0);
        assert_eq!(written.lock().as_slice(), &[vec![0x00]]);
    }

    #[test]
    fn test_interface_ready_indication() {
        let (ctx, written) = serial_context();
        let events = collect_events(&ctx);
        let mut state = DecodeState::new();

        process_chunk(&ctx, &[0xFF, 0x00], &mut state);

        assert!(ctx.is_ready());
        assert!(
            events
                .lock()
                .iter()
                .any(|e| matches!(e, X10Event::ConnectionStatus(true)))
        );
        // 就绪后下发时间帧（串口 7 字节，帧头 0x9B）
        let written = written.lock();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0][0], 0x9B);
        assert_eq!(written[0].len(), 7);
    }

    #[test]
    fn test_time_request_resends_clock() {
        let (ctx, written) = serial_context();
        let mut state = DecodeState::new();
        process_chunk(&ctx, &[0xA5], &mut state);
        let written = written.lock();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0][0], 0x9B);
    }

    #[test]
    fn test_ack_while_waiting() {
        let (ctx, _) = serial_context();
        let mut state = DecodeState::new();
        {
            let mut ack = ctx.ack.lock();
            ack.state = LinkState::WaitingAck;
            ack.wait_start = Instant::now();
        }
        process_chunk(&ctx, &[0x55, 0x00], &mut state);
        assert_eq!(ctx.ack.lock().state, LinkState::Ready);
    }
}
