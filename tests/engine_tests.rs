//! 引擎集成测试
//!
//! 用脚本化的控制器模拟器驱动完整管线：
//! Manager 命令 → 发送路径 → 模拟控制器应答 → Reader 线程 → 注册表/事件。

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use x10_sdk::transport::{TransportError, TransportReader, TransportWriter};
use x10_sdk::{Command, HouseCode, UnitCode, X10Config, X10Event, X10Manager};

/// 模拟控制器的共享状态：入站队列 + 已写出帧记录
#[derive(Default)]
struct SimState {
    read_queue: VecDeque<Vec<u8>>,
    written: Vec<Vec<u8>>,
}

#[derive(Clone)]
struct Sim {
    state: Arc<Mutex<SimState>>,
}

impl Sim {
    fn new() -> Self {
        Sim {
            state: Arc::new(Mutex::new(SimState::default())),
        }
    }

    /// 向引擎注入一段入站字节
    fn push(&self, chunk: &[u8]) {
        self.state.lock().read_queue.push_back(chunk.to_vec());
    }

    /// 引擎写出的全部帧
    fn written(&self) -> Vec<Vec<u8>> {
        self.state.lock().written.clone()
    }

    /// 引擎写出的命令帧（地址/功能帧，过滤控制字节与初始化序列）
    fn command_frames(&self) -> Vec<Vec<u8>> {
        self.written()
            .into_iter()
            .filter(|frame| frame.len() >= 2 && (frame[0] == 0x04 || frame[0] & 0x06 == 0x06))
            .collect()
    }

    fn reader(&self) -> Box<dyn TransportReader> {
        Box::new(SimReader { sim: self.clone() })
    }
}

struct SimReader {
    sim: Sim,
}

impl TransportReader for SimReader {
    fn read(&mut self) -> Result<Vec<u8>, TransportError> {
        if let Some(chunk) = self.sim.state.lock().read_queue.pop_front() {
            return Ok(chunk);
        }
        thread::sleep(Duration::from_millis(2));
        Ok(Vec::new())
    }
}

/// CM11 一类串口控制器模拟：回显校验和，确认 0x00 后回 0x55
struct Cm11Writer {
    sim: Sim,
}

impl TransportWriter for Cm11Writer {
    fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let mut state = self.sim.state.lock();
        state.written.push(data.to_vec());
        if data == [0x00] {
            state.read_queue.push_back(vec![0x55]);
        } else if data.len() >= 2 {
            let checksum = data[0].wrapping_add(data[1]);
            state.read_queue.push_back(vec![checksum, 0x00]);
        }
        Ok(())
    }
}

/// CM15 一类 USB 控制器模拟：对命令帧直接确认 0x55
struct Cm15Writer {
    sim: Sim,
}

impl TransportWriter for Cm15Writer {
    fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let mut state = self.sim.state.lock();
        state.written.push(data.to_vec());
        if data.len() >= 2 && (data[0] == 0x04 || data[0] == 0x06) {
            state.read_queue.push_back(vec![0x55]);
        }
        Ok(())
    }
}

fn serial_manager() -> (X10Manager, Sim) {
    let manager = X10Manager::with_config(X10Config {
        port_name: "/dev/ttyUSB0".to_string(),
        ..X10Config::default()
    });
    let sim = Sim::new();
    assert!(manager.connect_with(sim.reader(), Box::new(Cm11Writer { sim: sim.clone() })));
    (manager, sim)
}

fn usb_manager() -> (X10Manager, Sim) {
    let manager = X10Manager::new();
    let sim = Sim::new();
    assert!(manager.connect_with(sim.reader(), Box::new(Cm15Writer { sim: sim.clone() })));
    (manager, sim)
}

/// 收集事件到共享 Vec
fn collect_events(manager: &X10Manager) -> Arc<Mutex<Vec<X10Event>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let events_clone = events.clone();
    manager.subscribe(move |event| {
        events_clone.lock().push(event.clone());
    });
    events
}

/// 轮询等待条件成立（Reader 线程是异步的）
fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}

/// 串口发送 On 到 C7：出站帧恰为 04 25 / 06 22，镜像亮度 1.0
#[test]
fn test_serial_on_c7() {
    let (manager, sim) = serial_manager();

    manager.unit_on(HouseCode::C, UnitCode::Unit7).unwrap();

    assert_eq!(
        sim.command_frames(),
        vec![vec![0x04, 0x25], vec![0x06, 0x22]]
    );
    assert_eq!(manager.module("C7").unwrap().level(), 1.0);

    // 完整的串口 ACK 流程：每帧之后引擎都确认过 0x00
    let acks = sim
        .written()
        .iter()
        .filter(|frame| frame.as_slice() == [0x00])
        .count();
    assert_eq!(acks, 2);

    manager.disconnect();
}

/// USB 发送 Dim 50% 到 A1：出站帧 04 66 / 06 64 69，亮度保持钳制在 0.0
#[test]
fn test_usb_dim_a1() {
    let (manager, sim) = usb_manager();

    manager.dim(HouseCode::A, UnitCode::Unit1, 50).unwrap();

    assert_eq!(
        sim.command_frames(),
        vec![vec![0x04, 0x66], vec![0x06, 0x64, 0x69]]
    );
    assert_eq!(manager.module("A1").unwrap().level(), 0.0);

    manager.disconnect();
}

/// USB 会话安装时下发 CM15 初始化序列
#[test]
fn test_usb_init_sequence() {
    let (manager, sim) = usb_manager();

    let written = sim.written();
    assert!(written.len() >= 3);
    assert_eq!(written[0][0], 0x9B);
    assert_eq!(written[0].len(), 8);
    assert_eq!(written[1][0], 0xBB);
    assert_eq!(written[2], vec![0x8B]);

    manager.disconnect();
}

/// 入站 RF "A1 ON"：RfDataReceived + RfCommandReceived + 亮度 1.0
#[test]
fn test_inbound_rf_a1_on() {
    let (manager, sim) = usb_manager();
    let events = collect_events(&manager);

    sim.push(&[0x5D, 0x20, 0x60, 0x9F, 0x00, 0xFF]);

    assert!(wait_until(Duration::from_secs(2), || {
        manager.module("A1").map(|m| m.level()) == Some(1.0)
    }));

    let events = events.lock();
    assert!(
        events
            .iter()
            .any(|e| matches!(e, X10Event::RfDataReceived(d) if d == &[0x5D, 0x20, 0x60, 0x9F, 0x00, 0xFF]))
    );
    assert!(events.iter().any(|e| matches!(
        e,
        X10Event::RfCommandReceived {
            command: Command::On,
            house: HouseCode::A,
            unit: UnitCode::Unit1
        }
    )));
    drop(events);

    manager.disconnect();
}

/// 入站 RF "A1 OFF"：亮度回到 0.0
#[test]
fn test_inbound_rf_a1_off() {
    let (manager, sim) = usb_manager();
    let events = collect_events(&manager);

    sim.push(&[0x5D, 0x20, 0x60, 0x9F, 0x00, 0xFF]);
    assert!(wait_until(Duration::from_secs(2), || {
        manager.module("A1").map(|m| m.level()) == Some(1.0)
    }));

    // 去重窗口之外再注入 OFF
    thread::sleep(Duration::from_millis(550));
    sim.push(&[0x5D, 0x20, 0x60, 0x9F, 0x20, 0xDF]);
    assert!(wait_until(Duration::from_secs(2), || {
        manager.module("A1").map(|m| m.level()) == Some(0.0)
    }));

    assert!(events.lock().iter().any(|e| matches!(
        e,
        X10Event::RfCommandReceived {
            command: Command::Off,
            house: HouseCode::A,
            unit: UnitCode::Unit1
        }
    )));

    manager.disconnect();
}

/// 500ms 内两条相同的 RF 帧只产生一次 RfCommandReceived
#[test]
fn test_rf_duplicate_window() {
    let (manager, sim) = usb_manager();
    let events = collect_events(&manager);

    let frame = [0x5D, 0x20, 0x60, 0x9F, 0x00, 0xFF];
    sim.push(&frame);
    sim.push(&frame);

    assert!(wait_until(Duration::from_secs(2), || {
        !events
            .lock()
            .iter()
            .filter(|e| matches!(e, X10Event::RfCommandReceived { .. }))
            .collect::<Vec<_>>()
            .is_empty()
    }));
    // 给第二条帧留出被处理（并被抑制）的时间
    thread::sleep(Duration::from_millis(100));

    let count = events
        .lock()
        .iter()
        .filter(|e| matches!(e, X10Event::RfCommandReceived { .. }))
        .count();
    assert_eq!(count, 1);

    manager.disconnect();
}

/// 入站短轮询 5A：引擎应答 C3 并首次举升连接就绪
#[test]
fn test_inbound_plc_poll() {
    let (manager, sim) = serial_manager();
    let events = collect_events(&manager);

    assert!(!manager.is_connected());
    sim.push(&[0x5A]);

    assert!(wait_until(Duration::from_secs(2), || manager.is_connected()));
    assert!(
        sim.written()
            .iter()
            .any(|frame| frame.as_slice() == [0xC3])
    );
    assert!(
        events
            .lock()
            .iter()
            .any(|e| matches!(e, X10Event::ConnectionStatus(true)))
    );

    manager.disconnect();
}

/// 入站 RF 安防帧产生结构化事件
#[test]
fn test_inbound_rf_security() {
    let (manager, sim) = usb_manager();
    let events = collect_events(&manager);

    sim.push(&[0x5D, 0x29, 0x60, 0x6F, 0x0C, 0xF3, 0x12, 0x80]);

    assert!(wait_until(Duration::from_secs(2), || {
        events
            .lock()
            .iter()
            .any(|e| matches!(e, X10Event::RfSecurityReceived { .. }))
    }));

    let events = events.lock();
    assert!(events.iter().any(|e| matches!(
        e,
        X10Event::RfSecurityReceived {
            event: x10_sdk::SecurityEvent::MotionAlert,
            address: 0x601200
        }
    )));
    drop(events);

    manager.disconnect();
}

/// 扩展轮询数据帧驱动注册表并发布 PLC 事件
#[test]
fn test_inbound_plc_message() {
    let (manager, sim) = serial_manager();
    let events = collect_events(&manager);

    // A1 地址 + A On 功能
    sim.push(&[0x5A, 0x03, 0x02, 0x66, 0x62]);

    assert!(wait_until(Duration::from_secs(2), || {
        manager.module("A1").map(|m| m.level()) == Some(1.0)
    }));

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
    drop(events);

    manager.disconnect();
}

/// 亮度变化通过 ModuleChanged 通知订阅者
#[test]
fn test_module_changed_event() {
    let (manager, sim) = usb_manager();
    let events = collect_events(&manager);

    sim.push(&[0x5D, 0x20, 0x60, 0x9F, 0x00, 0xFF]);

    assert!(wait_until(Duration::from_secs(2), || {
        events.lock().iter().any(|e| {
            matches!(e, X10Event::ModuleChanged { module, property: "Level" } if module.address() == "A1")
        })
    }));

    manager.disconnect();
}

/// 所有入站效果都不会让亮度越出 [0, 1]
#[test]
fn test_levels_stay_clamped() {
    let (manager, sim) = usb_manager();

    // 反复 Bright：先寻址 A1，再持续加亮
    sim.push(&[0x5D, 0x20, 0x60, 0x9F, 0x00, 0xFF]);
    for _ in 0..20 {
        thread::sleep(Duration::from_millis(550));
        sim.push(&[0x5D, 0x20, 0x60, 0x9F, 0x88, 0x77]);
        if manager.module("A1").map(|m| m.level()) == Some(1.0) {
            break;
        }
    }

    for module in manager.modules().modules() {
        let level = module.level();
        assert!((0.0..=1.0).contains(&level), "level {} out of range", level);
    }

    manager.disconnect();
}
