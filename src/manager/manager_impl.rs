//! Manager Facade
//!
//! 对外的 `X10Manager` 结构体：连接管理、命令下发（镜像亮度）、
//! 注册表访问与事件订阅。内部持有共享上下文和工作线程句柄。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use chrono::Local;
use parking_lot::Mutex;
use tracing::warn;

use crate::manager::config::X10Config;
use crate::manager::context::LinkContext;
use crate::manager::error::X10Error;
use crate::manager::events::X10Event;
use crate::manager::registry::{ModuleRegistry, X10Module, round_level};
use crate::manager::supervisor::{
    Session, close_session, install_session, join_with_deadline, open_session, supervisor_loop,
};
use crate::manager::transmit::send_sequence;
use crate::protocol::constants::JOIN_DEADLINE;
use crate::protocol::{Command, HouseCode, UnitCode, encode};
use crate::transport::{TransportReader, TransportWriter};

/// 监护线程句柄
struct SupervisorHandle {
    thread: JoinHandle<()>,
    stop: Arc<AtomicBool>,
}

/// X10 驱动 Manager（对外 API）
///
/// # Example
///
/// ```no_run
/// use x10_sdk::{X10Config, X10Event, X10Manager};
///
/// let manager = X10Manager::with_config(X10Config {
///     port_name: "USB".to_string(),
///     ..X10Config::default()
/// });
/// manager.set_house_codes("A,C").unwrap();
/// manager.subscribe(|event| {
///     if let X10Event::ModuleChanged { module, .. } = event {
///         println!("{} -> {}", module.address(), module.level());
///     }
/// });
/// manager.connect();
/// ```
pub struct X10Manager {
    ctx: Arc<LinkContext>,
    session: Arc<Mutex<Session>>,
    supervisor: Mutex<Option<SupervisorHandle>>,
}

impl X10Manager {
    /// 以默认配置创建（USB 后端，监听房屋 A）
    pub fn new() -> Self {
        Self::with_config(X10Config::default())
    }

    /// 以指定配置创建
    pub fn with_config(config: X10Config) -> Self {
        Self {
            ctx: LinkContext::new(config),
            session: Arc::new(Mutex::new(Session::new())),
            supervisor: Mutex::new(None),
        }
    }

    /// 当前配置的快照
    pub fn config(&self) -> X10Config {
        self.ctx.config.read().clone()
    }

    /// 设置端口名（`"USB"` 或串口设备路径），下次 Connect 生效
    pub fn set_port_name(&self, port_name: &str) {
        self.ctx.config.write().port_name = port_name.to_string();
    }

    /// 设置监听房屋码（逗号分隔的大写字母，如 `"A,C"`）
    ///
    /// 注册表随之重建：每个房屋生成单元 1..=16。
    pub fn set_house_codes(&self, input: &str) -> Result<(), X10Error> {
        let houses = X10Config::parse_house_codes(input)?;
        self.ctx.config.write().house_codes = houses.clone();
        self.ctx.registry.rebuild(&houses);
        Ok(())
    }

    /// 建立连接（幂等：先断开已有会话）
    ///
    /// 返回传输是否打开成功；就绪状态随后由首个轮询/状态响应异步确立。
    /// 打开失败时监护线程仍会启动并持续重试（支持热插拔）。
    pub fn connect(&self) -> bool {
        self.disconnect();
        let opened = match open_session(&self.ctx, &self.session) {
            Ok(()) => true,
            Err(e) => {
                warn!("connect failed: {}", e);
                // 交给监护线程按退避周期重试
                self.ctx.io_error.store(true, Ordering::SeqCst);
                false
            },
        };
        self.spawn_supervisor();
        opened
    }

    /// 用一对已打开的传输两半建立连接（依赖注入，测试与自定义后端用）
    pub fn connect_with(
        &self,
        reader: Box<dyn TransportReader>,
        writer: Box<dyn TransportWriter>,
    ) -> bool {
        self.disconnect();
        install_session(&self.ctx, &self.session, reader, writer);
        self.spawn_supervisor();
        true
    }

    fn spawn_supervisor(&self) {
        let stop = Arc::new(AtomicBool::new(false));
        let thread = {
            let ctx = self.ctx.clone();
            let session = self.session.clone();
            let stop = stop.clone();
            thread::spawn(move || supervisor_loop(ctx, session, stop))
        };
        *self.supervisor.lock() = Some(SupervisorHandle { thread, stop });
    }

    /// 断开连接：先停监护线程再收会话，最后复位错误标志
    pub fn disconnect(&self) {
        if let Some(handle) = self.supervisor.lock().take() {
            handle.stop.store(true, Ordering::SeqCst);
            join_with_deadline(handle.thread, JOIN_DEADLINE);
        }
        close_session(&self.ctx, &self.session);
        self.ctx.io_error.store(false, Ordering::SeqCst);
    }

    /// 连接是否可用（已就绪且没有未处理的 I/O 错误）
    pub fn is_connected(&self) -> bool {
        self.ctx.is_connected()
    }

    /// 模块注册表（只读访问）
    pub fn modules(&self) -> &ModuleRegistry {
        &self.ctx.registry
    }

    /// 按地址查找模块（如 `"C7"`）
    pub fn module(&self, address: &str) -> Option<Arc<X10Module>> {
        self.ctx.registry.get(address)
    }

    /// 注册事件处理器
    ///
    /// 处理器在 Reader 线程上同步调用，不得阻塞；
    /// 处理器内的 panic 会被记录并吞掉。
    pub fn subscribe(&self, listener: impl Fn(&X10Event) + Send + Sync + 'static) {
        self.ctx.events.subscribe(listener);
    }

    /// 点亮一个单元
    pub fn unit_on(&self, house: HouseCode, unit: UnitCode) -> Result<(), X10Error> {
        send_sequence(
            &self.ctx,
            &[
                encode::address_frame(house, unit).to_vec(),
                encode::function_frame(house, Command::On).to_vec(),
            ],
        )?;
        self.ctx.registry.get_or_create(house, unit).set_level(1.0);
        Ok(())
    }

    /// 熄灭一个单元
    pub fn unit_off(&self, house: HouseCode, unit: UnitCode) -> Result<(), X10Error> {
        send_sequence(
            &self.ctx,
            &[
                encode::address_frame(house, unit).to_vec(),
                encode::function_frame(house, Command::Off).to_vec(),
            ],
        )?;
        self.ctx.registry.get_or_create(house, unit).set_level(0.0);
        Ok(())
    }

    /// 调暗一个单元（percent 钳制到 [0, 100]）
    pub fn dim(&self, house: HouseCode, unit: UnitCode, percent: u8) -> Result<(), X10Error> {
        self.dim_bright(house, unit, Command::Dim, percent)
    }

    /// 调亮一个单元（percent 钳制到 [0, 100]）
    pub fn bright(&self, house: HouseCode, unit: UnitCode, percent: u8) -> Result<(), X10Error> {
        self.dim_bright(house, unit, Command::Bright, percent)
    }

    fn dim_bright(
        &self,
        house: HouseCode,
        unit: UnitCode,
        command: Command,
        percent: u8,
    ) -> Result<(), X10Error> {
        let function = if self.ctx.usb_backend.load(Ordering::SeqCst) {
            encode::dim_function_frame_usb(house, command, percent).to_vec()
        } else {
            encode::dim_function_frame_serial(house, command, percent).to_vec()
        };
        send_sequence(
            &self.ctx,
            &[encode::address_frame(house, unit).to_vec(), function],
        )?;

        // 入站回显是否到达取决于后端，这里乐观镜像命令效果
        let module = self.ctx.registry.get_or_create(house, unit);
        let delta = percent.min(100) as f64 / 100.0;
        let level = match command {
            Command::Bright => round_level(module.level() + delta).min(1.0),
            _ => round_level(module.level() - delta).max(0.0),
        };
        module.set_level(level);
        Ok(())
    }

    /// 点亮整个房屋（当前对房屋内所有模块生效，不区分灯具与电器）
    pub fn all_lights_on(&self, house: HouseCode) -> Result<(), X10Error> {
        send_sequence(
            &self.ctx,
            &[
                encode::house_address_frame(house).to_vec(),
                encode::function_frame(house, Command::AllLightsOn).to_vec(),
            ],
        )?;
        self.ctx.registry.set_house_level(house, 1.0);
        Ok(())
    }

    /// 熄灭整个房屋
    pub fn all_units_off(&self, house: HouseCode) -> Result<(), X10Error> {
        send_sequence(
            &self.ctx,
            &[
                encode::house_address_frame(house).to_vec(),
                encode::function_frame(house, Command::AllUnitsOff).to_vec(),
            ],
        )?;
        self.ctx.registry.set_house_level(house, 0.0);
        Ok(())
    }

    /// 请求一个单元上报状态
    pub fn status_request(&self, house: HouseCode, unit: UnitCode) -> Result<(), X10Error> {
        send_sequence(
            &self.ctx,
            &[
                encode::address_frame(house, unit).to_vec(),
                encode::function_frame(house, Command::StatusRequest).to_vec(),
            ],
        )
    }

    /// 下发控制器时钟（`battery_clear` 请求同时清除电池计时器）
    pub fn sync_clock(&self, battery_clear: bool) -> Result<(), X10Error> {
        let house = {
            let config = self.ctx.config.read();
            config.house_codes.first().copied().unwrap_or(HouseCode::A)
        };
        let usb = self.ctx.usb_backend.load(Ordering::SeqCst);
        let frame = encode::time_set_frame(&Local::now().naive_local(), house, battery_clear, usb);
        send_sequence(&self.ctx, &[frame])
    }
}

impl Default for X10Manager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for X10Manager {
    fn drop(&mut self) {
        self.disconnect();
    }
}
