//! 模块注册表
//!
//! 按地址字符串（`"<房屋><单元序号>"`，如 `"C7"`）索引模块，
//! 镜像每个可寻址单元最近一次已知的亮度。
//! 亮度只由协议引擎（入站帧解码）和命令处理器（出站命令镜像）修改。

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::manager::events::{EventDispatcher, X10Event};
use crate::protocol::{HouseCode, UnitCode};

/// 亮度舍入到 2 位小数
pub(crate) fn round_level(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// 一个可寻址的 X10 模块
///
/// 亮度始终被钳制到 [0.0, 1.0]；任何改变取值的写入都会
/// 通过分发器发出一次 `ModuleChanged` 通知。
pub struct X10Module {
    address: String,
    house: HouseCode,
    unit: UnitCode,
    level: RwLock<f64>,
    description: RwLock<String>,
    events: Arc<EventDispatcher>,
}

impl X10Module {
    fn new(house: HouseCode, unit: UnitCode, events: Arc<EventDispatcher>) -> Arc<Self> {
        Arc::new(Self {
            address: format!("{house}{unit}"),
            house,
            unit,
            level: RwLock::new(0.0),
            description: RwLock::new(String::new()),
            events,
        })
    }

    /// 地址字符串，如 `"C7"`
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn house_code(&self) -> HouseCode {
        self.house
    }

    pub fn unit_code(&self) -> UnitCode {
        self.unit
    }

    /// 最近一次已知的亮度（0.0 = 关，1.0 = 全亮）
    pub fn level(&self) -> f64 {
        *self.level.read()
    }

    pub fn description(&self) -> String {
        self.description.read().clone()
    }

    pub fn set_description(&self, description: impl Into<String>) {
        *self.description.write() = description.into();
    }

    /// 写入亮度（钳制到 [0, 1]，变化时发出通知）
    pub(crate) fn set_level(self: &Arc<Self>, value: f64) {
        let value = value.clamp(0.0, 1.0);
        let changed = {
            let mut level = self.level.write();
            if (*level - value).abs() > f64::EPSILON {
                *level = value;
                true
            } else {
                false
            }
        };
        if changed {
            self.events.dispatch(&X10Event::ModuleChanged {
                module: self.clone(),
                property: "Level",
            });
        }
    }
}

impl fmt::Debug for X10Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("X10Module")
            .field("address", &self.address)
            .field("level", &self.level())
            .finish()
    }
}

/// 模块注册表
pub struct ModuleRegistry {
    modules: RwLock<HashMap<String, Arc<X10Module>>>,
    events: Arc<EventDispatcher>,
}

impl ModuleRegistry {
    pub(crate) fn new(events: Arc<EventDispatcher>) -> Self {
        Self {
            modules: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// 按地址查找模块（地址大小写敏感，房屋字母大写）
    pub fn get(&self, address: &str) -> Option<Arc<X10Module>> {
        self.modules.read().get(address).cloned()
    }

    /// 查找模块，不存在时自动创建（初始亮度 0.0）
    pub(crate) fn get_or_create(&self, house: HouseCode, unit: UnitCode) -> Arc<X10Module> {
        let address = format!("{house}{unit}");
        if let Some(module) = self.modules.read().get(&address) {
            return module.clone();
        }
        self.modules
            .write()
            .entry(address)
            .or_insert_with(|| X10Module::new(house, unit, self.events.clone()))
            .clone()
    }

    /// 所有模块的快照
    pub fn modules(&self) -> Vec<Arc<X10Module>> {
        self.modules.read().values().cloned().collect()
    }

    /// 某个房屋的全部模块
    pub fn modules_of_house(&self, house: HouseCode) -> Vec<Arc<X10Module>> {
        self.modules
            .read()
            .values()
            .filter(|module| module.house_code() == house)
            .cloned()
            .collect()
    }

    /// 对整个房屋批量写入亮度（All-Lights-On / All-Units-Off）
    ///
    /// TODO: 区分灯具与电器模块（当前对房屋内所有模块一视同仁）
    pub(crate) fn set_house_level(&self, house: HouseCode, level: f64) {
        for module in self.modules_of_house(house) {
            module.set_level(level);
        }
    }

    /// 清空并按房屋码列表重建：每个房屋生成单元 1..=16
    pub(crate) fn rebuild(&self, houses: &[HouseCode]) {
        let mut modules = self.modules.write();
        modules.clear();
        for house in houses {
            if *house == HouseCode::NotSet {
                continue;
            }
            for number in 1..=16 {
                let Some(unit) = UnitCode::from_number(number) else {
                    continue;
                };
                let module = X10Module::new(*house, unit, self.events.clone());
                modules.insert(module.address().to_string(), module);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.modules.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.read().is_empty()
    }
}
