use alloc::{boxed::Box, vec::Vec};
use core::sync::atomic::{AtomicBool, Ordering};

use crate::dev::DeviceId;
use crate::irq::{IrqDesc, IrqFlags};

/// What a `reg` window of this device addresses, as seen from its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// Parent is a transparent bus bridge, so windows are bus memory the
    /// security gate and emulation engine can guard.
    Mem,
    /// Anything else (child of a non-bridge device).
    Other,
}

#[derive(Debug, Clone, Copy)]
pub struct Resource {
    pub addr: u64,
    pub size: u64,
}

#[derive(Clone)]
pub struct IrqBinding {
    pub desc: IrqDesc,
    pub flags: IrqFlags,
}

pub struct Device {
    pub id: DeviceId,
    /// Hardware description node the device was created from.
    pub node: usize,
    pub name: Box<str>,
    pub parent: Option<DeviceId>,
    pub is_bus_bridge: bool,
    pub resource_kind: ResourceKind,
    pub resources: Vec<Resource>,
    pub irqs: Vec<IrqBinding>,
    pub gate_lines: Vec<u32>,
    pub classes: Vec<Box<str>>,
    enabled: AtomicBool,
}

impl Device {
    pub fn new(node: usize, name: Box<str>, parent: Option<DeviceId>) -> Device {
        Device {
            id: 0,
            node,
            name,
            parent,
            is_bus_bridge: false,
            resource_kind: ResourceKind::Other,
            resources: Vec::new(),
            irqs: Vec::new(),
            gate_lines: Vec::new(),
            classes: Vec::new(),
            // Hardware powers up reachable by the untrusted OS.
            enabled: AtomicBool::new(true),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes.iter().any(|c| c.as_ref() == class)
    }

    /// A device can be isolated directly only when it has gate lines and
    /// its windows are guardable bus memory.
    pub fn can_protect(&self) -> bool {
        !self.gate_lines.is_empty() && self.resource_kind == ResourceKind::Mem
    }
}

impl core::fmt::Debug for Device {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("parent", &self.parent)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
