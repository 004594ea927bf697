//! GPIO port driver with a per-line interrupt fan-out.
//!
//! Each 32-line port owns a guarded register window. Lines claimed by the
//! trusted world (buttons, mostly) are marked secure: their interrupt bits
//! are serviced here, and the emulation check scrubs them out of everything
//! the untrusted OS reads or writes. Unclaimed lines keep working for the
//! OS; their summary interrupts are re-raised toward it after the trusted
//! world has had a look.

use alloc::sync::Arc;
use dt::node::DeviceTree;
use lazy_static::lazy_static;
use log::debug;
use spin::{Mutex, Once, RwLock};

use crate::bus::{Bus, MmioBus};
use crate::dev::driver::{Driver, DriverProbeError};
use crate::dev::{Device, DeviceId, ResourceKind};
use crate::emu::{self, EmuState, Region, RegionCheck};
use crate::gate;
use crate::irq::{self, IrqChip, IrqChipOps, IrqDesc, IrqError, IrqFlags, IrqHandler, IrqReturn};
use crate::plat;

pub const NUM_LINES: usize = 32;

const DR: usize = 0x00;
const GDIR: usize = 0x04;
const PSR: usize = 0x08;
const ICR1: usize = 0x0C;
const ICR2: usize = 0x10;
const IMR: usize = 0x14;
const ISR: usize = 0x18;
const EDGE_SEL: usize = 0x1C;

// ICR 2-bit sense fields.
const ICR_LOW: u32 = 0;
const ICR_HIGH: u32 = 1;
const ICR_RISING: u32 = 2;
const ICR_FALLING: u32 = 3;

struct PortState {
    /// Lines emulating any-edge triggering by re-arming after each fire.
    both_edges: u32,
    /// Lines owned by the trusted world.
    secure: u32,
    /// Secure line interrupts forwarded to the untrusted OS and not yet
    /// acknowledged by it.
    passed: u32,
}

pub struct GpioPort {
    pub dev: DeviceId,
    base_phys: u64,
    size: u64,
    base: usize,
    bus: Arc<dyn Bus>,
    state: Mutex<PortState>,
    chip: Once<Arc<IrqChip>>,
    /// Summary line re-raised toward the untrusted OS for passed interrupts.
    pass: Once<IrqDesc>,
}

impl GpioPort {
    fn reg(&self, offset: usize) -> u32 {
        self.bus.read32(self.base + offset)
    }

    fn set_reg(&self, offset: usize, value: u32) {
        self.bus.write32(self.base + offset, value)
    }

    fn rmw(&self, offset: usize, mask: u32, value: u32) {
        self.set_reg(offset, (self.reg(offset) & !mask) | (value & mask));
    }

    pub fn get_value(&self, line: usize) -> bool {
        self.reg(PSR) & (1 << line) != 0
    }

    fn set_input(&self, line: usize) {
        self.rmw(GDIR, 1 << line, 0);
    }

    fn mask(&self, line: usize) {
        self.rmw(IMR, 1 << line, 0);
    }

    fn unmask(&self, line: usize) {
        self.rmw(IMR, 1 << line, !0);
    }

    fn ack(&self, line: usize) {
        // Write-one-to-clear.
        self.set_reg(ISR, 1 << line);
    }

    fn set_sense(&self, line: usize, sense: u32) {
        let (reg, field) = if line < 16 { (ICR1, line) } else { (ICR2, line - 16) };
        let shift = field * 2;
        self.rmw(reg, 0x3 << shift, sense << shift);
    }

    /// Re-arm an any-edge line for the opposite level.
    fn flip_edge(&self, line: usize) {
        let sense = if self.get_value(line) { ICR_FALLING } else { ICR_RISING };
        self.set_sense(line, sense);
    }

    fn configure(&self, line: usize, flags: IrqFlags) {
        let both = IrqFlags::EDGE_RISING | IrqFlags::EDGE_FALLING;
        let mut state = self.state.lock();
        if flags.contains(both) {
            state.both_edges |= 1 << line;
            drop(state);
            self.flip_edge(line);
            return;
        }
        state.both_edges &= !(1 << line);
        drop(state);
        let sense = if flags.contains(IrqFlags::EDGE_RISING) {
            ICR_RISING
        } else if flags.contains(IrqFlags::EDGE_FALLING) {
            ICR_FALLING
        } else if flags.contains(IrqFlags::LEVEL_LOW) {
            ICR_LOW
        } else {
            ICR_HIGH
        };
        self.set_sense(line, sense);
    }

    fn chip(&self) -> &Arc<IrqChip> {
        self.chip.wait()
    }

    /// Service the port summary interrupt.
    ///
    /// Pending lines are dispatched highest first. Anything not consumed by
    /// a trusted handler is masked, remembered in `passed`, and the summary
    /// line is re-raised so the untrusted OS services it; its acknowledge
    /// comes back through the emulation check.
    fn service(&self) -> IrqReturn {
        let mut passed = 0u32;
        let mut bits = self.reg(ISR) & self.reg(IMR);
        while bits != 0 {
            let line = 31 - bits.leading_zeros() as usize;
            let bit = 1u32 << line;
            bits &= !bit;

            if self.state.lock().both_edges & bit != 0 {
                self.flip_edge(line);
            }
            match self.chip().handle(line) {
                IrqReturn::Handled => self.ack(line),
                IrqReturn::HandledPass => {
                    self.mask(line);
                    passed |= bit;
                }
                IrqReturn::HandledDefault | IrqReturn::None => {
                    let secure = self.state.lock().secure & bit != 0;
                    self.mask(line);
                    if !secure {
                        passed |= bit;
                    }
                }
            }
        }
        if passed != 0 {
            self.state.lock().passed |= passed;
            if let Some(pass) = self.pass.get() {
                pass.raise().ok();
            }
        }
        IrqReturn::Handled
    }
}

struct PortHandler {
    port: Arc<GpioPort>,
}

impl IrqHandler for PortHandler {
    fn handle(&self) -> IrqReturn {
        self.port.service()
    }
}

/// Per-line chip operations, fanned out of the port summary interrupt.
struct PortChipOps {
    port: Arc<GpioPort>,
}

impl IrqChipOps for PortChipOps {
    fn map(&self, spec: &[u32]) -> Result<(usize, IrqFlags), IrqError> {
        let &[line, trigger] = spec else {
            return Err(IrqError::BadSpec);
        };
        if line as usize >= NUM_LINES {
            return Err(IrqError::BadSpec);
        }
        Ok((line as usize, IrqFlags::from_bits_truncate(trigger)))
    }

    fn add(&self, line: usize, flags: IrqFlags) -> Result<(), IrqError> {
        self.port.mask(line);
        self.port.set_input(line);
        self.port.configure(line, flags);
        self.port.ack(line);
        Ok(())
    }

    fn remove(&self, line: usize) -> Result<(), IrqError> {
        self.port.mask(line);
        Ok(())
    }

    fn enable(&self, line: usize) -> Result<(), IrqError> {
        self.port.unmask(line);
        Ok(())
    }

    fn disable(&self, line: usize) -> Result<(), IrqError> {
        self.port.mask(line);
        Ok(())
    }

    fn secure(&self, line: usize) -> Result<(), IrqError> {
        self.port.state.lock().secure |= 1 << line;
        Ok(())
    }

    fn unsecure(&self, line: usize) -> Result<(), IrqError> {
        let mut state = self.port.state.lock();
        state.secure &= !(1 << line);
        state.passed &= !(1 << line);
        Ok(())
    }

    fn raise(&self, _line: usize) -> Result<(), IrqError> {
        // Per-line injection has no hardware path; passed interrupts go
        // through the summary line instead.
        Err(IrqError::Unsupported)
    }
}

/// Emulation check scrubbing secure lines out of the untrusted OS view.
struct PortGuard {
    port: Arc<GpioPort>,
}

impl PortGuard {
    /// Acknowledge of secure status bits: only legal for interrupts that
    /// were passed to the OS; completing one also re-unmasks the line.
    fn check_ack(&self, value: &mut u32) -> bool {
        let mut state = self.port.state.lock();
        let secure_bits = *value & state.secure;
        if secure_bits == 0 {
            return true;
        }
        if secure_bits & !state.passed != 0 {
            return false;
        }
        state.passed &= !secure_bits;
        drop(state);
        for line in 0..NUM_LINES {
            if secure_bits & (1 << line) != 0 {
                self.port.unmask(line);
            }
        }
        true
    }
}

impl RegionCheck for PortGuard {
    fn check(&self, _: &Region, addr: u64, state: EmuState, value: Option<&mut u32>) -> bool {
        let offset = (addr - self.port.base_phys) as usize;
        let secure = self.port.state.lock().secure;
        match state {
            EmuState::Write => {
                let Some(value) = value else { return true };
                match offset {
                    ISR => self.check_ack(value),
                    // Secure line configuration is preserved under the OS
                    // write; everything else in the register goes through.
                    DR | GDIR | IMR | EDGE_SEL => {
                        *value = (*value & !secure) | (self.port.reg(offset) & secure);
                        true
                    }
                    ICR1 | ICR2 => {
                        let half = if offset == ICR1 { secure & 0xFFFF } else { secure >> 16 };
                        let mut field_mask = 0u32;
                        for field in 0..16 {
                            if half & (1 << field) != 0 {
                                field_mask |= 0x3 << (field * 2);
                            }
                        }
                        *value = (*value & !field_mask) | (self.port.reg(offset) & field_mask);
                        true
                    }
                    _ => true,
                }
            }
            EmuState::ReadBefore => true,
            EmuState::ReadAfter => {
                let Some(value) = value else { return true };
                match offset {
                    // Secure inputs read as zero.
                    DR | PSR => {
                        *value &= !secure;
                        true
                    }
                    // Status of a secure line is only visible once passed.
                    ISR => {
                        let passed = self.port.state.lock().passed;
                        *value &= !(secure & !passed);
                        true
                    }
                    IMR => {
                        *value &= !secure;
                        true
                    }
                    _ => true,
                }
            }
        }
    }
}

lazy_static! {
    static ref PORTS: RwLock<alloc::vec::Vec<Arc<GpioPort>>> = RwLock::new(alloc::vec::Vec::new());
}

pub fn port_for(dev: DeviceId) -> Option<Arc<GpioPort>> {
    PORTS.read().iter().find(|port| port.dev == dev).cloned()
}

#[derive(Debug)]
pub struct GpioDriver;

impl Driver for GpioDriver {
    fn get_name(&self) -> &'static str {
        "gpio"
    }

    fn get_comp_strs(&self) -> &'static [&'static str] {
        &["fsl,imx6sx-gpio", "fsl,imx35-gpio"]
    }

    fn probe(&self, _tree: &DeviceTree, dev: &Arc<Device>) -> Result<(), DriverProbeError> {
        let [window] = dev.resources.as_slice() else {
            return Err(DriverProbeError::BadResources);
        };
        if dev.resource_kind != ResourceKind::Mem {
            return Err(DriverProbeError::BadResources);
        }
        // Summary irq(s) plus the line re-raised toward the OS.
        if dev.irqs.len() < 2 || dev.irqs.len() > 3 {
            return Err(DriverProbeError::Customized {
                info: "expected 2 or 3 interrupts",
            });
        }
        let base = plat::iomap(window.addr, window.size).ok_or(DriverProbeError::BadResources)?;

        let port = Arc::new(GpioPort {
            dev: dev.id,
            base_phys: window.addr,
            size: window.size,
            base,
            bus: Arc::new(MmioBus),
            state: Mutex::new(PortState {
                both_edges: 0,
                secure: 0,
                passed: 0,
            }),
            chip: Once::new(),
            pass: Once::new(),
        });

        // Quiesce: everything masked, stale status cleared.
        port.set_reg(IMR, 0);
        port.set_reg(ISR, !0);

        let chip = irq::register_chip(
            dev.id,
            Arc::new(PortChipOps { port: port.clone() }),
            NUM_LINES,
            true,
        );
        port.chip.call_once(|| chip);
        port.pass.call_once(|| dev.irqs.last().unwrap().desc.clone());

        // All summary lines but the last feed the fan-out.
        for binding in &dev.irqs[..dev.irqs.len() - 1] {
            binding
                .desc
                .add(binding.flags, Some(Arc::new(PortHandler { port: port.clone() })))?;
            binding.desc.secure()?;
            binding.desc.enable()?;
        }

        emu::add_region(window.addr, window.size, Arc::new(PortGuard { port: port.clone() }));
        if let Some(line) = dev.gate_lines.first() {
            gate::set_line(*line as usize, true);
        }

        debug!("gpio: port '{}' at {:#x}+{:#x}", dev.name, port.base_phys, port.size);
        PORTS.write().push(port);
        Ok(())
    }
}
