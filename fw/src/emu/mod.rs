//! MMIO emulation engine.
//!
//! Guarded register windows trap into the monitor when the untrusted OS
//! touches them; the monitor forwards the faulting state here. The engine
//! decodes the trapped instruction, consults the region list, and either
//! replays the access against the real device or suppresses it. Loads that
//! are denied complete with zero so the OS observes a benign value rather
//! than an abort; denied stores are dropped without any side effect.

use alloc::{sync::Arc, vec, vec::Vec};
use lazy_static::lazy_static;
use log::{error, warn};
use spin::RwLock;

use crate::bus::Bus;

pub mod decode;

pub use decode::{NsContext, RegSlot};

use decode::{AccessDir, decode, sign_extend};

/// Which phase of an emulated access a check is consulted for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmuState {
    /// A store; the check may rewrite the value before it reaches hardware.
    Write,
    /// Before a load touches the device. Denying here means the device is
    /// never read.
    ReadBefore,
    /// After a load; the check may rewrite the value the OS will observe.
    ReadAfter,
}

/// Access policy for a guarded window.
pub trait RegionCheck: Send + Sync {
    fn check(&self, region: &Region, addr: u64, state: EmuState, value: Option<&mut u32>) -> bool;
}

pub struct Region {
    pub base: u64,
    pub size: u64,
    check: Arc<dyn RegionCheck>,
}

impl Region {
    pub fn new(base: u64, size: u64, check: Arc<dyn RegionCheck>) -> Region {
        Region { base, size, check }
    }
}

struct DenyAll;

impl RegionCheck for DenyAll {
    fn check(&self, _: &Region, _: u64, _: EmuState, _: Option<&mut u32>) -> bool {
        false
    }
}

struct AllowAll;

impl RegionCheck for AllowAll {
    fn check(&self, _: &Region, _: u64, _: EmuState, _: Option<&mut u32>) -> bool {
        true
    }
}

lazy_static! {
    /// Blanket checks shared by every caller, so a region added with
    /// [DENY_ALL] can later be removed by identity.
    pub static ref DENY_ALL: Arc<dyn RegionCheck> = Arc::new(DenyAll);
    pub static ref ALLOW_ALL: Arc<dyn RegionCheck> = Arc::new(AllowAll);
    static ref REGIONS: RwLock<Vec<Region>> = RwLock::new(vec![]);
}

pub fn add_region(base: u64, size: u64, check: Arc<dyn RegionCheck>) {
    REGIONS.write().push(Region { base, size, check });
}

/// Remove the first region matching bounds and check identity.
pub fn remove_region(base: u64, size: u64, check: &Arc<dyn RegionCheck>) -> bool {
    let mut regions = REGIONS.write();
    let pos = regions
        .iter()
        .position(|r| r.base == base && r.size == size && Arc::ptr_eq(&r.check, check));
    match pos {
        Some(pos) => {
            regions.remove(pos);
            true
        }
        None => false,
    }
}

/// Consult every region covering `addr`. All of them must agree; any single
/// deny wins. Addresses outside every region are allowed.
pub fn check(addr: u64, state: EmuState, mut value: Option<&mut u32>) -> bool {
    let regions = REGIONS.read();
    let mut allowed = true;
    for region in regions.iter() {
        if region.base <= addr && addr <= region.base + region.size {
            allowed &= region.check.check(region, addr, state, value.as_deref_mut());
        }
    }
    allowed
}

/// One mapped physical window.
#[derive(Debug, Clone, Copy)]
pub struct Window {
    pub phys: u64,
    pub virt: usize,
    pub size: u64,
}

impl Window {
    pub fn translate(&self, phys: u64) -> Option<usize> {
        if phys >= self.phys && phys - self.phys < self.size {
            Some(self.virt + (phys - self.phys) as usize)
        } else {
            None
        }
    }
}

// Fault status bits selecting a precise external data abort, the only
// syndrome the guarded windows generate.
const FSR_MASK: u32 = 0x40F;
const FSR_EXTERNAL_ABORT: u32 = 0x008;

pub struct EmuEngine {
    data: Window,
    instr: Window,
    bus: Arc<dyn Bus>,
}

impl EmuEngine {
    pub fn new(data: Window, instr: Window, bus: Arc<dyn Bus>) -> Self {
        EmuEngine { data, instr, bus }
    }

    /// Emulate one trapped access and fix up the untrusted OS state.
    ///
    /// `status` is the raw fault status register; anything other than a
    /// precise external abort did not come from a guarded window, so the
    /// faulting instruction is retried as-is.
    pub fn handle(&self, ctx: &mut NsContext, status: u32, data_phys: u64, instr_phys: u64) {
        if status & FSR_MASK != FSR_EXTERNAL_ABORT {
            warn!("emu: unexpected fault status {:#x}, retrying", status);
            ctx.mon_lr = ctx.mon_lr.wrapping_sub(4);
            return;
        }

        // An abort outside the guarded device window is not ours to emulate;
        // bail out before the decode can declare the access fatal.
        let Some(data_va) = self.data.translate(data_phys) else {
            error!("emu: fault address {:#x} outside device window", data_phys);
            return;
        };

        let Some(instr_va) = self.instr.translate(instr_phys) else {
            error!("emu: faulting pc {:#x} outside instruction window", instr_phys);
            return;
        };
        let instr = self.bus.read32(instr_va);

        let access = match decode(instr) {
            Ok(access) => access,
            Err(err) => {
                error!("emu: cannot emulate {:#010x} at {:#x}: {:?}", instr, instr_phys, err);
                panic!("emu: unsupported trapped access");
            }
        };

        match access.dir {
            AccessDir::Load { sign } => {
                let value = if check(data_phys, EmuState::ReadBefore, None) {
                    let mut value = self.bus.read(data_va, access.size);
                    if sign {
                        value = sign_extend(value, access.size);
                    }
                    check(data_phys, EmuState::ReadAfter, Some(&mut value));
                    value
                } else {
                    0
                };
                ctx.set(access.slot, value);
            }
            AccessDir::Store => {
                let mut value = ctx.get(access.slot);
                if check(data_phys, EmuState::Write, Some(&mut value)) {
                    self.bus.write(data_va, access.size, value);
                }
            }
        }
    }
}

lazy_static! {
    static ref ENGINE: RwLock<Option<EmuEngine>> = RwLock::new(None);
}

pub fn init(data: Window, instr: Window, bus: Arc<dyn Bus>) {
    *ENGINE.write() = Some(EmuEngine::new(data, instr, bus));
}

/// Monitor trap entry point.
pub fn handle(ctx: &mut NsContext, status: u32, data_phys: u64, instr_phys: u64) {
    match &*ENGINE.read() {
        Some(engine) => engine.handle(ctx, status, data_phys, instr_phys),
        None => error!("emu: trap before engine init"),
    }
}

#[cfg(test)]
pub(crate) fn reset_for_tests() {
    REGIONS.write().clear();
}
