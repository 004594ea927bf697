//! ARM generic interrupt controller.
//!
//! The distributor splits lines between group 0 (trusted, delivered as FIQ)
//! and group 1 (untrusted IRQ). Securing a line moves it to group 0 and
//! raises its priority; unsecuring hands it back. Raising a line toward the
//! untrusted OS just sets it pending.

use alloc::sync::Arc;
use dt::node::DeviceTree;
use log::debug;

use crate::bus::Register;
use crate::dev::Device;
use crate::dev::driver::{Driver, DriverProbeError};
use crate::irq::{self, IrqChip, IrqChipOps, IrqError, IrqFlags};
use crate::plat;

const SPI_BASE: usize = 32;
const PPI_BASE: usize = 16;

const PRIO_SECURE: u32 = 0x10;
const PRIO_OPEN: u32 = 0x80;

#[repr(C)]
struct GicdRegs {
    ctlr: Register<u32>,              // 0x000
    typer: Register<u32>,             // 0x004
    iidr: Register<u32>,              // 0x008
    _rsv0: [u32; 29],                 // 0x00C
    igroupr: [Register<u32>; 32],     // 0x080
    isenabler: [Register<u32>; 32],   // 0x100
    icenabler: [Register<u32>; 32],   // 0x180
    ispendr: [Register<u32>; 32],     // 0x200
    icpendr: [Register<u32>; 32],     // 0x280
    isactiver: [Register<u32>; 32],   // 0x300
    icactiver: [Register<u32>; 32],   // 0x380
    ipriorityr: [Register<u32>; 256], // 0x400
    itargetsr: [Register<u32>; 256],  // 0x800
    icfgr: [Register<u32>; 64],       // 0xC00
}

#[repr(C)]
struct GiccRegs {
    ctlr: Register<u32>, // 0x00
    pmr: Register<u32>,  // 0x04
    bpr: Register<u32>,  // 0x08
    iar: Register<u32>,  // 0x0C
    eoir: Register<u32>, // 0x10
}

// CTLR bits.
const GICD_ENABLE_GRP0: u32 = 1 << 0;
const GICD_ENABLE_GRP1: u32 = 1 << 1;
const GICC_ENABLE_GRP0: u32 = 1 << 0;
const GICC_ENABLE_GRP1: u32 = 1 << 1;
const GICC_FIQ_EN: u32 = 1 << 3;

const SPURIOUS: u32 = 1023;

pub struct Gic {
    gicd: &'static GicdRegs,
    gicc: &'static GiccRegs,
    num_lines: usize,
}

impl Gic {
    /// # Safety
    /// Both addresses must point at mapped, correctly laid out register
    /// banks that stay mapped forever.
    unsafe fn new(gicd: usize, gicc: usize) -> Gic {
        let gicd = unsafe { &*(gicd as *const GicdRegs) };
        let gicc = unsafe { &*(gicc as *const GiccRegs) };
        let num_lines = 32 * ((gicd.typer.read() as usize & 0x1F) + 1);
        Gic { gicd, gicc, num_lines }
    }

    fn init(&self) {
        // Everything starts untrusted: group 1, open priority, target cpu 0.
        for reg in 0..self.num_lines / 32 {
            self.gicd.icenabler[reg].write(!0);
            self.gicd.igroupr[reg].write(!0);
        }
        for line in 0..self.num_lines {
            self.set_priority(line, PRIO_OPEN);
        }
        self.gicc.pmr.write(0xFF);
        self.gicc.ctlr.write(GICC_ENABLE_GRP0 | GICC_ENABLE_GRP1 | GICC_FIQ_EN);
        self.gicd.ctlr.write(GICD_ENABLE_GRP0 | GICD_ENABLE_GRP1);
    }

    fn set_priority(&self, line: usize, prio: u32) {
        let reg = &self.gicd.ipriorityr[line / 4];
        let shift = (line % 4) * 8;
        reg.write((reg.read() & !(0xFF << shift)) | (prio << shift));
    }

    fn set_target(&self, line: usize, cpu_mask: u32) {
        let reg = &self.gicd.itargetsr[line / 4];
        let shift = (line % 4) * 8;
        reg.write((reg.read() & !(0xFF << shift)) | (cpu_mask << shift));
    }

    fn set_edge(&self, line: usize, edge: bool) {
        let reg = &self.gicd.icfgr[line / 16];
        let bit = 1 << ((line % 16) * 2 + 1);
        let val = reg.read();
        reg.write(if edge { val | bit } else { val & !bit });
    }

    /// Drain group 0 interrupts, dispatching each to its handler.
    pub fn handle_pending(&self, chip: &IrqChip) {
        loop {
            let iar = self.gicc.iar.read();
            let line = (iar & 0x3FF) as usize;
            if line as u32 == SPURIOUS {
                break;
            }
            chip.handle(line);
            self.gicc.eoir.write(iar);
        }
    }
}

impl IrqChipOps for Gic {
    /// Specifier: [type, number, trigger]; type 0 is a shared line, 1 a
    /// private one.
    fn map(&self, spec: &[u32]) -> Result<(usize, IrqFlags), IrqError> {
        let [kind, num, trigger] = spec else {
            return Err(IrqError::BadSpec);
        };
        let line = *num as usize + if *kind == 0 { SPI_BASE } else { PPI_BASE };
        if line >= self.num_lines {
            return Err(IrqError::BadSpec);
        }
        Ok((line, IrqFlags::from_bits_truncate(*trigger)))
    }

    fn add(&self, line: usize, flags: IrqFlags) -> Result<(), IrqError> {
        self.gicd.icenabler[line / 32].write(1 << (line % 32));
        self.set_edge(line, !flags.is_level());
        self.set_target(line, 0x1);
        self.secure(line)
    }

    fn remove(&self, line: usize) -> Result<(), IrqError> {
        self.disable(line)?;
        self.unsecure(line)
    }

    fn enable(&self, line: usize) -> Result<(), IrqError> {
        self.gicd.isenabler[line / 32].write(1 << (line % 32));
        Ok(())
    }

    fn disable(&self, line: usize) -> Result<(), IrqError> {
        self.gicd.icenabler[line / 32].write(1 << (line % 32));
        Ok(())
    }

    fn secure(&self, line: usize) -> Result<(), IrqError> {
        let reg = &self.gicd.igroupr[line / 32];
        reg.write(reg.read() & !(1 << (line % 32)));
        self.set_priority(line, PRIO_SECURE);
        Ok(())
    }

    fn unsecure(&self, line: usize) -> Result<(), IrqError> {
        let reg = &self.gicd.igroupr[line / 32];
        reg.write(reg.read() | 1 << (line % 32));
        self.set_priority(line, PRIO_OPEN);
        Ok(())
    }

    fn raise(&self, line: usize) -> Result<(), IrqError> {
        self.gicd.ispendr[line / 32].write(1 << (line % 32));
        Ok(())
    }
}

#[derive(Debug)]
pub struct GicDriver;

impl Driver for GicDriver {
    fn get_name(&self) -> &'static str {
        "gic"
    }

    fn get_comp_strs(&self) -> &'static [&'static str] {
        &["arm,cortex-a9-gic", "arm,cortex-a7-gic", "arm,gic-400"]
    }

    fn probe(&self, _tree: &DeviceTree, dev: &Arc<Device>) -> Result<(), DriverProbeError> {
        let [dist, cpu, ..] = dev.resources.as_slice() else {
            return Err(DriverProbeError::BadResources);
        };
        let gicd = plat::iomap(dist.addr, dist.size).ok_or(DriverProbeError::BadResources)?;
        let gicc = plat::iomap(cpu.addr, cpu.size).ok_or(DriverProbeError::BadResources)?;
        let gic = unsafe { Gic::new(gicd, gicc) };
        gic.init();
        let num_lines = gic.num_lines;
        debug!("gic: {} lines", num_lines);
        irq::register_chip(dev.id, Arc::new(gic), num_lines, false);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::offset_of;

    fn fake_gic(typer_lines: u32) -> Gic {
        let words = core::mem::size_of::<GicdRegs>() / 4;
        let gicd_mem = alloc::vec![0u32; words].leak();
        let gicc_mem = alloc::vec![0u32; 8].leak();
        let gic = unsafe {
            let gicd = gicd_mem.as_ptr() as *const GicdRegs;
            (*gicd).typer.write(typer_lines);
            Gic::new(gicd as usize, gicc_mem.as_ptr() as usize)
        };
        gic
    }

    #[test]
    fn register_layout() {
        assert_eq!(offset_of!(GicdRegs, igroupr), 0x080);
        assert_eq!(offset_of!(GicdRegs, isenabler), 0x100);
        assert_eq!(offset_of!(GicdRegs, icenabler), 0x180);
        assert_eq!(offset_of!(GicdRegs, ispendr), 0x200);
        assert_eq!(offset_of!(GicdRegs, icpendr), 0x280);
        assert_eq!(offset_of!(GicdRegs, isactiver), 0x300);
        assert_eq!(offset_of!(GicdRegs, icactiver), 0x380);
        assert_eq!(offset_of!(GicdRegs, ipriorityr), 0x400);
        assert_eq!(offset_of!(GicdRegs, itargetsr), 0x800);
        assert_eq!(offset_of!(GicdRegs, icfgr), 0xC00);
        assert_eq!(offset_of!(GicdRegs, iidr), 0x008);
        assert_eq!(offset_of!(GiccRegs, bpr), 0x08);
        assert_eq!(offset_of!(GiccRegs, iar), 0x0C);
        assert_eq!(offset_of!(GiccRegs, eoir), 0x10);
    }

    #[test]
    fn map_offsets_line_kinds() {
        let gic = fake_gic(3); // 128 lines
        assert_eq!(gic.num_lines, 128);
        let (line, flags) = gic.map(&[0, 66, 4]).unwrap();
        assert_eq!(line, 98);
        assert!(flags.is_level());
        let (line, _) = gic.map(&[1, 13, 1]).unwrap();
        assert_eq!(line, 29);
        assert_eq!(gic.map(&[0, 100, 4]), Err(IrqError::BadSpec));
        assert_eq!(gic.map(&[0, 1]), Err(IrqError::BadSpec));
    }

    #[test]
    fn secure_moves_group_and_priority() {
        let gic = fake_gic(1);
        gic.init();
        assert_eq!(gic.gicd.igroupr[1].read(), !0);

        gic.secure(35).unwrap();
        assert_eq!(gic.gicd.igroupr[1].read(), !(1 << 3));
        assert_eq!((gic.gicd.ipriorityr[35 / 4].read() >> 24) & 0xFF, PRIO_SECURE);

        gic.unsecure(35).unwrap();
        assert_eq!(gic.gicd.igroupr[1].read(), !0);
        assert_eq!((gic.gicd.ipriorityr[35 / 4].read() >> 24) & 0xFF, PRIO_OPEN);
    }

    #[test]
    fn enable_and_raise_touch_expected_bits() {
        let gic = fake_gic(1);
        gic.init();
        gic.enable(40).unwrap();
        assert_eq!(gic.gicd.isenabler[1].read(), 1 << 8);
        gic.raise(40).unwrap();
        assert_eq!(gic.gicd.ispendr[1].read(), 1 << 8);
    }
}
