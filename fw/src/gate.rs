//! Central security gate driver.
//!
//! The gate owns 80 peripheral lines and 16 bus masters. Each line packs two
//! 8-bit lockable fields into one 32-bit register, even lines in the low
//! byte, odd lines in the third byte. Protecting a line cuts off untrusted
//! bus access to the peripheral behind it.
//!
//! Lines are refcounted: multiple devices (or a device and a driver that
//! guards its own registers) may protect the same line, and the register is
//! only rewritten on the 0/1 edge so nested requests never reopen a line
//! early.

use alloc::sync::Arc;
use lazy_static::lazy_static;
use log::debug;
use spin::Mutex;

use crate::bus::Bus;

pub const NUM_LINES: usize = 80;
pub const NUM_MASTERS: usize = 16;

// Per-line field values: all accesses locked down vs. everything open.
const LINE_PROTECT: u32 = 0x3333_3333;
const LINE_OPEN: u32 = 0xFFFF_FFFF;

// Master privilege register, one 2-bit field per master.
const MASTER_OFFSET: usize = 0x218;
const MASTER_NONSECURE: u32 = 0x5555_5555;

struct Gate {
    base: usize,
    bus: Arc<dyn Bus>,
    counts: [u32; NUM_LINES],
}

impl Gate {
    fn line_reg(&self, line: usize) -> (usize, u32) {
        let reg = self.base + 4 * (line >> 1);
        let mask = if line & 1 == 0 { 0x0000_00FF } else { 0x00FF_0000 };
        (reg, mask)
    }

    fn write_line(&self, line: usize, protect: bool) {
        let (reg, mask) = self.line_reg(line);
        let field = if protect { LINE_PROTECT } else { LINE_OPEN };
        let value = (self.bus.read32(reg) & !mask) | (field & mask);
        self.bus.write32(reg, value);
    }

    fn set_line(&mut self, line: usize, protect: bool) {
        if line >= NUM_LINES {
            panic!("gate: line {} out of range", line);
        }
        if protect {
            self.counts[line] += 1;
            if self.counts[line] == 1 {
                debug!("gate: protecting line {}", line);
                self.write_line(line, true);
            }
        } else {
            if self.counts[line] == 0 {
                panic!("gate: unbalanced release of line {}", line);
            }
            self.counts[line] -= 1;
            if self.counts[line] == 0 {
                debug!("gate: opening line {}", line);
                self.write_line(line, false);
            }
        }
    }

    fn set_master_secure(&self, master: usize, secure: bool) {
        if master >= NUM_MASTERS {
            panic!("gate: master {} out of range", master);
        }
        let reg = self.base + MASTER_OFFSET;
        let mask = 0x3 << (2 * master);
        let field = if secure { 0 } else { MASTER_NONSECURE };
        let value = (self.bus.read32(reg) & !mask) | (field & mask);
        self.bus.write32(reg, value);
    }
}

lazy_static! {
    static ref GATE: Mutex<Option<Gate>> = Mutex::new(None);
}

fn with_gate<R>(f: impl FnOnce(&mut Gate) -> R) -> R {
    match &mut *GATE.lock() {
        Some(gate) => f(gate),
        None => panic!("gate: not initialized"),
    }
}

/// Bring every line to a known-open state and downgrade the configurable bus
/// masters, then install the gate for runtime use.
///
/// Masters 6 and 15 are hardwired and skipped; master 0 is the trusted CPU
/// path and keeps its secure privilege.
pub fn init(base: usize, bus: Arc<dyn Bus>) {
    let mut gate = Gate {
        base,
        bus,
        counts: [1; NUM_LINES],
    };
    for line in 0..NUM_LINES {
        gate.set_line(line, false);
    }
    for master in 1..NUM_MASTERS {
        if master == 6 || master == 15 {
            continue;
        }
        gate.set_master_secure(master, false);
    }
    *GATE.lock() = Some(gate);
}

/// Take or release one protection reference on a line.
pub fn set_line(line: usize, protect: bool) {
    with_gate(|gate| gate.set_line(line, protect))
}

pub fn is_line_protected(line: usize) -> bool {
    with_gate(|gate| {
        if line >= NUM_LINES {
            panic!("gate: line {} out of range", line);
        }
        gate.counts[line] > 0
    })
}

pub fn set_master_secure(master: usize, secure: bool) {
    with_gate(|gate| gate.set_master_secure(master, secure))
}

#[cfg(test)]
pub(crate) fn reset_for_tests() {
    *GATE.lock() = None;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::testing::MemBus;
    use crate::testutil;

    const BASE: usize = 0x30_3E00;

    fn init_gate() -> Arc<MemBus> {
        let bus = Arc::new(MemBus::new());
        init(BASE, bus.clone());
        bus
    }

    #[test]
    fn init_opens_all_lines_and_downgrades_masters() {
        let _guard = testutil::lock();
        let bus = init_gate();
        for reg in 0..NUM_LINES / 2 {
            assert_eq!(bus.peek32(BASE + 4 * reg) & 0x00FF_00FF, 0x00FF_00FF);
        }
        let masters = bus.peek32(BASE + MASTER_OFFSET);
        // CPU (0) secure, hardwired fields (6, 15) untouched, rest nonsecure.
        assert_eq!(masters & 0x3, 0);
        assert_eq!(masters & (0x3 << 12), 0);
        assert_eq!(masters & (0x3 << 30), 0);
        assert_eq!(masters & (0x3 << 2), 0x1 << 2);
        reset_for_tests();
    }

    #[test]
    fn refcount_closes_on_first_and_opens_on_last() {
        let _guard = testutil::lock();
        let bus = init_gate();
        let writes_after_init = bus.writes();

        set_line(5, true);
        assert!(is_line_protected(5));
        // Odd line lives in the third byte of register 2.
        assert_eq!(bus.peek32(BASE + 8) & 0x00FF_0000, 0x0033_0000);
        let writes_first = bus.writes();
        assert!(writes_first > writes_after_init);

        // Nested protect: refcount only, no register traffic.
        set_line(5, true);
        assert_eq!(bus.writes(), writes_first);

        set_line(5, false);
        assert!(is_line_protected(5));
        assert_eq!(bus.writes(), writes_first);

        set_line(5, false);
        assert!(!is_line_protected(5));
        assert_eq!(bus.peek32(BASE + 8) & 0x00FF_0000, 0x00FF_0000);
        reset_for_tests();
    }

    #[test]
    fn even_line_uses_low_byte() {
        let _guard = testutil::lock();
        let bus = init_gate();
        set_line(4, true);
        assert_eq!(bus.peek32(BASE + 8) & 0x0000_00FF, 0x0000_0033);
        // The odd neighbor in the same register stays open.
        assert_eq!(bus.peek32(BASE + 8) & 0x00FF_0000, 0x00FF_0000);
        reset_for_tests();
    }

    #[test]
    #[should_panic]
    fn unbalanced_release_is_fatal() {
        let _guard = testutil::lock();
        init_gate();
        set_line(3, false);
    }
}
