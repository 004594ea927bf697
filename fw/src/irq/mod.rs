//! Interrupt chip abstraction.
//!
//! Every interrupt controller registers an [IrqChip] bound to its device.
//! Chips own a fixed handler table sized at registration; a line index out
//! of range is an internal inconsistency and halts the system rather than
//! failing open.

use alloc::{sync::Arc, vec, vec::Vec};
use bitflags::bitflags;
use lazy_static::lazy_static;
use log::error;
use spin::RwLock;

use crate::dev::DeviceId;

bitflags! {
    /// Trigger flags carried by interrupt specifiers.
    pub struct IrqFlags: u32 {
        const EDGE_RISING  = 0x1;
        const EDGE_FALLING = 0x2;
        const LEVEL_HIGH   = 0x4;
        const LEVEL_LOW    = 0x8;
    }
}

impl IrqFlags {
    pub fn is_level(&self) -> bool {
        self.intersects(IrqFlags::LEVEL_HIGH | IrqFlags::LEVEL_LOW)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqReturn {
    /// Nobody claimed the interrupt.
    None,
    /// Claimed and fully handled in the trusted world.
    Handled,
    /// Claimed, but the line should also be forwarded to the untrusted OS.
    HandledPass,
    /// No handler bound; the chip's default disposition applies.
    HandledDefault,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqError {
    BadSpec,
    Unsupported,
}

pub trait IrqHandler: Send + Sync {
    fn handle(&self) -> IrqReturn;
}

/// Hardware operations of one interrupt controller.
pub trait IrqChipOps: Send + Sync {
    /// Translate raw specifier cells into (line, flags).
    fn map(&self, spec: &[u32]) -> Result<(usize, IrqFlags), IrqError>;
    fn add(&self, line: usize, flags: IrqFlags) -> Result<(), IrqError>;
    fn remove(&self, line: usize) -> Result<(), IrqError>;
    fn enable(&self, line: usize) -> Result<(), IrqError>;
    fn disable(&self, line: usize) -> Result<(), IrqError>;
    /// Route the line to the trusted world.
    fn secure(&self, line: usize) -> Result<(), IrqError>;
    /// Hand the line back to the untrusted OS.
    fn unsecure(&self, line: usize) -> Result<(), IrqError>;
    /// Inject the line toward the untrusted OS.
    fn raise(&self, line: usize) -> Result<(), IrqError>;
}

pub struct IrqChip {
    /// Device the chip belongs to.
    pub dev: DeviceId,
    ops: Arc<dyn IrqChipOps>,
    num_lines: usize,
    /// When set, lines without a bound handler report [IrqReturn::HandledDefault]
    /// instead of being shut off.
    default_handler: bool,
    handlers: RwLock<Vec<Option<Arc<dyn IrqHandler>>>>,
}

impl IrqChip {
    fn check_line(&self, line: usize) {
        if line >= self.num_lines {
            error!("irq: line {} out of range (chip has {})", line, self.num_lines);
            panic!("irq: line index out of range");
        }
    }

    pub fn map(&self, spec: &[u32]) -> Result<(usize, IrqFlags), IrqError> {
        self.ops.map(spec)
    }

    pub fn add(
        &self,
        line: usize,
        flags: IrqFlags,
        handler: Option<Arc<dyn IrqHandler>>,
    ) -> Result<(), IrqError> {
        self.check_line(line);
        self.handlers.write()[line] = handler;
        self.ops.add(line, flags)
    }

    pub fn remove(&self, line: usize) -> Result<(), IrqError> {
        self.check_line(line);
        self.handlers.write()[line] = None;
        self.ops.remove(line)
    }

    pub fn enable(&self, line: usize) -> Result<(), IrqError> {
        self.check_line(line);
        self.ops.enable(line)
    }

    pub fn disable(&self, line: usize) -> Result<(), IrqError> {
        self.check_line(line);
        self.ops.disable(line)
    }

    pub fn secure(&self, line: usize) -> Result<(), IrqError> {
        self.check_line(line);
        self.ops.secure(line)
    }

    pub fn unsecure(&self, line: usize) -> Result<(), IrqError> {
        self.check_line(line);
        self.ops.unsecure(line)
    }

    pub fn raise(&self, line: usize) -> Result<(), IrqError> {
        self.check_line(line);
        self.ops.raise(line)
    }

    /// Dispatch a pending line to its handler.
    ///
    /// A line that fires without a handler is either covered by the chip's
    /// default disposition or gets disabled so it cannot storm.
    pub fn handle(&self, line: usize) -> IrqReturn {
        self.check_line(line);
        let handler = self.handlers.read()[line].clone();
        let ret = match handler {
            Some(handler) => handler.handle(),
            None => {
                if self.default_handler {
                    return IrqReturn::HandledDefault;
                }
                error!("irq: no handler for line {}", line);
                IrqReturn::None
            }
        };
        if ret == IrqReturn::None {
            self.ops.disable(line).ok();
        }
        ret
    }
}

/// One line on one chip, as stored in the device model.
#[derive(Clone)]
pub struct IrqDesc {
    pub chip: Arc<IrqChip>,
    pub line: usize,
}

impl IrqDesc {
    pub fn add(&self, flags: IrqFlags, handler: Option<Arc<dyn IrqHandler>>) -> Result<(), IrqError> {
        self.chip.add(self.line, flags, handler)
    }
    pub fn remove(&self) -> Result<(), IrqError> {
        self.chip.remove(self.line)
    }
    pub fn enable(&self) -> Result<(), IrqError> {
        self.chip.enable(self.line)
    }
    pub fn disable(&self) -> Result<(), IrqError> {
        self.chip.disable(self.line)
    }
    pub fn secure(&self) -> Result<(), IrqError> {
        self.chip.secure(self.line)
    }
    pub fn unsecure(&self) -> Result<(), IrqError> {
        self.chip.unsecure(self.line)
    }
    pub fn raise(&self) -> Result<(), IrqError> {
        self.chip.raise(self.line)
    }
}

lazy_static! {
    static ref CHIPS: RwLock<Vec<Arc<IrqChip>>> = RwLock::new(vec![]);
}

/// Register a chip for `dev`. Chips live for the rest of the boot.
pub fn register_chip(
    dev: DeviceId,
    ops: Arc<dyn IrqChipOps>,
    num_lines: usize,
    default_handler: bool,
) -> Arc<IrqChip> {
    let chip = Arc::new(IrqChip {
        dev,
        ops,
        num_lines,
        default_handler,
        handlers: RwLock::new(vec![None; num_lines]),
    });
    CHIPS.write().push(chip.clone());
    chip
}

pub fn find_chip(dev: DeviceId) -> Option<Arc<IrqChip>> {
    CHIPS.read().iter().find(|chip| chip.dev == dev).cloned()
}

#[cfg(test)]
pub(crate) fn reset_for_tests() {
    CHIPS.write().clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    pub struct RecordingOps {
        pub enables: AtomicUsize,
        pub disables: AtomicUsize,
        pub secures: AtomicUsize,
        pub unsecures: AtomicUsize,
        pub raises: AtomicUsize,
    }

    impl IrqChipOps for RecordingOps {
        fn map(&self, spec: &[u32]) -> Result<(usize, IrqFlags), IrqError> {
            match spec {
                [line, flags] => Ok((
                    *line as usize,
                    IrqFlags::from_bits_truncate(*flags),
                )),
                _ => Err(IrqError::BadSpec),
            }
        }
        fn add(&self, _line: usize, _flags: IrqFlags) -> Result<(), IrqError> {
            Ok(())
        }
        fn remove(&self, _line: usize) -> Result<(), IrqError> {
            Ok(())
        }
        fn enable(&self, _line: usize) -> Result<(), IrqError> {
            self.enables.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
        fn disable(&self, _line: usize) -> Result<(), IrqError> {
            self.disables.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
        fn secure(&self, _line: usize) -> Result<(), IrqError> {
            self.secures.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
        fn unsecure(&self, _line: usize) -> Result<(), IrqError> {
            self.unsecures.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
        fn raise(&self, _line: usize) -> Result<(), IrqError> {
            self.raises.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    struct FixedHandler(IrqReturn);

    impl IrqHandler for FixedHandler {
        fn handle(&self) -> IrqReturn {
            self.0
        }
    }

    #[test]
    fn dispatch_without_handler() {
        let _guard = testutil::lock();
        reset_for_tests();
        let ops = Arc::new(RecordingOps::default());
        // default_handler chips report the default disposition.
        let chip = register_chip(0, ops.clone(), 4, true);
        assert_eq!(chip.handle(2), IrqReturn::HandledDefault);
        assert_eq!(ops.disables.load(Ordering::Relaxed), 0);

        // Otherwise an unclaimed line gets shut off.
        let strict = register_chip(1, ops.clone(), 4, false);
        assert_eq!(strict.handle(2), IrqReturn::None);
        assert_eq!(ops.disables.load(Ordering::Relaxed), 1);
        reset_for_tests();
    }

    #[test]
    fn dispatch_with_handler() {
        let _guard = testutil::lock();
        reset_for_tests();
        let ops = Arc::new(RecordingOps::default());
        let chip = register_chip(0, ops.clone(), 8, false);
        chip.add(5, IrqFlags::EDGE_RISING, Some(Arc::new(FixedHandler(IrqReturn::HandledPass))))
            .unwrap();
        assert_eq!(chip.handle(5), IrqReturn::HandledPass);
        chip.remove(5).unwrap();
        assert_eq!(chip.handle(5), IrqReturn::None);
        reset_for_tests();
    }

    #[test]
    fn registry_finds_chip_by_device() {
        let _guard = testutil::lock();
        reset_for_tests();
        let ops = Arc::new(RecordingOps::default());
        let chip = register_chip(17, ops, 2, false);
        assert!(Arc::ptr_eq(&find_chip(17).unwrap(), &chip));
        assert!(find_chip(18).is_none());
        reset_for_tests();
    }

    #[test]
    #[should_panic]
    fn out_of_range_line_is_fatal() {
        let ops = Arc::new(RecordingOps::default());
        let chip = IrqChip {
            dev: 0,
            ops,
            num_lines: 4,
            default_handler: false,
            handlers: RwLock::new(vec![None; 4]),
        };
        chip.enable(4).ok();
    }
}
