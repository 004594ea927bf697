//! Display controller scanout guard.
//!
//! The untrusted OS keeps driving its own frame buffer, but it must not be
//! able to repoint the scanout engine at arbitrary physical memory. The
//! guard pins the buffer address registers while letting every other
//! register through.

use alloc::sync::Arc;
use dt::node::DeviceTree;
use log::debug;

use crate::dev::Device;
use crate::dev::driver::{Driver, DriverProbeError};
use crate::emu::{self, EmuState, Region, RegionCheck};

/// Buffer address registers, relative to the controller window: current
/// and next scanout buffer, plus the overlay processing buffer.
const SCANOUT_REGS: &[u64] = &[0x5E0, 0x5E4, 0x1160];

struct ScanoutGuard {
    base: u64,
}

impl RegionCheck for ScanoutGuard {
    fn check(&self, _: &Region, addr: u64, state: EmuState, _: Option<&mut u32>) -> bool {
        if state != EmuState::Write {
            return true;
        }
        let offset = addr - self.base;
        !SCANOUT_REGS.contains(&offset)
    }
}

#[derive(Debug)]
pub struct DisplayDriver;

impl Driver for DisplayDriver {
    fn get_name(&self) -> &'static str {
        "display"
    }

    fn get_comp_strs(&self) -> &'static [&'static str] {
        &["fsl,imx6sx-lcdif", "fsl,imx28-lcdif"]
    }

    fn probe(&self, _tree: &DeviceTree, dev: &Arc<Device>) -> Result<(), DriverProbeError> {
        let [window] = dev.resources.as_slice() else {
            return Err(DriverProbeError::BadResources);
        };
        emu::add_region(
            window.addr,
            window.size,
            Arc::new(ScanoutGuard { base: window.addr }),
        );
        debug!("display: scanout pinned for '{}'", dev.name);
        Ok(())
    }
}
