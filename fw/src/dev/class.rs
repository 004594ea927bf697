//! Class orchestrator: turns policy bits into device state.
//!
//! Devices carry class tags; enabling or disabling a class walks every
//! tagged device. Isolation is applied at the closest protectable ancestor:
//! a device that cannot be gated itself borrows the protection of the
//! bridge or controller above it.

use alloc::sync::Arc;
use log::{info, warn};

use crate::dev::{Device, index};
use crate::emu;
use crate::gate;

/// Toggle one device and report whether it is a protection point.
///
/// Always reports protectability, even when the device is already in the
/// requested state, so ancestor walks can stop at an untouched protection
/// point.
///
/// Interrupt lines follow the device: a disabled device has its lines
/// routed to the trusted world so the untrusted OS can neither observe nor
/// re-arm them. For protectable devices the gate opens before its register
/// windows become reachable again, and windows are blanked before the gate
/// closes.
pub fn enable_device(dev: &Arc<Device>, enable: bool) -> bool {
    let can_protect = dev.can_protect();
    if dev.is_enabled() == enable {
        return can_protect;
    }

    for binding in &dev.irqs {
        let res = if enable {
            binding.desc.unsecure().and_then(|_| binding.desc.enable())
        } else {
            binding.desc.disable().and_then(|_| binding.desc.secure())
        };
        if let Err(err) = res {
            warn!(
                "class: irq line {} of '{}' not toggled: {:?}",
                binding.desc.line, dev.name, err
            );
        }
    }

    if can_protect {
        if enable {
            for line in &dev.gate_lines {
                gate::set_line(*line as usize, false);
            }
            for res in &dev.resources {
                emu::remove_region(res.addr, res.size, &emu::DENY_ALL);
            }
        } else {
            for res in &dev.resources {
                emu::add_region(res.addr, res.size, emu::DENY_ALL.clone());
            }
            for line in &dev.gate_lines {
                gate::set_line(*line as usize, true);
            }
        }
    }

    dev.set_enabled(enable);
    info!(
        "class: '{}' {}",
        dev.name,
        if enable { "enabled" } else { "disabled" }
    );
    can_protect
}

/// Apply `enable` to every device tagged with `class`.
///
/// Returns whether every tagged device found a protection point on its
/// ancestor chain; callers must treat a `false` as "the class is not
/// actually isolated" and surface it.
pub fn set_class_enabled(class: &str, enable: bool) -> bool {
    let mut all_protected = true;
    for dev in index::all() {
        if !dev.has_class(class) {
            continue;
        }
        let mut cur = Some(dev.clone());
        let mut protected = false;
        while let Some(d) = cur {
            if enable_device(&d, enable) {
                protected = true;
                break;
            }
            cur = d.parent.map(index::get);
        }
        if !protected {
            warn!("class '{}': no protection point above '{}'", class, dev.name);
            all_protected = false;
        }
    }
    all_protected
}

/// Flag of the first tagged device; classes are toggled as a unit, so one
/// representative is enough. A class no device carries is not live.
pub fn is_class_enabled(class: &str) -> bool {
    index::all()
        .iter()
        .find(|dev| dev.has_class(class))
        .map(|dev| dev.is_enabled())
        .unwrap_or(false)
}
