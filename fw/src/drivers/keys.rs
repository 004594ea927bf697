//! GPIO-wired buttons.
//!
//! Buttons are the only human input channel the trusted world has, so their
//! lines are claimed as secure at probe time. A press runs through the
//! registered button handlers; unconsumed presses are passed on so the
//! untrusted OS still sees its keys.

use alloc::{boxed::Box, sync::Arc, vec::Vec};
use dt::node::DeviceTree;
use lazy_static::lazy_static;
use log::{debug, warn};
use spin::Mutex;

use crate::dev::{Device, driver::{Driver, DriverProbeError}, index, probe};
use crate::irq::{self, IrqDesc, IrqFlags, IrqHandler, IrqReturn};
use crate::policy;

// Input event codes of the confirmation pair.
const KEY_HOMEPAGE: u32 = 172;
const KEY_BACK: u32 = 158;

/// Consumers of button presses. Returning `true` claims the press; an
/// unclaimed press is forwarded to the untrusted OS.
pub trait ButtonHandler: Send + Sync {
    fn on_press(&self, code: u32) -> bool;
}

struct Button {
    code: u32,
    label: Option<Box<str>>,
    desc: IrqDesc,
}

lazy_static! {
    static ref BUTTONS: Mutex<Vec<Arc<Button>>> = Mutex::new(Vec::new());
    static ref HANDLERS: Mutex<Vec<Arc<dyn ButtonHandler>>> = Mutex::new(Vec::new());
    static ref CONFIRM_HANDLER: Mutex<Option<Arc<dyn ButtonHandler>>> = Mutex::new(None);
}

pub fn register_handler(handler: Arc<dyn ButtonHandler>) {
    HANDLERS.lock().push(handler);
}

pub fn unregister_handler(handler: &Arc<dyn ButtonHandler>) {
    HANDLERS.lock().retain(|h| !Arc::ptr_eq(h, handler));
}

struct ButtonPress {
    code: u32,
}

impl IrqHandler for ButtonPress {
    fn handle(&self) -> IrqReturn {
        let handlers: Vec<_> = HANDLERS.lock().clone();
        let mut consumed = false;
        for handler in handlers {
            consumed |= handler.on_press(self.code);
        }
        if consumed {
            IrqReturn::Handled
        } else {
            IrqReturn::HandledPass
        }
    }
}

/// Maps the confirmation pair onto the policy decision cell.
struct ConfirmButtons;

impl ButtonHandler for ConfirmButtons {
    fn on_press(&self, code: u32) -> bool {
        match code {
            KEY_HOMEPAGE => {
                policy::confirm(true);
                true
            }
            KEY_BACK => {
                policy::confirm(false);
                true
            }
            _ => false,
        }
    }
}

/// Route the confirmation keys into the policy layer while a request waits.
pub(crate) fn arm_confirmation() {
    if BUTTONS.lock().is_empty() {
        warn!("keys: no buttons present, confirmation must come from elsewhere");
        return;
    }
    let handler: Arc<dyn ButtonHandler> = Arc::new(ConfirmButtons);
    register_handler(handler.clone());
    *CONFIRM_HANDLER.lock() = Some(handler);
}

pub(crate) fn disarm_confirmation() {
    if let Some(handler) = CONFIRM_HANDLER.lock().take() {
        unregister_handler(&handler);
    }
}

#[derive(Debug)]
pub struct KeysDriver;

impl Driver for KeysDriver {
    fn get_name(&self) -> &'static str {
        "gpio-keys"
    }

    fn get_comp_strs(&self) -> &'static [&'static str] {
        &["gpio-keys"]
    }

    /// Each sub-node is one button: `linux,code` (required), `label`
    /// (optional) and a `gpios` phandle triple naming the line.
    fn probe(&self, tree: &DeviceTree, dev: &Arc<Device>) -> Result<(), DriverProbeError> {
        let node = tree.node(dev.node);
        for sub in tree.get_children(node) {
            let code = tree
                .get_property(sub, "linux,code")
                .and_then(|prop| prop.value_as_u32().ok())
                .ok_or(DriverProbeError::Customized {
                    info: "button without 'linux,code'",
                })?;
            let label = tree
                .get_property(sub, "label")
                .and_then(|prop| prop.value_as_str().ok())
                .map(Box::from);

            let cells = tree
                .get_property(sub, "gpios")
                .and_then(|prop| prop.value_as_cells().ok())
                .ok_or(DriverProbeError::Customized {
                    info: "button without 'gpios'",
                })?;
            let [phandle, spec @ ..] = cells.as_slice() else {
                return Err(DriverProbeError::Customized { info: "empty 'gpios'" });
            };
            let ctrl_node = tree
                .node_by_phandle(*phandle)
                .ok_or(DriverProbeError::Customized { info: "dangling gpio phandle" })?;
            let ctrl = index::lookup_node(ctrl_node.node_id)
                .or_else(|| probe::probe_node(tree, ctrl_node.node_id, None, false))
                .ok_or(DriverProbeError::SubDeviceError)?;
            let chip = irq::find_chip(ctrl.id).ok_or(DriverProbeError::SubDeviceError)?;
            let (line, _) = chip.map(spec)?;
            let desc = IrqDesc { chip, line };

            // Buttons fire on both edges so press and release both re-arm.
            desc.add(
                IrqFlags::EDGE_RISING | IrqFlags::EDGE_FALLING,
                Some(Arc::new(ButtonPress { code })),
            )?;
            desc.secure()?;
            desc.enable()?;

            debug!(
                "keys: button '{}' code {} on line {}",
                label.as_deref().unwrap_or("?"),
                code,
                line
            );
            BUTTONS.lock().push(Arc::new(Button { code, label, desc }));
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn reset_for_tests() {
    BUTTONS.lock().clear();
    HANDLERS.lock().clear();
    *CONFIRM_HANDLER.lock() = None;
}
