//! Driver subsystem: registration, discovery and probe dispatch.
//!
//! Responsibilities:
//! - Provide the [Driver] trait for platform drivers and a global registry that maps
//!   compatible strings to driver implementations.
//! - Keep driver instances alive for the lifetime of the firmware so that `&'static`
//!   references can be stored and used during probe. The storage used for this purpose
//!   is [DRIVER_REG].
//! - Allow concurrent lookups via [find_drivers] and synchronized updates via
//!   [register_driver].

use alloc::{boxed::Box, collections::btree_map::BTreeMap, sync::Arc, vec, vec::Vec};
use core::fmt::Debug;
use dt::node::DeviceTree;
use log::debug;
use spin::RwLock;
use utils::vec::LockedVecStatic;

use crate::dev::Device;
use crate::irq::IrqError;

/// Trait implemented by drivers.
///
/// [probe] binds the driver to a freshly indexed device; the hardware
/// description is passed alongside so drivers can read their sub-nodes.
/// A successful probe may register interrupt chips, guard regions or gate
/// lines as a side effect.
pub trait Driver: Sync + Debug {
    fn get_name(&self) -> &'static str;
    fn get_comp_strs(&self) -> &'static [&'static str];
    fn probe(&self, tree: &DeviceTree, dev: &Arc<Device>) -> Result<(), DriverProbeError>;
    fn on_registered(&self) {}
}

/// Registry mapping from compatible string to candidate driver references.
static COMP_MAP: RwLock<BTreeMap<&'static str, Vec<&'static dyn Driver>>> =
    RwLock::new(BTreeMap::new());

/// Global storage that owns driver instances.
static DRIVER_REG: LockedVecStatic<dyn Driver> = LockedVecStatic::new();

/// Look up drivers matching `comp_str`.
///
/// The caller receives owned clones of the internal vector to avoid holding
/// locks while probing. If no drivers match, the vec is empty.
pub fn find_drivers(comp_str: &str) -> Vec<&'static dyn Driver> {
    let guard = COMP_MAP.read();
    if let Some(drv) = guard.get(comp_str) {
        drv.clone()
    } else {
        vec![]
    }
}

/// Register a driver instance.
pub fn register_driver<T: 'static + Driver>(driver: Box<T>) {
    debug!("\tregistered driver '{}'", driver.get_name());
    driver.on_registered();
    let (driver, _) = DRIVER_REG.push_boxed(driver);

    let mut guard = COMP_MAP.write();
    for comp in driver.get_comp_strs() {
        let key = *comp;
        if !guard.contains_key(key) {
            guard.insert(key, vec![]);
        }
        let vec = guard.get_mut(key).unwrap();
        vec.push(driver);
    }
}

/// Register every built-in driver. Runs once at boot before probing.
pub fn init() {
    debug!("registering drivers...");
    crate::drivers::register_all();
    debug!("drivers registered");
}

/// Errors that may be returned by [Driver::probe].
#[derive(Debug, Clone, Copy)]
pub enum DriverProbeError {
    /// Register window missing, malformed or unmappable.
    BadResources,
    /// Interrupt bindings missing or rejected by the controller.
    BadInterrupts(IrqError),
    /// A sub-node failed to initialize; propagate up.
    SubDeviceError,
    /// Custom driver-specific information.
    Customized { info: &'static str },
}

impl From<IrqError> for DriverProbeError {
    fn from(err: IrqError) -> Self {
        DriverProbeError::BadInterrupts(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    #[derive(Debug)]
    struct NullDriver;

    impl Driver for NullDriver {
        fn get_name(&self) -> &'static str {
            "null"
        }
        fn get_comp_strs(&self) -> &'static [&'static str] {
            &["test,null-a", "test,null-b"]
        }
        fn probe(&self, _: &DeviceTree, _: &Arc<Device>) -> Result<(), DriverProbeError> {
            Ok(())
        }
    }

    #[test]
    fn registry_maps_every_compatible() {
        let _guard = testutil::lock();
        register_driver(Box::new(NullDriver));
        assert_eq!(find_drivers("test,null-a").len(), 1);
        assert_eq!(find_drivers("test,null-b").len(), 1);
        assert!(find_drivers("test,unknown").is_empty());
    }
}
