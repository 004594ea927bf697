//! Device model: the arena-backed index, driver registry, tree probing and
//! the class orchestrator.

pub mod class;
pub mod device;
pub mod driver;
pub mod index;
pub mod probe;

pub use device::{Device, IrqBinding, Resource, ResourceKind};

/// Stable handle into the device arena. Devices are never destroyed.
pub type DeviceId = usize;
