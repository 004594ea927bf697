//! Trusted-world device isolation core.
//!
//! Builds an in-memory device model from the platform's hardware description,
//! lets trusted logic toggle security classes of peripheral groups at runtime,
//! and enforces the committed policy against the untrusted OS through the
//! hardware security gate and the MMIO emulation engine.
//!
//! Boot sequencing, abort diagnostics and the confirmation UI live outside
//! this crate; the monitor layer is expected to call, in order:
//! [heap::init], [logging::init], [plat::register_iomap], [gate::init],
//! [dev::driver::init], [dev::probe::probe_tree] and [emu::init], and to route
//! data-abort traps into [emu::handle].

#![cfg_attr(not(test), no_std)]
extern crate alloc;

#[macro_use]
pub mod console;

pub mod bus;
pub mod dev;
pub mod drivers;
pub mod emu;
pub mod gate;
pub mod heap;
pub mod irq;
pub mod logging;
pub mod plat;
pub mod policy;

#[cfg(test)]
pub(crate) mod testutil;
