//! Built-in platform drivers.

use alloc::boxed::Box;

use crate::dev::driver::register_driver;

pub mod display;
pub mod gic;
pub mod gpio;
pub mod keys;

pub fn register_all() {
    register_driver(Box::new(gic::GicDriver));
    register_driver(Box::new(gpio::GpioDriver));
    register_driver(Box::new(keys::KeysDriver));
    register_driver(Box::new(display::DisplayDriver));
}
