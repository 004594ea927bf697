//! Serial console plumbing.
//!
//! The monitor layer owns the UART; it hands this crate a sink function at
//! boot and everything printed by the logger goes through it. Before a sink
//! is registered output is discarded.

use core::fmt::{self, Write};
use spin::Mutex;

static SINK: Mutex<Option<fn(&str)>> = Mutex::new(None);

pub fn register_sink(sink: fn(&str)) {
    *SINK.lock() = Some(sink);
}

struct SerialOut;

impl Write for SerialOut {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        if let Some(sink) = *SINK.lock() {
            sink(s);
        }
        Ok(())
    }
}

pub fn serial_print(args: fmt::Arguments) {
    // Write error is unreachable, the sink is infallible.
    SerialOut.write_fmt(args).ok();
}

#[macro_export]
macro_rules! serial_print {
    ($($arg:tt)*) => {
        $crate::console::serial_print(format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! serial_println {
    () => ($crate::serial_print!("\n"));
    ($($arg:tt)*) => ($crate::serial_print!("{}\n", format_args!($($arg)*)));
}
