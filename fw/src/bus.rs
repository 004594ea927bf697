use core::{
    cell::UnsafeCell,
    ptr::{read_volatile, write_volatile},
};

#[repr(transparent)]
pub struct Register<T: Sized + Copy> {
    inner: UnsafeCell<T>,
}

impl<T: Sized + Copy> Register<T> {
    #[inline(always)]
    pub fn read(&self) -> T {
        unsafe { read_volatile(self.inner.get()) }
    }
    #[inline(always)]
    pub fn write(&self, value: T) {
        unsafe {
            write_volatile(self.inner.get(), value);
        }
    }
}

// Register blocks are mapped device memory; every access is volatile.
unsafe impl<T: Sized + Copy> Sync for Register<T> {}

/// Byte-addressed access to mapped register windows.
///
/// Drivers and the emulation engine go through this trait instead of raw
/// pointers so that tests can substitute a memory-backed bus and observe
/// which accesses actually reached the hardware.
pub trait Bus: Send + Sync {
    fn read8(&self, addr: usize) -> u8;
    fn read16(&self, addr: usize) -> u16;
    fn read32(&self, addr: usize) -> u32;
    fn write8(&self, addr: usize, value: u8);
    fn write16(&self, addr: usize, value: u16);
    fn write32(&self, addr: usize, value: u32);

    fn read(&self, addr: usize, size: usize) -> u32 {
        match size {
            1 => self.read8(addr) as u32,
            2 => self.read16(addr) as u32,
            _ => self.read32(addr),
        }
    }

    fn write(&self, addr: usize, size: usize, value: u32) {
        match size {
            1 => self.write8(addr, value as u8),
            2 => self.write16(addr, value as u16),
            _ => self.write32(addr, value),
        }
    }
}

/// The real thing: volatile loads and stores against mapped addresses.
pub struct MmioBus;

impl Bus for MmioBus {
    fn read8(&self, addr: usize) -> u8 {
        unsafe { read_volatile(addr as *const u8) }
    }
    fn read16(&self, addr: usize) -> u16 {
        unsafe { read_volatile(addr as *const u16) }
    }
    fn read32(&self, addr: usize) -> u32 {
        unsafe { read_volatile(addr as *const u32) }
    }
    fn write8(&self, addr: usize, value: u8) {
        unsafe { write_volatile(addr as *mut u8, value) }
    }
    fn write16(&self, addr: usize, value: u16) {
        unsafe { write_volatile(addr as *mut u16, value) }
    }
    fn write32(&self, addr: usize, value: u32) {
        unsafe { write_volatile(addr as *mut u32, value) }
    }
}
