//! Trusted heap backing the device model and region lists.

#[cfg(not(test))]
mod inner {
    use buddy_system_allocator::LockedHeap;
    use core::sync::atomic::{AtomicBool, Ordering};

    pub const HEAP_SIZE: usize = 0x40000;

    #[repr(align(4096))]
    struct HeapSpace([u8; HEAP_SIZE]);

    #[unsafe(link_section = ".bss")]
    static HEAP: HeapSpace = HeapSpace([0; HEAP_SIZE]);
    #[global_allocator]
    static ALLOC: LockedHeap<32> = LockedHeap::empty();
    static HEAP_INITIALIZED: AtomicBool = AtomicBool::new(false);

    pub fn init() {
        match HEAP_INITIALIZED.compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
        {
            Ok(_) => {
                let st = HEAP.0.as_ptr() as usize;
                unsafe {
                    ALLOC.lock().init(st, HEAP_SIZE);
                }
                log::info!("heap: {:#x}+{:#x}", st, HEAP_SIZE);
            }
            Err(_) => {
                panic!("the heap cannot be initialized twice");
            }
        }
    }
}

#[cfg(not(test))]
pub use inner::init;

#[cfg(test)]
pub fn init() {}
