//! Hooks the monitor layer fills in at boot.

use spin::RwLock;

/// Translate a physical register window into an address dereferenceable by
/// the trusted world. The monitor installs its static mapping here; drivers
/// refuse to probe while no mapping is registered.
pub type IoMap = fn(phys: u64, size: u64) -> Option<usize>;

static IOMAP: RwLock<Option<IoMap>> = RwLock::new(None);

pub fn register_iomap(map: IoMap) {
    *IOMAP.write() = Some(map);
}

pub fn iomap(phys: u64, size: u64) -> Option<usize> {
    (*IOMAP.read())?(phys, size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    #[test]
    fn iomap_roundtrip() {
        let _guard = testutil::lock();
        register_iomap(|phys, _size| Some(phys as usize + 0x1000));
        assert_eq!(iomap(0x30200000, 0x4000), Some(0x30201000));
        *IOMAP.write() = None;
        assert_eq!(iomap(0x30200000, 0x4000), None);
    }
}
