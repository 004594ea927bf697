use core::{mem::swap, ops::Range, str};

use crate::{
    fdt::{FdtHeader, FdtToken},
    node::{DeviceTree, Node},
    prop::Property,
};
use alloc::{boxed::Box, collections::btree_map::BTreeMap, vec, vec::Vec};
use utils::num::AlignableTo;

pub struct FdtReader<'a> {
    blob: &'a [u8],
    cursor: usize,
    nodes: Vec<Node>,
    phandle_map: BTreeMap<u32, usize>,
}

/// Basic Reader Functions
impl<'a> FdtReader<'a> {
    /// Read a 32-bit big-endian word at `offset` without touching the cursor.
    fn read_be32_at(&self, offset: usize) -> Result<u32, FdtError> {
        let end = offset.checked_add(4).ok_or(FdtError::Truncated { offset })?;
        if end > self.blob.len() {
            return Err(FdtError::Truncated { offset });
        }
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&self.blob[offset..end]);
        Ok(u32::from_be_bytes(buf))
    }

    /// Read a 32-bit big-endian word from the cursor without advancing it.
    fn peek_u32(&self) -> Result<u32, FdtError> {
        self.read_be32_at(self.cursor)
    }

    /// Advance the cursor by 4 bytes.
    #[inline(always)]
    fn advance(&mut self) {
        self.cursor += 4;
    }

    /// Read a 32-bit big-endian word from the cursor and advance past it.
    fn read_u32(&mut self) -> Result<u32, FdtError> {
        let res = self.peek_u32()?;
        self.advance();
        Ok(res)
    }

    /// Read `len` bytes from the cursor and advance to the next 4-byte aligned position.
    fn read_bytes_aligned(&mut self, len: usize) -> Result<&'a [u8], FdtError> {
        let offset = self.cursor;
        let end = offset.checked_add(len).ok_or(FdtError::Truncated { offset })?;
        if end > self.blob.len() {
            return Err(FdtError::Truncated { offset });
        }
        self.cursor = end.align_up(4);
        Ok(&self.blob[offset..end])
    }

    /// Advance the cursor past zero words and NOPs to the next meaningful token.
    fn skip(&mut self) -> Result<(), FdtError> {
        let mut p = self.peek_u32()?;
        while p == 0 || p == FdtToken::FDT_NOP.bits {
            self.advance();
            p = self.peek_u32()?;
        }
        Ok(())
    }

    /// Read a NUL-terminated string from the cursor and advance to the next aligned position.
    fn read_str_aligned(&mut self) -> Result<&'a str, FdtError> {
        let start = self.cursor;
        let mut end = start;
        while *self.blob.get(end).ok_or(FdtError::Truncated { offset: start })? != 0 {
            end += 1;
        }
        self.cursor = (end + 1).align_up(4);
        str::from_utf8(&self.blob[start..end]).map_err(|_| FdtError::BadString { offset: start })
    }

    /// Read a tag word and verify it equals `supposed`.
    fn read_and_check(&mut self, supposed: FdtToken) -> Result<(), FdtError> {
        let token = self.read_u32()?;
        if token != supposed.bits {
            return Err(FdtError::InvalidToken {
                token: token as usize,
                offset: self.cursor,
            });
        }
        Ok(())
    }
}

impl<'a> FdtReader<'a> {
    /// Expected FDT magic number (0xd00dfeed).
    pub const FDT_MAGIC: u32 = 0xd00dfeed;
    /// The FDT version this parser targets.
    pub const FDT_VERSION: u32 = 17;
    /// The last compatible FDT version accepted by this parser.
    pub const LAST_COMP_VERSION: u32 = 16;

    pub fn new(blob: &'a [u8]) -> FdtReader<'a> {
        FdtReader {
            blob,
            cursor: 0,
            nodes: vec![],
            phandle_map: BTreeMap::new(),
        }
    }

    /// Parse the FDT header fields into host byte order.
    pub fn header(&self) -> Result<FdtHeader, FdtError> {
        Ok(FdtHeader {
            magic: self.read_be32_at(0)?,
            totalsize: self.read_be32_at(4)?,
            off_dt_struct: self.read_be32_at(8)?,
            off_dt_strings: self.read_be32_at(12)?,
            off_mem_rsvmap: self.read_be32_at(16)?,
            version: self.read_be32_at(20)?,
            last_comp_version: self.read_be32_at(24)?,
            boot_cpuid_phys: self.read_be32_at(28)?,
            size_dt_strings: self.read_be32_at(32)?,
            size_dt_struct: self.read_be32_at(36)?,
        })
    }

    /// Validate the FDT header (magic number and compatible version range).
    pub fn validate(&self) -> Result<(), FdtError> {
        let header = self.header()?;

        if header.magic != Self::FDT_MAGIC {
            return Err(FdtError::InvalidMagic {
                magic: header.magic as usize,
            });
        }

        if header.version < Self::LAST_COMP_VERSION || header.last_comp_version > Self::FDT_VERSION
        {
            return Err(FdtError::IncompatibleVersion {
                version: header.version as usize,
            });
        }
        Ok(())
    }

    /// Read a NUL-terminated string from the FDT string table at `offset`.
    fn get_string(&self, header: &FdtHeader, offset: usize) -> Result<&'a str, FdtError> {
        let start = header.off_dt_strings as usize + offset;
        let mut end = start;
        while *self.blob.get(end).ok_or(FdtError::Truncated { offset: start })? != 0 {
            end += 1;
        }
        str::from_utf8(&self.blob[start..end]).map_err(|_| FdtError::BadString { offset: start })
    }

    /// Read consecutive property entries from the structure block and return them.
    ///
    /// Stops when a non-`FDT_PROP` tag is encountered and returns the collected props.
    fn read_props(&mut self, header: &FdtHeader) -> Result<Vec<Property>, FdtError> {
        let mut res = Vec::<Property>::new();
        loop {
            self.skip()?;
            if self.peek_u32()? != FdtToken::FDT_PROP.bits {
                break Ok(res);
            }
            self.advance();
            let len = self.read_u32()? as usize;
            let name_offset = self.read_u32()? as usize;
            let name = Box::from(self.get_string(header, name_offset)?);
            let data = Box::from(self.read_bytes_aligned(len)?);
            res.push(Property { name, data });
        }
    }

    /// Parse a single node (name, properties and child nodes) from the
    /// structure block without setting its parent.
    ///
    /// Recursively parses subnodes until the matching `FDT_END_NODE` is found.
    fn read_node(&mut self, header: &FdtHeader) -> Result<usize, FdtError> {
        self.skip()?;
        self.read_and_check(FdtToken::FDT_BEGIN_NODE)?;
        let full_name = self.read_str_aligned()?;
        let (node_name, unit_addr) = match full_name.find('@') {
            Some(idx) => (&full_name[0..idx], &full_name[idx + 1..]),
            None => (full_name, ""),
        };
        let props = self.read_props(header)?;
        let mut children = vec![];
        loop {
            self.skip()?;
            let token = self.peek_u32()?;
            if token == FdtToken::FDT_BEGIN_NODE.bits {
                children.push(self.read_node(header)?);
            } else if token == FdtToken::FDT_END_NODE.bits {
                self.advance();
                break;
            } else {
                return Err(FdtError::InvalidToken {
                    token: token as usize,
                    offset: self.cursor,
                });
            }
        }
        let id = self.nodes.len();
        for prop in &props {
            if prop.name.as_ref() == "phandle" || prop.name.as_ref() == "linux,phandle" {
                if let Ok(ph) = prop.value_as_u32() {
                    self.phandle_map.insert(ph, id);
                }
            }
        }
        self.nodes.push(Node {
            node_id: id,
            parent_id: 0,
            full_name: Box::from(full_name),
            node_name: Box::from(node_name),
            unit_addr: Box::from(unit_addr),
            children,
            props,
        });
        Ok(id)
    }

    fn set_parent(&mut self, node_id: usize) {
        for child_idx in 0..self.nodes[node_id].children.len() {
            let sub_id = self.nodes[node_id].children[child_idx];
            self.nodes[sub_id].parent_id = node_id;
            self.set_parent(sub_id);
        }
    }

    /// Read the memory reservation map ((address, size) pairs until the zero sentinel).
    fn read_mem_rsv_map(&self, header: &FdtHeader) -> Result<Vec<Range<u64>>, FdtError> {
        let mut offset = header.off_mem_rsvmap as usize;
        let mut res = Vec::new();
        loop {
            let addr = ((self.read_be32_at(offset)? as u64) << 32)
                | self.read_be32_at(offset + 4)? as u64;
            let size = ((self.read_be32_at(offset + 8)? as u64) << 32)
                | self.read_be32_at(offset + 12)? as u64;
            if addr == 0 && size == 0 {
                break Ok(res);
            }
            res.push(addr..addr + size);
            offset += 16;
        }
    }

    fn read_internal(&mut self) -> Result<DeviceTree, FdtError> {
        self.validate()?;
        let header = self.header()?;
        self.cursor = header.off_dt_struct as usize;
        let root_id = self.read_node(&header)?;
        self.set_parent(root_id);
        self.nodes[root_id].parent_id = root_id;
        self.skip()?;
        self.read_and_check(FdtToken::FDT_END)?;

        let mut tree = DeviceTree {
            root_id,
            container: vec![],
            mem_rsv_map: self.read_mem_rsv_map(&header)?,
            phandle_map: BTreeMap::new(),
        };
        swap(&mut self.nodes, &mut tree.container);
        swap(&mut self.phandle_map, &mut tree.phandle_map);
        Ok(tree)
    }

    /// Parse the entire structure block into an owned [DeviceTree].
    ///
    /// All strings and property data are **copied** out of the blob, so the
    /// raw blob memory can be reused afterwards.
    pub fn read(&mut self) -> Result<DeviceTree, FdtError> {
        match self.read_internal() {
            Ok(res) => Ok(res),
            Err(err) => {
                self.cursor = 0;
                self.nodes.clear();
                self.phandle_map.clear();
                Err(err)
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum FdtError {
    InvalidToken { token: usize, offset: usize },
    InvalidMagic { magic: usize },
    IncompatibleVersion { version: usize },
    Truncated { offset: usize },
    BadString { offset: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal big-endian FDT blob builder for reader tests.
    struct BlobBuilder {
        strct: Vec<u8>,
        strings: Vec<u8>,
    }

    impl BlobBuilder {
        fn new() -> Self {
            BlobBuilder {
                strct: vec![],
                strings: vec![],
            }
        }

        fn token(&mut self, t: u32) -> &mut Self {
            self.strct.extend_from_slice(&t.to_be_bytes());
            self
        }

        fn begin(&mut self, name: &str) -> &mut Self {
            self.token(0x01);
            self.strct.extend_from_slice(name.as_bytes());
            self.strct.push(0);
            while self.strct.len() % 4 != 0 {
                self.strct.push(0);
            }
            self
        }

        fn end(&mut self) -> &mut Self {
            self.token(0x02)
        }

        fn prop(&mut self, name: &str, data: &[u8]) -> &mut Self {
            let name_off = self.strings.len() as u32;
            self.strings.extend_from_slice(name.as_bytes());
            self.strings.push(0);
            self.token(0x03);
            self.strct.extend_from_slice(&(data.len() as u32).to_be_bytes());
            self.strct.extend_from_slice(&name_off.to_be_bytes());
            self.strct.extend_from_slice(data);
            while self.strct.len() % 4 != 0 {
                self.strct.push(0);
            }
            self
        }

        fn prop_cells(&mut self, name: &str, cells: &[u32]) -> &mut Self {
            let mut data = vec![];
            for c in cells {
                data.extend_from_slice(&c.to_be_bytes());
            }
            self.prop(name, &data)
        }

        fn build(&mut self) -> Vec<u8> {
            self.token(0x09);
            let header_len = 40usize;
            let rsv_off = header_len;
            let rsv: [u8; 16] = [0; 16];
            let struct_off = rsv_off + rsv.len();
            let strings_off = struct_off + self.strct.len();
            let total = strings_off + self.strings.len();

            let mut blob = vec![];
            for word in [
                0xd00dfeedu32,
                total as u32,
                struct_off as u32,
                strings_off as u32,
                rsv_off as u32,
                17,
                16,
                0,
                self.strings.len() as u32,
                self.strct.len() as u32,
            ] {
                blob.extend_from_slice(&word.to_be_bytes());
            }
            blob.extend_from_slice(&rsv);
            blob.extend_from_slice(&self.strct);
            blob.extend_from_slice(&self.strings);
            blob
        }
    }

    fn sample_blob() -> Vec<u8> {
        let mut b = BlobBuilder::new();
        b.begin("");
        b.prop_cells("#address-cells", &[2]);
        b.prop_cells("#size-cells", &[1]);
        {
            b.begin("intc@a000");
            b.prop("compatible", b"test,intc\0");
            b.prop_cells("phandle", &[1]);
            b.prop_cells("#interrupt-cells", &[2]);
            b.end();
        }
        {
            b.begin("radio@1000");
            b.prop("compatible", b"test,radio\0");
            b.prop_cells("reg", &[0, 0x1000, 0x100]);
            b.prop_cells("interrupts-extended", &[1, 5, 4]);
            b.prop("device-class", b"wifi\0");
            b.end();
        }
        b.end();
        b.build()
    }

    #[test]
    fn parses_nodes_and_phandles() {
        let blob = sample_blob();
        let tree = FdtReader::new(&blob).read().unwrap();
        assert_eq!(tree.container.len(), 3);
        let root = &tree.container[tree.root_id];
        assert_eq!(root.children.len(), 2);
        let intc = tree.get_node("/intc@a000").unwrap();
        assert_eq!(intc.node_name.as_ref(), "intc");
        assert_eq!(intc.unit_addr.as_ref(), "a000");
        assert_eq!(tree.phandle_map.get(&1), Some(&intc.node_id));
        let radio = tree.get_node("/radio@1000").unwrap();
        assert!(tree.is_root(tree.get_parent(radio)));
    }

    #[test]
    fn rejects_bad_magic() {
        let mut blob = sample_blob();
        blob[0] = 0;
        match FdtReader::new(&blob).read() {
            Err(FdtError::InvalidMagic { .. }) => {}
            other => panic!("expected InvalidMagic, got {:?}", other.err()),
        }
    }

    #[test]
    fn reg_honors_parent_cell_widths() {
        let blob = sample_blob();
        let tree = FdtReader::new(&blob).read().unwrap();
        let radio = tree.get_node("/radio@1000").unwrap();
        let windows = tree.reg_windows(radio).unwrap();
        assert_eq!(windows, vec![(0x1000, 0x100)]);
    }

    #[test]
    fn extended_interrupts_resolve_phandle() {
        let blob = sample_blob();
        let tree = FdtReader::new(&blob).read().unwrap();
        let radio = tree.get_node("/radio@1000").unwrap();
        let intc = tree.get_node("/intc@a000").unwrap();
        let specs = tree.interrupt_specs(radio).unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].controller, intc.node_id);
        assert_eq!(specs[0].cells, vec![5, 4]);
    }
}
