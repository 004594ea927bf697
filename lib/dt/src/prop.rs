use alloc::{boxed::Box, vec, vec::Vec};
use core::str;

pub struct Property {
    pub name: Box<str>,
    pub data: Box<[u8]>,
}

impl Property {
    /// Interpret the property value as a single big-endian u32.
    pub fn value_as_u32(&self) -> Result<u32, PropertyError> {
        if self.data.len() != 4 {
            return Err(PropertyError::InvalidPropFormat);
        }
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&self.data);
        Ok(u32::from_be_bytes(buf))
    }

    /// Interpret the property value as a single big-endian u64.
    pub fn value_as_u64(&self) -> Result<u64, PropertyError> {
        if self.data.len() != 8 {
            return Err(PropertyError::InvalidPropFormat);
        }
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&self.data);
        Ok(u64::from_be_bytes(buf))
    }

    /// Interpret the property value as a NUL-terminated string.
    pub fn value_as_str(&self) -> Result<&str, PropertyError> {
        str::from_utf8(&self.data)
            .map(|s| s.trim_end_matches('\0'))
            .map_err(|_| PropertyError::InvalidPropFormat)
    }

    /// Interpret the property value as a list of NUL-terminated strings.
    pub fn value_as_strlist(&self) -> Result<Vec<&str>, PropertyError> {
        let mut res = vec![];
        let mut st = 0;
        for i in 0..self.data.len() {
            if self.data[i] == 0 {
                res.push(
                    str::from_utf8(&self.data[st..i])
                        .map_err(|_| PropertyError::InvalidPropFormat)?,
                );
                st = i + 1;
            }
        }
        if st != self.data.len() {
            // last entry not terminated with 0
            res.push(
                str::from_utf8(&self.data[st..])
                    .map_err(|_| PropertyError::InvalidPropFormat)?,
            );
        }
        Ok(res)
    }

    /// Interpret the property value as a sequence of big-endian u32 cells.
    pub fn value_as_cells(&self) -> Result<Vec<u32>, PropertyError> {
        if self.data.len() % 4 != 0 {
            return Err(PropertyError::InvalidPropFormat);
        }
        let mut res = Vec::with_capacity(self.data.len() / 4);
        for chunk in self.data.chunks_exact(4) {
            let mut buf = [0u8; 4];
            buf.copy_from_slice(chunk);
            res.push(u32::from_be_bytes(buf));
        }
        Ok(res)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum PropertyError {
    InvalidPropFormat,
    PropNotFound,
    DanglingHandle,
    BadCellCount,
}
