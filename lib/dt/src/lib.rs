//! Parsing of flattened device tree blobs into an owned, queryable node tree.

#![cfg_attr(not(test), no_std)]
extern crate alloc;

pub mod fdt;
pub mod node;
pub mod prop;
