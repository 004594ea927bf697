use crate::prop::{Property, PropertyError};
use alloc::{boxed::Box, collections::btree_map::BTreeMap, string::String, vec, vec::Vec};
use core::ops::Range;

pub struct DeviceTree {
    pub root_id: usize,
    pub container: Vec<Node>,
    pub mem_rsv_map: Vec<Range<u64>>,
    pub phandle_map: BTreeMap<u32, usize>,
}

pub struct Node {
    pub node_id: usize,
    pub parent_id: usize,
    pub full_name: Box<str>,
    pub node_name: Box<str>,
    pub unit_addr: Box<str>,
    pub children: Vec<usize>,
    pub props: Vec<Property>,
}

/// One resolved interrupt binding: the controller node plus the raw
/// specifier cells sized by the controller's `#interrupt-cells`.
#[derive(Debug, PartialEq, Eq)]
pub struct IntrSpec {
    pub controller: usize,
    pub cells: Vec<u32>,
}

impl DeviceTree {
    pub fn node(&self, id: usize) -> &Node {
        &self.container[id]
    }

    pub fn is_root(&self, node: &Node) -> bool {
        self.get_parent(node).node_id == node.node_id
    }

    fn full_path(&self, node: &Node) -> String {
        if self.is_root(node) {
            String::from("")
        } else {
            self.full_path(self.get_parent(node)) + "/" + node.full_name.as_ref()
        }
    }

    pub fn get_full_path(&self, node: &Node) -> Box<str> {
        self.full_path(node).into_boxed_str()
    }

    pub fn get_parent(&self, node: &Node) -> &Node {
        &self.container[node.parent_id]
    }

    pub fn get_children<'b>(&'b self, node: &Node) -> impl Iterator<Item = &'b Node> {
        node.children.iter().map(|x| &self.container[*x])
    }

    pub fn get_property<'b>(&self, node: &'b Node, name: impl AsRef<str>) -> Option<&'b Property> {
        let name = name.as_ref();
        node.props.iter().find(|prop| prop.name.as_ref() == name)
    }

    pub fn get_node(&self, path: impl AsRef<str>) -> Option<&Node> {
        let mut node = &self.container[self.root_id];
        for section in path.as_ref().split('/') {
            if section.trim().is_empty() {
                continue;
            }
            node = self
                .get_children(node)
                .find(|subnode| subnode.full_name.as_ref() == section)?;
        }
        Some(node)
    }

    pub fn node_by_phandle(&self, phandle: u32) -> Option<&Node> {
        self.phandle_map.get(&phandle).map(|id| self.node(*id))
    }
}

/// Property conventions consumed by the device layer.
impl DeviceTree {
    pub fn compatibles<'b>(&self, node: &'b Node) -> Vec<&'b str> {
        match self.get_property(node, "compatible") {
            Some(prop) => prop.value_as_strlist().unwrap_or_default(),
            None => vec![],
        }
    }

    pub fn is_compatible(&self, node: &Node, with: &str) -> bool {
        self.compatibles(node).contains(&with)
    }

    /// A node is disabled when it carries a `status` property that is
    /// neither "ok" nor "okay".
    pub fn is_disabled(&self, node: &Node) -> bool {
        match self.get_property(node, "status") {
            Some(prop) => !matches!(prop.value_as_str(), Ok("ok") | Ok("okay")),
            None => false,
        }
    }

    fn cell_count(&self, node: &Node, name: &str, default: usize) -> Result<usize, PropertyError> {
        match self.get_property(node, name) {
            Some(prop) => Ok(prop.value_as_u32()? as usize),
            None => Ok(default),
        }
    }

    /// Fold `width` big-endian cells starting at `index` into one integer.
    fn fold_cells(cells: &[u32], index: usize, width: usize) -> u64 {
        let mut val = 0u64;
        for cell in &cells[index..index + width] {
            val = (val << 32) | *cell as u64;
        }
        val
    }

    /// Resolve the `reg` windows of `node` as (address, size) pairs, honoring
    /// the parent's `#address-cells` / `#size-cells` widths.
    pub fn reg_windows(&self, node: &Node) -> Result<Vec<(u64, u64)>, PropertyError> {
        let reg = match self.get_property(node, "reg") {
            Some(prop) => prop.value_as_cells()?,
            None => return Ok(vec![]),
        };

        let parent = self.get_parent(node);
        let addr_cells = self.cell_count(parent, "#address-cells", 2)?;
        let size_cells = self.cell_count(parent, "#size-cells", 1)?;
        let width = addr_cells + size_cells;
        if width == 0 || reg.len() % width != 0 {
            return Err(PropertyError::BadCellCount);
        }

        let mut res = vec![];
        for index in (0..reg.len()).step_by(width) {
            let addr = Self::fold_cells(&reg, index, addr_cells);
            let size = Self::fold_cells(&reg, index + addr_cells, size_cells);
            res.push((addr, size));
        }
        Ok(res)
    }

    pub fn interrupt_cells(&self, controller: &Node) -> Result<usize, PropertyError> {
        self.cell_count(controller, "#interrupt-cells", 1)
    }

    /// Find the interrupt controller governing `node`: the phandle named by
    /// the nearest `interrupt-parent`, searching the node and its ancestors.
    fn interrupt_parent(&self, node: &Node) -> Result<&Node, PropertyError> {
        let mut cur = node;
        loop {
            if let Some(prop) = self.get_property(cur, "interrupt-parent") {
                let phandle = prop.value_as_u32()?;
                return self
                    .node_by_phandle(phandle)
                    .ok_or(PropertyError::DanglingHandle);
            }
            if self.is_root(cur) {
                return Err(PropertyError::DanglingHandle);
            }
            cur = self.get_parent(cur);
        }
    }

    /// Resolve the interrupt bindings of `node`.
    ///
    /// `interrupts-extended` entries name their controller per entry; plain
    /// `interrupts` (or the `secure-interrupts` override) use the nearest
    /// `interrupt-parent`. Nodes without either yield an empty list.
    pub fn interrupt_specs(&self, node: &Node) -> Result<Vec<IntrSpec>, PropertyError> {
        if let Some(prop) = self.get_property(node, "interrupts-extended") {
            let data = prop.value_as_cells()?;
            let mut res = vec![];
            let mut index = 0;
            while index < data.len() {
                let controller = self
                    .node_by_phandle(data[index])
                    .ok_or(PropertyError::DanglingHandle)?;
                let cells = self.interrupt_cells(controller)?;
                index += 1;
                if index + cells > data.len() {
                    return Err(PropertyError::BadCellCount);
                }
                res.push(IntrSpec {
                    controller: controller.node_id,
                    cells: data[index..index + cells].to_vec(),
                });
                index += cells;
            }
            return Ok(res);
        }

        let prop = self
            .get_property(node, "secure-interrupts")
            .or_else(|| self.get_property(node, "interrupts"));
        let data = match prop {
            Some(prop) => prop.value_as_cells()?,
            None => return Ok(vec![]),
        };

        let controller = self.interrupt_parent(node)?;
        let cells = self.interrupt_cells(controller)?;
        if cells == 0 || data.len() % cells != 0 {
            return Err(PropertyError::BadCellCount);
        }
        Ok(data
            .chunks_exact(cells)
            .map(|chunk| IntrSpec {
                controller: controller.node_id,
                cells: chunk.to_vec(),
            })
            .collect())
    }

    /// Security-gate line indices declared by the node (`gate-lines`).
    pub fn gate_lines(&self, node: &Node) -> Result<Vec<u32>, PropertyError> {
        match self.get_property(node, "gate-lines") {
            Some(prop) => prop.value_as_cells(),
            None => Ok(vec![]),
        }
    }

    /// Class tags the node belongs to (`device-class` string list).
    pub fn classes<'b>(&self, node: &'b Node) -> Result<Vec<&'b str>, PropertyError> {
        match self.get_property(node, "device-class") {
            Some(prop) => prop.value_as_strlist(),
            None => Ok(vec![]),
        }
    }
}
