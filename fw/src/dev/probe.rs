//! Build the device index from the hardware description.
//!
//! Probing walks the tree top-down, but interrupt parsing may pull a
//! controller node in ahead of the walk: a device naming a controller that
//! is not indexed yet probes the controller (and its ancestor chain) on
//! demand, non-recursively.
//!
//! A description that cannot be parsed is an integrity failure of the boot
//! payload; probing halts the system rather than continuing with a partial
//! device model.

use alloc::{boxed::Box, sync::Arc};
use dt::node::{DeviceTree, Node};
use log::{debug, error};

use crate::dev::{Device, DeviceId, IrqBinding, Resource, ResourceKind, driver, index};
use crate::irq::{self, IrqDesc};

/// Nodes whose children sit directly on guardable bus memory.
const BUS_BRIDGE_COMPATS: &[&str] = &["simple-bus", "simple-mfd", "isa"];

/// Index the whole tree. The root is taken unconditionally and acts as a
/// bridge so its children get memory resources.
pub fn probe_tree(tree: &DeviceTree) {
    let root = tree.node(tree.root_id);
    let mut dev = match build_device(tree, root, None, false) {
        Some(dev) => dev,
        None => unreachable!("root is never rejected"),
    };
    dev.is_bus_bridge = true;
    let root_dev = index::insert(dev);
    for child in &root.children {
        probe_node(tree, *child, Some(root_dev.id), true);
    }
    debug!("probe: indexed {} devices", index::all().len());
}

/// Probe one node, creating its device if needed.
///
/// With no `parent` given the ancestor chain is resolved first (used for
/// on-demand controller probing). Nodes without a `compatible` string and
/// disabled nodes are rejected, and their subtrees are not descended into.
pub fn probe_node(
    tree: &DeviceTree,
    node_id: usize,
    parent: Option<DeviceId>,
    recursive: bool,
) -> Option<Arc<Device>> {
    let node = tree.node(node_id);

    let dev = match index::lookup_node(node_id) {
        Some(dev) => dev,
        None => {
            let parent = match parent {
                Some(parent) => parent,
                None => {
                    let pnode = tree.get_parent(node);
                    let pdev = index::lookup_node(pnode.node_id)
                        .or_else(|| probe_node(tree, pnode.node_id, None, false))?;
                    pdev.id
                }
            };
            let dev = index::insert(build_device(tree, node, Some(parent), true)?);
            debug!("probe: added '{}'", dev.name);
            dispatch_drivers(tree, &dev);
            dev
        }
    };

    if recursive {
        for child in &node.children {
            probe_node(tree, *child, Some(dev.id), true);
        }
    }
    Some(dev)
}

fn build_device(
    tree: &DeviceTree,
    node: &Node,
    parent: Option<DeviceId>,
    strict: bool,
) -> Option<Device> {
    if strict && (tree.compatibles(node).is_empty() || tree.is_disabled(node)) {
        return None;
    }

    let mut dev = Device::new(node.node_id, tree.get_full_path(node), parent);

    dev.is_bus_bridge = BUS_BRIDGE_COMPATS
        .iter()
        .any(|comp| tree.is_compatible(node, comp));
    dev.resource_kind = match parent {
        Some(parent) if index::get(parent).is_bus_bridge => ResourceKind::Mem,
        _ => ResourceKind::Other,
    };

    let windows = match tree.reg_windows(node) {
        Ok(windows) => windows,
        Err(err) => {
            error!("probe: bad 'reg' on '{}': {:?}", node.full_name, err);
            panic!("probe: malformed hardware description");
        }
    };
    dev.resources = windows
        .iter()
        .map(|(addr, size)| Resource { addr: *addr, size: *size })
        .collect();

    let specs = match tree.interrupt_specs(node) {
        Ok(specs) => specs,
        Err(err) => {
            error!("probe: bad interrupts on '{}': {:?}", node.full_name, err);
            panic!("probe: malformed hardware description");
        }
    };
    for spec in specs {
        let ctrl = index::lookup_node(spec.controller)
            .or_else(|| probe_node(tree, spec.controller, None, false));
        let Some(ctrl) = ctrl else {
            error!(
                "probe: interrupt controller of '{}' cannot be probed",
                node.full_name
            );
            panic!("probe: malformed hardware description");
        };
        let Some(chip) = irq::find_chip(ctrl.id) else {
            error!(
                "probe: no interrupt chip registered for '{}'",
                ctrl.name
            );
            panic!("probe: malformed hardware description");
        };
        let (line, flags) = match chip.map(&spec.cells) {
            Ok(mapped) => mapped,
            Err(err) => {
                error!(
                    "probe: interrupt specifier {:?} of '{}' rejected: {:?}",
                    spec.cells, node.full_name, err
                );
                panic!("probe: malformed hardware description");
            }
        };
        dev.irqs.push(IrqBinding {
            desc: IrqDesc { chip, line },
            flags,
        });
    }

    dev.gate_lines = match tree.gate_lines(node) {
        Ok(lines) => lines,
        Err(err) => {
            error!("probe: bad 'gate-lines' on '{}': {:?}", node.full_name, err);
            panic!("probe: malformed hardware description");
        }
    };
    match tree.classes(node) {
        Ok(classes) => {
            dev.classes = classes.iter().map(|class| Box::from(*class)).collect();
        }
        Err(err) => {
            error!("probe: bad 'device-class' on '{}': {:?}", node.full_name, err);
            panic!("probe: malformed hardware description");
        }
    }

    Some(dev)
}

fn dispatch_drivers(tree: &DeviceTree, dev: &Arc<Device>) {
    let node = tree.node(dev.node);
    for comp in tree.compatibles(node) {
        for drv in driver::find_drivers(comp) {
            debug!("probe: trying driver '{}' on '{}'", drv.get_name(), dev.name);
            match drv.probe(tree, dev) {
                Ok(()) => return,
                Err(err) => {
                    error!(
                        "probe: driver '{}' failed on '{}': {:?}",
                        drv.get_name(),
                        dev.name,
                        err
                    );
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::dev::driver::{Driver, DriverProbeError, register_driver};
    use crate::irq::{IrqChipOps, IrqError, IrqFlags};
    use crate::testutil;
    use alloc::collections::btree_map::BTreeMap;
    use alloc::vec;
    use alloc::vec::Vec;
    use dt::prop::Property;

    pub fn prop(name: &str, data: &[u8]) -> Property {
        Property {
            name: Box::from(name),
            data: Box::from(data),
        }
    }

    pub fn prop_cells(name: &str, cells: &[u32]) -> Property {
        let mut data = vec![];
        for c in cells {
            data.extend_from_slice(&c.to_be_bytes());
        }
        prop(name, &data)
    }

    pub fn node(
        id: usize,
        parent: usize,
        name: &str,
        props: Vec<Property>,
        children: Vec<usize>,
    ) -> Node {
        Node {
            node_id: id,
            parent_id: parent,
            full_name: Box::from(name),
            node_name: Box::from(name.split('@').next().unwrap()),
            unit_addr: Box::from(""),
            children,
            props,
        }
    }

    /// root -> { bus -> dev, intc(ph 7) }; bus listed before the controller
    /// so probing dev pulls the controller in on demand.
    pub fn sample_tree(comp_prefix: &str) -> DeviceTree {
        let compat = |suffix: &str| {
            let mut data = Vec::new();
            data.extend_from_slice(comp_prefix.as_bytes());
            data.extend_from_slice(suffix.as_bytes());
            data.push(0);
            data
        };
        let root = node(
            0,
            0,
            "",
            vec![
                prop_cells("#address-cells", &[1]),
                prop_cells("#size-cells", &[1]),
                prop_cells("interrupt-parent", &[7]),
            ],
            vec![1, 3],
        );
        let bus = node(
            1,
            0,
            "bus",
            vec![
                prop("compatible", b"simple-bus\0"),
                prop_cells("#address-cells", &[1]),
                prop_cells("#size-cells", &[1]),
            ],
            vec![2],
        );
        let dev = node(
            2,
            1,
            "dev@2000",
            vec![
                prop("compatible", &compat(",dev")),
                prop_cells("reg", &[0x2000, 0x100]),
                prop_cells("interrupts", &[9, 4]),
                prop_cells("gate-lines", &[42, 43]),
                prop("device-class", b"wifi\0"),
            ],
            vec![],
        );
        let intc = node(
            3,
            0,
            "intc",
            vec![
                prop("compatible", &compat(",intc")),
                prop_cells("#interrupt-cells", &[2]),
                prop_cells("phandle", &[7]),
            ],
            vec![],
        );
        let mut phandle_map = BTreeMap::new();
        phandle_map.insert(7, 3);
        DeviceTree {
            root_id: 0,
            container: vec![root, bus, dev, intc],
            mem_rsv_map: vec![],
            phandle_map,
        }
    }

    struct PassOps;

    impl IrqChipOps for PassOps {
        fn map(&self, spec: &[u32]) -> Result<(usize, IrqFlags), IrqError> {
            match spec {
                [line, flags] => Ok((*line as usize, IrqFlags::from_bits_truncate(*flags))),
                _ => Err(IrqError::BadSpec),
            }
        }
        fn add(&self, _: usize, _: IrqFlags) -> Result<(), IrqError> {
            Ok(())
        }
        fn remove(&self, _: usize) -> Result<(), IrqError> {
            Ok(())
        }
        fn enable(&self, _: usize) -> Result<(), IrqError> {
            Ok(())
        }
        fn disable(&self, _: usize) -> Result<(), IrqError> {
            Ok(())
        }
        fn secure(&self, _: usize) -> Result<(), IrqError> {
            Ok(())
        }
        fn unsecure(&self, _: usize) -> Result<(), IrqError> {
            Ok(())
        }
        fn raise(&self, _: usize) -> Result<(), IrqError> {
            Ok(())
        }
    }

    #[derive(Debug)]
    struct TestIntcDriver {
        comps: &'static [&'static str],
    }

    impl Driver for TestIntcDriver {
        fn get_name(&self) -> &'static str {
            "test-intc"
        }
        fn get_comp_strs(&self) -> &'static [&'static str] {
            self.comps
        }
        fn probe(&self, _: &DeviceTree, dev: &Arc<Device>) -> Result<(), DriverProbeError> {
            irq::register_chip(dev.id, Arc::new(PassOps), 32, false);
            Ok(())
        }
    }

    fn fresh_world() {
        index::reset_for_tests();
        irq::reset_for_tests();
    }

    #[test]
    fn probe_resolves_on_demand_controller() {
        let _guard = testutil::lock();
        fresh_world();
        register_driver(Box::new(TestIntcDriver {
            comps: &["probe-a,intc"],
        }));
        let tree = sample_tree("probe-a");
        probe_tree(&tree);

        let dev = index::all()
            .into_iter()
            .find(|d| d.name.as_ref() == "/bus/dev@2000")
            .unwrap();
        // Resources resolved through the bridge parent.
        assert_eq!(dev.resource_kind, ResourceKind::Mem);
        assert_eq!(dev.resources.len(), 1);
        assert_eq!(dev.resources[0].addr, 0x2000);
        // The controller was indexed ahead of the walk and mapped the line.
        assert_eq!(dev.irqs.len(), 1);
        assert_eq!(dev.irqs[0].desc.line, 9);
        assert_eq!(dev.gate_lines, vec![42, 43]);
        assert!(dev.has_class("wifi"));
        assert!(dev.can_protect());

        let intc = index::lookup_node(3).unwrap();
        assert!(irq::find_chip(intc.id).is_some());
        fresh_world();
    }

    #[test]
    fn extended_specifier_probes_controller_on_demand() {
        let _guard = testutil::lock();
        fresh_world();
        register_driver(Box::new(TestIntcDriver {
            comps: &["probe-b,intc"],
        }));
        let mut tree = sample_tree("probe-b");
        // Replace plain interrupts with an extended specifier naming the
        // controller by phandle.
        tree.container[2]
            .props
            .retain(|p| p.name.as_ref() != "interrupts");
        tree.container[2]
            .props
            .push(prop_cells("interrupts-extended", &[7, 11, 1]));
        probe_tree(&tree);

        let dev = index::lookup_node(2).unwrap();
        assert_eq!(dev.irqs.len(), 1);
        assert_eq!(dev.irqs[0].desc.line, 11);
        let intc = index::lookup_node(3).unwrap();
        assert!(Arc::ptr_eq(
            &dev.irqs[0].desc.chip,
            &irq::find_chip(intc.id).unwrap()
        ));
        fresh_world();
    }

    #[test]
    fn disabled_and_bare_nodes_are_skipped() {
        let _guard = testutil::lock();
        fresh_world();
        register_driver(Box::new(TestIntcDriver {
            comps: &["probe-c,intc"],
        }));
        let mut tree = sample_tree("probe-c");
        tree.container[2].props.push(prop("status", b"disabled\0"));
        // Strip the bus compatible: its subtree must not be descended into.
        tree.container[1]
            .props
            .retain(|p| p.name.as_ref() != "compatible");
        probe_tree(&tree);

        assert!(index::lookup_node(1).is_none());
        assert!(index::lookup_node(2).is_none());
        // The controller under the root is still indexed.
        assert!(index::lookup_node(3).is_some());
        fresh_world();
    }
}
