use arcstr::ArcStr;

use crate::rebuild::RebuildError;
use crate::{
    Connection, Design, Direction, Fig, Instance, Module, NetDesc, Reference, Terminal,
};

fn inv() -> Module {
    let mut m = Module::new("inv");
    m.terminals_mut().push(Terminal::new("in", Direction::Input));
    m.terminals_mut().push(Terminal::new("out", Direction::Output));
    m
}

fn buf() -> Module {
    let mut m = Module::new("buf");
    m.terminals_mut().push(Terminal::new("in", Direction::Input));
    m.terminals_mut().push(Terminal::new("out", Direction::Output));
    let mut i0 = Instance::new("i0", Reference::Module(arcstr::literal!("inv")));
    i0.set_connection(Connection::by_name([("in", Some("in")), ("out", Some("net1"))]));
    let mut i1 = Instance::new("i1", Reference::Module(arcstr::literal!("inv")));
    i1.set_connection(Connection::by_name([("in", Some("net1")), ("out", Some("out"))]));
    m.instances_mut().push(i0);
    m.instances_mut().push(i1);
    m
}

fn buf_design() -> Design {
    let mut design = Design::new("test");
    design.modules_mut().push(inv());
    design.modules_mut().push(buf());
    design
}

#[test]
fn rebuild_regenerates_nets_in_discovery_order() {
    let mut design = buf_design();
    design.rebuild(false).unwrap();
    let buf = design.modules().get("buf").unwrap();
    let nets: Vec<_> = buf.nets().names().map(|n| n.as_str()).collect();
    // Terminals first, then nets discovered from instances in order.
    assert_eq!(nets, ["in", "out", "net1"]);
}

#[test]
fn rebuild_is_idempotent() {
    let mut design = buf_design();
    design.rebuild(false).unwrap();
    let first = design.modules().get("buf").unwrap().clone();
    design.rebuild(false).unwrap();
    let second = design.modules().get("buf").unwrap();
    assert_eq!(first.instances().len(), second.instances().len());
    for (a, b) in first.instances().iter().zip(second.instances()) {
        assert_eq!(a.connection(), b.connection());
    }
    let first: Vec<_> = first.nets().names().collect();
    let second: Vec<_> = second.nets().names().collect();
    assert_eq!(first, second);
}

#[test]
fn positional_connection_converts_to_by_name() {
    let mut design = buf_design();
    let mut i2 = Instance::new("i2", Reference::Module(arcstr::literal!("inv")));
    i2.set_connection(Connection::ByOrder(vec![
        Some(ArcStr::from("a")),
        Some(ArcStr::from("b")),
    ]));
    design
        .modules_mut()
        .get_mut("buf")
        .unwrap()
        .instances_mut()
        .push(i2);
    design.rebuild(false).unwrap();
    let buf = design.modules().get("buf").unwrap();
    let conn = buf.instances().get("i2").unwrap().connection();
    let map = conn.as_by_name().unwrap();
    assert_eq!(map.get("in"), Some(&NetDesc::Net(ArcStr::from("a"))));
    assert_eq!(map.get("out"), Some(&NetDesc::Net(ArcStr::from("b"))));
}

#[test]
fn positional_count_mismatch_fails() {
    let mut design = buf_design();
    let mut i2 = Instance::new("i2", Reference::Module(arcstr::literal!("inv")));
    i2.set_connection(Connection::ByOrder(vec![Some(ArcStr::from("a"))]));
    design
        .modules_mut()
        .get_mut("buf")
        .unwrap()
        .instances_mut()
        .push(i2);
    let err = design.rebuild(false).unwrap_err();
    assert!(matches!(
        err,
        RebuildError::ConnectionCountMismatch {
            expected: 2,
            found: 1,
            ..
        }
    ));
}

#[test]
fn positional_connection_without_master_is_left_alone() {
    let mut design = buf_design();
    let mut i2 = Instance::new("i2", Reference::Module(arcstr::literal!("missing")));
    i2.set_connection(Connection::ByOrder(vec![Some(ArcStr::from("a"))]));
    design
        .modules_mut()
        .get_mut("buf")
        .unwrap()
        .instances_mut()
        .push(i2);
    design.rebuild(false).unwrap();
    let buf = design.modules().get("buf").unwrap();
    let conn = buf.instances().get("i2").unwrap().connection();
    assert!(matches!(conn, Connection::ByOrder(_)));
    // The unresolved net still lands in the regenerated net set.
    assert!(buf.nets().contains("a"));
}

#[test]
fn unknown_terminal_fails_rebuild() {
    let mut design = buf_design();
    design
        .modules_mut()
        .get_mut("buf")
        .unwrap()
        .instances_mut()
        .get_mut("i0")
        .unwrap()
        .connect("bogus", Some(NetDesc::Net(ArcStr::from("x"))));
    let err = design.rebuild(false).unwrap_err();
    assert!(matches!(err, RebuildError::TerminalNotFound { .. }));
}

fn bus_master() -> Module {
    let mut m = Module::new("reg2");
    m.terminals_mut().push(Terminal::new("d[1]", Direction::Input));
    m.terminals_mut().push(Terminal::new("d[0]", Direction::Input));
    m.terminals_mut().push(Terminal::new("q", Direction::Output));
    m
}

#[test]
fn verilog_style_fans_out_bus_roots() {
    let mut design = Design::new("test");
    design.modules_mut().push(bus_master());
    let mut top = Module::new("top");
    let mut i0 = Instance::new("x0", Reference::Module(arcstr::literal!("reg2")));
    i0.set_connection(Connection::by_name([
        ("d", Some("data")),
        ("q", Some("out")),
    ]));
    top.instances_mut().push(i0);
    design.modules_mut().push(top);
    design.rebuild(true).unwrap();

    let top = design.modules().get("top").unwrap();
    let map = top
        .instances()
        .get("x0")
        .unwrap()
        .connection()
        .as_by_name()
        .unwrap();
    // No matching bus nets in the master, so member net names are
    // fabricated with descending indices.
    assert_eq!(map.get("d[1]"), Some(&NetDesc::Net(ArcStr::from("data[1]"))));
    assert_eq!(map.get("d[0]"), Some(&NetDesc::Net(ArcStr::from("data[0]"))));
    assert_eq!(map.get("q"), Some(&NetDesc::Net(ArcStr::from("out"))));
    assert!(map.get("d").is_none());
}

#[test]
fn verilog_style_zips_matching_master_bus_nets() {
    let mut design = Design::new("test");
    let mut master = bus_master();
    // Give the master bus nets matching the connected net's root.
    master.nets_mut().push(crate::Net::new("data[1]"));
    master.nets_mut().push(crate::Net::new("data[0]"));
    design.modules_mut().push(master);
    let mut top = Module::new("top");
    let mut i0 = Instance::new("x0", Reference::Module(arcstr::literal!("reg2")));
    i0.set_connection(Connection::by_name([
        ("d", Some("data")),
        ("q", Some("out")),
    ]));
    top.instances_mut().push(i0);
    design.modules_mut().push(top);
    design.rebuild(true).unwrap();

    let top = design.modules().get("top").unwrap();
    let map = top
        .instances()
        .get("x0")
        .unwrap()
        .connection()
        .as_by_name()
        .unwrap();
    assert_eq!(map.get("d[1]"), Some(&NetDesc::Net(ArcStr::from("data[1]"))));
    assert_eq!(map.get("d[0]"), Some(&NetDesc::Net(ArcStr::from("data[0]"))));
}

#[test]
fn spice_style_does_not_fan_out() {
    let mut design = Design::new("test");
    design.modules_mut().push(bus_master());
    let mut top = Module::new("top");
    let mut i0 = Instance::new("x0", Reference::Module(arcstr::literal!("reg2")));
    i0.set_connection(Connection::by_name([("d", Some("data"))]));
    top.instances_mut().push(i0);
    design.modules_mut().push(top);
    let err = design.rebuild(false).unwrap_err();
    assert!(matches!(err, RebuildError::TerminalNotFound { .. }));
}

#[test]
fn group_connection_zips_bus_terminals() {
    let mut design = Design::new("test");
    design.modules_mut().push(bus_master());
    let mut top = Module::new("top");
    let mut i0 = Instance::new("x0", Reference::Module(arcstr::literal!("reg2")));
    i0.set_connection(Connection::by_name([
        (
            "d",
            Some(NetDesc::Group(vec![ArcStr::from("a"), ArcStr::from("b")])),
        ),
        ("q", Some(NetDesc::Net(ArcStr::from("out")))),
    ]));
    top.instances_mut().push(i0);
    design.modules_mut().push(top);
    design.rebuild(false).unwrap();

    let top = design.modules().get("top").unwrap();
    let map = top
        .instances()
        .get("x0")
        .unwrap()
        .connection()
        .as_by_name()
        .unwrap();
    assert_eq!(map.get("d[1]"), Some(&NetDesc::Net(ArcStr::from("a"))));
    assert_eq!(map.get("d[0]"), Some(&NetDesc::Net(ArcStr::from("b"))));
}

#[test]
fn group_width_mismatch_fails() {
    let mut design = Design::new("test");
    design.modules_mut().push(bus_master());
    let mut top = Module::new("top");
    let mut i0 = Instance::new("x0", Reference::Module(arcstr::literal!("reg2")));
    i0.set_connection(Connection::by_name([(
        "d",
        Some(NetDesc::Group(vec![
            ArcStr::from("a"),
            ArcStr::from("b"),
            ArcStr::from("c"),
        ])),
    )]));
    top.instances_mut().push(i0);
    design.modules_mut().push(top);
    let err = design.rebuild(false).unwrap_err();
    assert!(matches!(
        err,
        RebuildError::BusWidthMismatch {
            terminals: 2,
            nets: 3,
            ..
        }
    ));
}

fn buf4_design() -> Design {
    let mut design = Design::new("test");
    design.modules_mut().push(inv());
    design.modules_mut().push(buf());
    let mut buf4 = Module::new("buf4");
    buf4.terminals_mut().push(Terminal::new("in", Direction::Input));
    for i in 0..4 {
        buf4.terminals_mut()
            .push(Terminal::new(arcstr::format!("out[{i}]"), Direction::Output));
    }
    for i in 0..4 {
        let mut b = Instance::new(
            arcstr::format!("b{i}"),
            Reference::Module(arcstr::literal!("buf")),
        );
        b.set_connection(Connection::by_name([
            ("in", Some(NetDesc::Net(ArcStr::from("in")))),
            ("out", Some(NetDesc::Net(arcstr::format!("out[{i}]")))),
        ]));
        buf4.instances_mut().push(b);
    }
    design.modules_mut().push(buf4);
    design.rebuild(false).unwrap();
    design
}

#[test]
fn make_module_infers_terminal_directions() {
    let mut design = buf4_design();
    let buf3 = design
        .make_module("buf4", "buf3", &["b0", "b1", "b2"])
        .unwrap();
    assert_eq!(buf3.name(), "buf3");
    assert_eq!(buf3.instances().len(), 3);
    assert_eq!(buf3.terminals().get("in").unwrap().direction(), Direction::Input);
    for i in 0..3 {
        assert_eq!(
            buf3.terminals()
                .get(&format!("out[{i}]"))
                .unwrap()
                .direction(),
            Direction::Output
        );
    }
    let nets: Vec<_> = buf3.nets().names().map(|n| n.as_str()).collect();
    assert_eq!(nets, ["in", "out[0]", "out[1]", "out[2]"]);
}

#[test]
fn make_module_rejects_duplicate_names() {
    let mut design = buf4_design();
    let err = design.make_module("buf4", "buf", &["b0"]).unwrap_err();
    assert!(matches!(err, RebuildError::DuplicateModule(_)));
}

#[test]
fn make_module_rejects_missing_instances() {
    let mut design = buf4_design();
    let err = design.make_module("buf4", "buf3", &["b9"]).unwrap_err();
    assert!(matches!(err, RebuildError::InstanceNotFound { .. }));
}

#[test]
fn top_levels_ignores_referenced_modules() {
    let design = buf4_design();
    let tops: Vec<_> = design
        .top_levels()
        .into_iter()
        .map(|m| m.name().as_str())
        .collect();
    assert_eq!(tops, ["buf4"]);
}

#[test]
fn include_design_prefers_lower_rank() {
    let mut root = Design::new("root");
    let mut keep = Module::new("m");
    keep.set_lineno(Some(1));
    root.modules_mut().push(keep);
    root.set_priority(vec![]);

    // The root definition ranks [1], the include ranks [3, 2]; the root
    // outranks the include and keeps its definition.
    let mut other = Design::new("inc");
    other.set_priority(vec![3]);
    let mut replacement = Module::new("m");
    replacement.set_lineno(Some(2));
    replacement.parameters_mut().insert("marker", "1");
    other.modules_mut().push(replacement);

    root.include_design(other);
    assert!(root.modules().get("m").unwrap().parameters().get("marker").is_none());
}

#[test]
fn include_design_replaces_when_outranked() {
    // The existing definition ranks [3, 7], the include ranks [2, 9];
    // the include outranks it and replaces the module.
    let mut root = Design::new("root");
    root.set_priority(vec![3]);
    let mut original = Module::new("m");
    original.set_lineno(Some(7));
    root.modules_mut().push(original);

    let mut other = Design::new("inc");
    other.set_priority(vec![2]);
    let mut replacement = Module::new("m");
    replacement.set_lineno(Some(9));
    replacement.parameters_mut().insert("marker", "1");
    other.modules_mut().push(replacement);

    root.include_design(other);
    assert!(root.modules().get("m").unwrap().parameters().get("marker").is_some());
    assert_eq!(root.includes().len(), 1);
}

#[test]
fn trace_net_descends_into_masters() {
    let mut design = buf_design();
    design.rebuild(false).unwrap();
    let route = design.trace_net("buf", "net1", 1).unwrap();
    assert_eq!(route.hits.len(), 2);
    let hit = &route.hits[0];
    assert_eq!(hit.instance, "i0");
    assert_eq!(hit.terminal.as_deref(), Some("out"));
    let inner = hit.inner.as_ref().unwrap();
    assert_eq!(inner.module, "inv");
    assert_eq!(inner.net, "out");
}

#[test]
fn instance_net_associations() {
    let mut design = buf_design();
    design.rebuild(false).unwrap();
    let buf = design.modules().get("buf").unwrap();
    let nets: Vec<_> = buf
        .nets_of_instance("i0")
        .into_iter()
        .map(|n| n.name().as_str())
        .collect();
    assert_eq!(nets, ["in", "net1"]);
    let insts: Vec<_> = buf
        .instances_on_net("net1")
        .into_iter()
        .map(|i| i.name().as_str())
        .collect();
    assert_eq!(insts, ["i0", "i1"]);
}
