use std::path::PathBuf;

use netir::{Connection, Direction, Fig, NetDesc, Reference, Value};

use super::*;

pub const TEST_DATA_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/../../tests/data");

pub const SPICE_RESISTOR: &str = r#"
* a comment line
.subckt my_resistor p n
R1 p n pdk_res r=100 $ trailing comment
.ends
"#;

#[inline]
pub fn test_data(file_name: &str) -> PathBuf {
    PathBuf::from(TEST_DATA_DIR).join(file_name)
}

#[test]
fn spice_resistor_tokens() {
    let tok = Tokenizer::new(SPICE_RESISTOR);
    let toks = tok.into_iter().collect::<Result<Vec<_>, _>>().unwrap();
    assert_eq!(
        toks,
        vec![
            Token::Directive(Substr(".subckt".into())),
            Token::Ident(Substr("my_resistor".into())),
            Token::Ident(Substr("p".into())),
            Token::Ident(Substr("n".into())),
            Token::LineEnd,
            Token::Ident(Substr("R1".into())),
            Token::Ident(Substr("p".into())),
            Token::Ident(Substr("n".into())),
            Token::Ident(Substr("pdk_res".into())),
            Token::Ident(Substr("r".into())),
            Token::Equals,
            Token::Ident(Substr("100".into())),
            Token::LineEnd,
            Token::Directive(Substr(".ends".into())),
            Token::LineEnd,
        ]
    );
}

#[test]
fn pins_and_meta_directive_tokens() {
    let tok = Tokenizer::new(
        "*.PININFO A:I Z:O\nX0 / inv $PINS A=in\n+ Z=out\n",
    );
    let toks = tok.into_iter().collect::<Result<Vec<_>, _>>().unwrap();
    assert_eq!(
        toks,
        vec![
            Token::MetaDirective(Substr("PININFO".into())),
            Token::Ident(Substr("A:I".into())),
            Token::Ident(Substr("Z:O".into())),
            Token::LineEnd,
            Token::Ident(Substr("X0".into())),
            Token::Ident(Substr("/".into())),
            Token::Ident(Substr("inv".into())),
            Token::Ident(Substr("$PINS".into())),
            Token::Ident(Substr("A".into())),
            Token::Equals,
            Token::Ident(Substr("in".into())),
            Token::Ident(Substr("Z".into())),
            Token::Equals,
            Token::Ident(Substr("out".into())),
            Token::LineEnd,
        ]
    );
}

#[test]
fn parse_subckt_with_pininfo_and_params() {
    let design = Parser::parse_str(
        "test",
        r#"
.PARAM corner=tt
.SUBCKT inv in out vdd vss size=1
*.PININFO in:I out:O
*.PININFO vdd:B vss:B
M0 out in vss vss pdk_nmos w=1u
M1 out in vdd vdd pdk_pmos w=2u
.ENDS
"#,
    )
    .unwrap();
    assert_eq!(
        design.parameters().get("corner"),
        Some(&Value::parse("tt"))
    );
    let inv = design.modules().get("inv").unwrap();
    assert_eq!(inv.lineno(), Some(3));
    assert_eq!(inv.parameters().get("size"), Some(&Value::parse("1")));
    assert_eq!(
        inv.terminals()
            .iter()
            .map(|t| (t.name().as_str(), t.direction()))
            .collect::<Vec<_>>(),
        vec![
            ("in", Direction::Input),
            ("out", Direction::Output),
            ("vdd", Direction::InOut),
            ("vss", Direction::InOut),
        ]
    );
    assert_eq!(
        inv.nets().names().map(|n| n.as_str()).collect::<Vec<_>>(),
        ["out", "in", "vss", "vdd"]
    );
    assert_eq!(inv.instances().len(), 2);
    let m0 = inv.instances().get("M0").unwrap();
    assert_eq!(m0.reference(), &Reference::Module("pdk_nmos".into()));
    assert_eq!(m0.parameters().get("w"), Some(&Value::parse("1u")));
}

#[test]
fn pininfo_unknown_terminal_fails() {
    let err = Parser::parse_str(
        "test",
        ".SUBCKT inv in out\n*.PININFO q:I\n.ENDS\n",
    )
    .unwrap_err();
    assert!(matches!(err, ParserError::PinInfo { .. }));
}

#[test]
fn duplicate_subckt_first_wins() {
    let design = Parser::parse_str(
        "test",
        r#"
.SUBCKT inv in out
X0 in out / first
.ENDS
.SUBCKT inv in out
X0 in out / second
.ENDS
"#,
    )
    .unwrap();
    let inv = design.modules().get("inv").unwrap();
    let x0 = inv.instances().get("X0").unwrap();
    assert_eq!(x0.reference(), &Reference::Module("first".into()));
}

#[test]
fn unterminated_subckt_fails() {
    let err = Parser::parse_str("test", ".SUBCKT inv in out\n").unwrap_err();
    assert!(matches!(err, ParserError::UnterminatedSubckt(_)));
}

#[test]
fn unparseable_instance_is_kept_as_unknown() {
    let design = Parser::parse_str(
        "test",
        ".SUBCKT m a b\nZ0 a b zdev\nX0 a b / inv\n.ENDS\n",
    )
    .unwrap();
    let m = design.modules().get("m").unwrap();
    let z0 = m.instances().get("Z0").unwrap();
    assert!(z0.reference().is_unknown());
    assert!(z0.connection().is_empty());
    assert!(!m.instances().get("X0").unwrap().reference().is_unknown());
}

#[test]
fn continuation_lines_join() {
    let design = Parser::parse_str(
        "test",
        ".SUBCKT wide a b c\nX0 a b\n+ c / some_cell\n.ENDS\n",
    )
    .unwrap();
    let x0 = design
        .modules()
        .get("wide")
        .unwrap()
        .instances()
        .get("X0")
        .unwrap();
    assert_eq!(x0.connection().len(), 3);
    assert_eq!(x0.reference(), &Reference::Module("some_cell".into()));
}

#[test]
fn parse_include_hierarchy() {
    let design = crate::from_file(test_data("spice/top.sp"), false).unwrap();
    assert_eq!(design.name(), "top.sp");
    assert_eq!(
        design
            .modules()
            .names()
            .map(|n| n.as_str())
            .collect::<Vec<_>>(),
        ["inv", "buf", "nand2", "dff"]
    );
    // The root's inv outranks the included one.
    let inv = design.modules().get("inv").unwrap();
    assert_eq!(
        inv.instances().get("X0").unwrap().reference(),
        &Reference::Module("primitive_inv".into())
    );
    let priorities: Vec<_> = design
        .includes()
        .iter()
        .map(|record| record.priority.clone())
        .collect();
    assert_eq!(priorities, [vec![7], vec![7, 2]]);
}

#[test]
fn rebuild_after_include_parse() {
    let design = crate::from_file(test_data("spice/top.sp"), true).unwrap();
    let buf = design.modules().get("buf").unwrap();
    let x0 = buf.instances().get("X0").unwrap();
    let map = x0.connection().as_by_name().unwrap();
    assert_eq!(map.get("in"), Some(&NetDesc::Net("in".into())));
    assert_eq!(map.get("out"), Some(&NetDesc::Net("net1".into())));
}

#[test]
fn relative_include_in_string_fails() {
    let err = crate::from_str(".INCLUDE \"lib.sp\"\n", false).unwrap_err();
    assert!(matches!(err, ParserError::UnexpectedRelativePath(_)));
}

#[test]
fn netlist_round_trip() {
    let design = crate::from_file(test_data("spice/top.sp"), true).unwrap();
    let out = crate::netlist::to_spice_string(&design).unwrap();
    let reparsed = crate::from_str(out.as_str(), true).unwrap();
    assert_eq!(
        reparsed
            .modules()
            .names()
            .map(|n| n.as_str())
            .collect::<Vec<_>>(),
        ["inv", "buf", "nand2", "dff"]
    );
    let buf = reparsed.modules().get("buf").unwrap();
    assert_eq!(
        buf.instances().get("X1").unwrap().connection().net_names(),
        [&arcstr::literal!("net1"), &arcstr::literal!("out")]
    );
}

#[test]
fn positional_without_master_is_untouched() {
    let design = crate::from_str(
        ".SUBCKT m a b\nX0 a b / missing_cell\n.ENDS\n",
        true,
    )
    .unwrap();
    let x0 = design
        .modules()
        .get("m")
        .unwrap()
        .instances()
        .get("X0")
        .unwrap();
    assert!(matches!(x0.connection(), Connection::ByOrder(_)));
}
