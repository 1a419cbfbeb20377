//! Component-line parsing.
//!
//! A component line names an instance, its nets, a reference, and
//! parameters. The instance name's leading letter selects the device
//! family: `R`, `C`, `L`, and `D` devices connect two nets, `Q` three,
//! `M` four, and `X` instances reference a subckt. Bare words after a
//! primitive's reference are kept as positional parameters.

use arcstr::ArcStr;
use netir::escape::make_safe;
use netir::{Connection, Instance, Reference, Value};
use thiserror::Error;

use super::Token;

/// An error arising from a malformed component line.
#[derive(Debug, Error)]
pub enum InstanceError {
    /// The line has too few words for its device family.
    #[error("component line for `{name}` has too few words")]
    TooFewWords {
        /// The instance name.
        name: ArcStr,
    },
    /// The instance name starts with an unsupported device letter.
    #[error("unsupported device prefix `{prefix}` on `{name}`")]
    UnsupportedPrefix {
        /// The instance name.
        name: ArcStr,
        /// The leading letter of the name.
        prefix: char,
    },
    /// A `$T=` assignment is missing its three trailing coordinates.
    #[error("`$T=` assignment is missing its coordinate words")]
    TruncatedTransform,
    /// A dangling `=` with no key or no value.
    #[error("malformed assignment near `{near}`")]
    MalformedAssignment {
        /// The closest token text.
        near: ArcStr,
    },
    /// A token that cannot appear on a component line.
    #[error("unexpected token on component line: {0:?}")]
    UnexpectedToken(Token),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Item {
    Word(ArcStr),
    Assign(ArcStr, ArcStr),
    Pins,
    Slash,
    Designate(ArcStr),
}

/// Converts the raw token buffer into component-line items.
///
/// `$T=v` assignments absorb the three words that follow them; the stored
/// value is all four words joined by spaces.
fn itemize(buffer: &[Token]) -> Result<Vec<Item>, InstanceError> {
    let mut items = Vec::with_capacity(buffer.len());
    let mut i = 0;
    while i < buffer.len() {
        let word = match &buffer[i] {
            Token::Ident(word) => word,
            tok => return Err(InstanceError::UnexpectedToken(tok.clone())),
        };
        if matches!(buffer.get(i + 1), Some(Token::Equals)) {
            let Some(Token::Ident(value)) = buffer.get(i + 2) else {
                return Err(InstanceError::MalformedAssignment {
                    near: ArcStr::from(word.as_str()),
                });
            };
            i += 3;
            if word.eq_ignore_ascii_case("$T") {
                let mut value = value.to_string();
                for _ in 0..3 {
                    let Some(Token::Ident(coord)) = buffer.get(i) else {
                        return Err(InstanceError::TruncatedTransform);
                    };
                    value.push(' ');
                    value.push_str(coord);
                    i += 1;
                }
                items.push(Item::Assign(ArcStr::from(word.as_str()), ArcStr::from(value)));
            } else {
                items.push(Item::Assign(
                    ArcStr::from(word.as_str()),
                    ArcStr::from(value.as_str()),
                ));
            }
            continue;
        }
        if word.as_str() == "/" {
            items.push(Item::Slash);
        } else if word.eq_ignore_ascii_case("$PINS") {
            items.push(Item::Pins);
        } else if let Some(designated) = word
            .as_str()
            .strip_prefix("$[")
            .and_then(|w| w.strip_suffix(']'))
        {
            items.push(Item::Designate(ArcStr::from(designated)));
        } else {
            items.push(Item::Word(ArcStr::from(word.as_str())));
        }
        i += 1;
    }
    Ok(items)
}

/// Parses a buffered component line into an [`Instance`].
pub(super) fn parse_instance(buffer: &[Token]) -> Result<Instance, InstanceError> {
    let items = itemize(buffer)?;
    let Some(Item::Word(name)) = items.first() else {
        return Err(InstanceError::UnexpectedToken(
            buffer.first().cloned().unwrap_or(Token::LineEnd),
        ));
    };
    let name = name.clone();
    let prefix = name
        .chars()
        .next()
        .map(|c| c.to_ascii_uppercase())
        .unwrap_or_default();

    if items.iter().any(|item| matches!(item, Item::Pins)) {
        if prefix != 'X' {
            return Err(InstanceError::UnsupportedPrefix { name, prefix });
        }
        return parse_pins(name, &items);
    }

    match prefix {
        'X' => parse_subckt(name, &items),
        'R' | 'C' | 'L' | 'D' => parse_primitive(name, &items, 2),
        'Q' => parse_primitive(name, &items, 3),
        'M' => parse_primitive(name, &items, 4),
        prefix => Err(InstanceError::UnsupportedPrefix { name, prefix }),
    }
}

/// `X0 [/] ref [k=v ...] $PINS [term=net ...]`
fn parse_pins(name: ArcStr, items: &[Item]) -> Result<Instance, InstanceError> {
    let pins = items
        .iter()
        .position(|item| matches!(item, Item::Pins))
        .unwrap_or(items.len());
    let reference = items[..pins]
        .iter()
        .rev()
        .find_map(|item| match item {
            Item::Word(word) => Some(word.clone()),
            _ => None,
        })
        .filter(|word| word != &name)
        .ok_or_else(|| InstanceError::TooFewWords { name: name.clone() })?;

    let mut instance = Instance::new(name, Reference::Module(reference));
    for item in &items[1..pins] {
        if let Item::Assign(k, v) = item {
            instance.parameters_mut().insert(k.clone(), Value::parse(v));
        }
    }
    instance.set_connection(Connection::by_name(items[pins..].iter().filter_map(
        |item| match item {
            Item::Assign(term, net) => Some((term.clone(), Some(make_safe(net)))),
            _ => None,
        },
    )));
    Ok(instance)
}

/// `X0 net1 ... netN [/] ref [k=v ...]`
fn parse_subckt(name: ArcStr, items: &[Item]) -> Result<Instance, InstanceError> {
    if let Some(designate) = items.iter().find_map(|item| match item {
        Item::Designate(d) => Some(d.clone()),
        _ => None,
    }) {
        // X-device designate lines connect every bare word.
        let mut instance = Instance::new(name, Reference::Designate(designate));
        let nets: Vec<_> = items[1..]
            .iter()
            .filter_map(|item| match item {
                Item::Word(word) => Some(Some(make_safe(word))),
                _ => None,
            })
            .collect();
        instance.set_connection(Connection::ByOrder(nets));
        collect_params(&mut instance, &items[1..]);
        return Ok(instance);
    }

    let mut words: Vec<&ArcStr> = items[1..]
        .iter()
        .filter_map(|item| match item {
            Item::Word(word) => Some(word),
            _ => None,
        })
        .collect();
    let reference = words
        .pop()
        .ok_or_else(|| InstanceError::TooFewWords { name: name.clone() })?
        .clone();
    let mut instance = Instance::new(name, Reference::Module(reference));
    instance.set_connection(Connection::ByOrder(
        words.into_iter().map(|net| Some(make_safe(net))).collect(),
    ));
    collect_params(&mut instance, &items[1..]);
    Ok(instance)
}

/// `R0 net1 net2 [ref] [orderparams ...] [$[ref]] [k=v ...]`
fn parse_primitive(
    name: ArcStr,
    items: &[Item],
    nterm: usize,
) -> Result<Instance, InstanceError> {
    let designate = items.iter().find_map(|item| match item {
        Item::Designate(d) => Some(d.clone()),
        _ => None,
    });
    let mut words = items[1..].iter().filter_map(|item| match item {
        Item::Word(word) => Some(word),
        _ => None,
    });

    let mut nets = Vec::with_capacity(nterm);
    for _ in 0..nterm {
        let net = words
            .next()
            .ok_or_else(|| InstanceError::TooFewWords { name: name.clone() })?;
        nets.push(Some(make_safe(net)));
    }
    let reference = match designate {
        Some(designate) => Reference::Designate(designate),
        None => Reference::Module(
            words
                .next()
                .ok_or_else(|| InstanceError::TooFewWords { name: name.clone() })?
                .clone(),
        ),
    };

    let mut instance = Instance::new(name, reference);
    instance.set_connection(Connection::ByOrder(nets));
    *instance.orderparams_mut() = words.cloned().collect();
    collect_params(&mut instance, &items[1..]);
    Ok(instance)
}

fn collect_params(instance: &mut Instance, items: &[Item]) {
    for item in items {
        if let Item::Assign(k, v) = item {
            instance.parameters_mut().insert(k.clone(), Value::parse(v));
        }
    }
}

/// Wraps an unparseable line in an [`Instance`] with an unknown reference
/// so the netlist writer can reproduce it verbatim.
pub(super) fn unknown_instance(buffer: &[Token], err: &InstanceError) -> Instance {
    let mut raw = String::new();
    for token in buffer {
        match token {
            Token::Ident(word) | Token::Directive(word) | Token::MetaDirective(word) => {
                if !raw.is_empty() && !raw.ends_with('=') {
                    raw.push(' ');
                }
                raw.push_str(word);
            }
            Token::Equals => raw.push('='),
            Token::LineEnd => {}
        }
    }
    let name = match buffer.first() {
        Some(Token::Ident(word)) => ArcStr::from(word.as_str()),
        _ => arcstr::literal!("unknown"),
    };
    Instance::new(
        name,
        Reference::Unknown {
            raw: ArcStr::from(raw),
            reason: ArcStr::from(err.to_string()),
        },
    )
}

#[cfg(test)]
mod tests {
    use netir::{Fig, NetDesc};

    use super::*;
    use crate::parser::Tokenizer;

    fn parse(line: &str) -> Instance {
        let tok = Tokenizer::new(line);
        let buffer: Vec<Token> = tok
            .into_iter()
            .map(|t| t.unwrap())
            .filter(|t| *t != Token::LineEnd)
            .collect();
        parse_instance(&buffer).unwrap()
    }

    fn by_order(instance: &Instance) -> Vec<&str> {
        match instance.connection() {
            Connection::ByOrder(nets) => {
                nets.iter().map(|n| n.as_deref().unwrap()).collect()
            }
            other => panic!("expected by-order connection, got {other:?}"),
        }
    }

    #[test]
    fn subckt_positional() {
        let inst = parse("X0 net1 net2 net3 net4 nch m=1 length=4u width=10u");
        assert_eq!(inst.name(), "X0");
        assert_eq!(inst.reference(), &Reference::Module("nch".into()));
        assert_eq!(by_order(&inst), ["net1", "net2", "net3", "net4"]);
        assert_eq!(inst.parameters().get("m"), Some(&Value::parse("1")));
        assert_eq!(inst.parameters().get("width"), Some(&Value::parse("10u")));
    }

    #[test]
    fn subckt_positional_with_slash() {
        let inst = parse("X0 net1 net2 net3 net4 / nch");
        assert_eq!(inst.reference(), &Reference::Module("nch".into()));
        assert_eq!(by_order(&inst), ["net1", "net2", "net3", "net4"]);
        assert!(inst.parameters().is_empty());
    }

    #[test]
    fn subckt_pins() {
        let inst =
            parse("X0 nch m=1 length=4u $PINS pin1=net1 pin2=net2 pin3=net3 pin4=net4");
        assert_eq!(inst.reference(), &Reference::Module("nch".into()));
        let map = inst.connection().as_by_name().unwrap();
        assert_eq!(map.len(), 4);
        assert_eq!(map.get("pin1"), Some(&NetDesc::Net("net1".into())));
        assert_eq!(map.get("pin4"), Some(&NetDesc::Net("net4".into())));
        assert_eq!(inst.parameters().get("m"), Some(&Value::parse("1")));
    }

    #[test]
    fn subckt_pins_with_slash() {
        let inst = parse("X0 / nch $PINS pin1=net1 pin2=net2");
        assert_eq!(inst.reference(), &Reference::Module("nch".into()));
        let map = inst.connection().as_by_name().unwrap();
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn subckt_pins_all_floating() {
        let inst = parse("X0 / nch $PINS");
        assert_eq!(inst.reference(), &Reference::Module("nch".into()));
        assert!(inst.connection().is_empty());
    }

    #[test]
    fn resistor_with_orderparams() {
        let inst = parse("R0 net1 net2 pdk_res 1.2K length=10u width=1u");
        assert_eq!(inst.reference(), &Reference::Module("pdk_res".into()));
        assert_eq!(by_order(&inst), ["net1", "net2"]);
        assert_eq!(inst.orderparams(), ["1.2K"]);
        assert_eq!(inst.parameters().get("length"), Some(&Value::parse("10u")));
    }

    #[test]
    fn resistor_designate() {
        let inst = parse("R0 net1 net2 1.2K $[pdk_res] length=10u width=1u");
        assert_eq!(inst.reference(), &Reference::Designate("pdk_res".into()));
        assert_eq!(by_order(&inst), ["net1", "net2"]);
        assert_eq!(inst.orderparams(), ["1.2K"]);
    }

    #[test]
    fn bjt_three_terminals() {
        let inst = parse("Q0 net1 net2 net3 pdk_pnp 25 length=5u width=5u");
        assert_eq!(by_order(&inst), ["net1", "net2", "net3"]);
        assert_eq!(inst.orderparams(), ["25"]);
    }

    #[test]
    fn mosfet_designate() {
        let inst = parse("M0 net1 net2 net3 net4 $[pdk_mos] length=1u width=2u");
        assert_eq!(inst.reference(), &Reference::Designate("pdk_mos".into()));
        assert_eq!(by_order(&inst), ["net1", "net2", "net3", "net4"]);
        assert!(inst.orderparams().is_empty());
    }

    #[test]
    fn transform_assignment_absorbs_coordinates() {
        let inst = parse("C0 net1 net2 1.2 $T=0 0 0 0 $[cap] $X=1 $Y=2");
        assert_eq!(inst.reference(), &Reference::Designate("cap".into()));
        assert_eq!(by_order(&inst), ["net1", "net2"]);
        assert_eq!(inst.orderparams(), ["1.2"]);
        assert_eq!(inst.parameters().get("$T"), Some(&Value::parse("0 0 0 0")));
        assert_eq!(inst.parameters().get("$X"), Some(&Value::parse("1")));
    }

    #[test]
    fn odd_net_names_are_escaped() {
        let inst = parse("X0 a.b net2 / buf");
        assert_eq!(by_order(&inst), ["\\a.b", "net2"]);
    }

    #[test]
    fn diode_two_terminals() {
        let inst = parse("D0 anode cathode pdk_diode area=2");
        assert_eq!(inst.reference(), &Reference::Module("pdk_diode".into()));
        assert_eq!(by_order(&inst), ["anode", "cathode"]);
        assert_eq!(inst.parameters().get("area"), Some(&Value::parse("2")));
    }

    #[test]
    fn unsupported_prefix_is_an_error() {
        let tok = Tokenizer::new("Z0 net1 net2 zdev");
        let buffer: Vec<Token> = tok
            .into_iter()
            .map(|t| t.unwrap())
            .filter(|t| *t != Token::LineEnd)
            .collect();
        let err = parse_instance(&buffer).unwrap_err();
        assert!(matches!(err, InstanceError::UnsupportedPrefix { .. }));
        let unknown = unknown_instance(&buffer, &err);
        assert!(unknown.reference().is_unknown());
        assert_eq!(unknown.name(), "Z0");
    }
}
