//! SPICE netlist writing.

use std::io::Write;

use arcstr::ArcStr;
use netir::{Connection, Design, Direction, Fig, Module, NetDesc, Reference};
use thiserror::Error;

/// Default output width limit, in characters.
pub const DEFAULT_WIDTH_LIMIT: usize = 88;

/// An error arising while writing a netlist.
#[derive(Debug, Error)]
pub enum NetlistError {
    /// An I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// A positional connection with a floating (unconnected) position.
    ///
    /// SPICE has no placeholder for a skipped positional net.
    #[error("instance `{instance}` has a floating positional connection")]
    FloatingPosition {
        /// The offending instance.
        instance: ArcStr,
    },
    /// A by-name connection still carrying an unexpanded net group.
    ///
    /// Rebuilding a design expands groups onto bus bit terminals.
    #[error("instance `{instance}` connects terminal `{terminal}` to an unexpanded net group")]
    GroupConnection {
        /// The offending instance.
        instance: ArcStr,
        /// The terminal connected to a group.
        terminal: ArcStr,
    },
}

/// Writes a [`Design`] as a SPICE netlist.
pub struct Netlister<'a, W: Write> {
    design: &'a Design,
    out: &'a mut W,
    width_limit: usize,
}

impl<'a, W: Write> Netlister<'a, W> {
    /// Creates a netlister writing `design` to `out`.
    pub fn new(design: &'a Design, out: &'a mut W) -> Self {
        Self {
            design,
            out,
            width_limit: DEFAULT_WIDTH_LIMIT,
        }
    }

    /// Overrides the output width limit.
    pub fn with_width_limit(mut self, width_limit: usize) -> Self {
        self.width_limit = width_limit;
        self
    }

    /// Writes the full netlist.
    pub fn export(mut self) -> Result<(), NetlistError> {
        for (i, module) in self.design.modules().iter().enumerate() {
            if i > 0 {
                writeln!(self.out)?;
                writeln!(self.out)?;
            }
            self.write_module(module)?;
        }
        Ok(())
    }

    fn write_module(&mut self, module: &Module) -> Result<(), NetlistError> {
        let mut head = vec![".SUBCKT".to_string(), module.name().to_string()];
        head.extend(module.terminals().iter().map(|t| t.name().to_string()));
        self.write_wrapped(&head, "", "+ ")?;

        let pin_pairs: Vec<String> = module
            .terminals()
            .iter()
            .map(|t| {
                let dir = match t.direction() {
                    Direction::Input => "I",
                    Direction::Output => "O",
                    Direction::InOut => "B",
                };
                format!("{}:{}", t.name(), dir)
            })
            .collect();
        if !pin_pairs.is_empty() {
            self.write_wrapped(&pin_pairs, "*.PININFO ", "*.PININFO ")?;
        }

        for instance in module.instances() {
            self.write_instance(instance)?;
        }
        writeln!(self.out, ".ENDS")?;
        Ok(())
    }

    fn write_instance(&mut self, instance: &netir::Instance) -> Result<(), NetlistError> {
        let mut tokens = vec![instance.name().to_string()];
        match instance.reference() {
            Reference::Unknown { raw, .. } => {
                // Reproduce the unparsed source line verbatim.
                writeln!(self.out, "{raw}")?;
                return Ok(());
            }
            Reference::Designate(name) => {
                match instance.connection() {
                    Connection::ByName(map) => {
                        for desc in map.values() {
                            for net in desc.nets() {
                                tokens.push(net.to_string());
                            }
                        }
                    }
                    Connection::ByOrder(nets) => {
                        self.push_positional(instance, nets, &mut tokens)?;
                    }
                }
                tokens.push(format!("$[{name}]"));
            }
            Reference::Module(name) => match instance.connection() {
                Connection::ByName(map) => {
                    tokens.push("/".to_string());
                    tokens.push(name.to_string());
                    tokens.push("$PINS".to_string());
                    for (term, desc) in map {
                        match desc {
                            NetDesc::Net(net) => tokens.push(format!("{term}={net}")),
                            NetDesc::Group(_) => {
                                return Err(NetlistError::GroupConnection {
                                    instance: instance.name().clone(),
                                    terminal: term.clone(),
                                })
                            }
                        }
                    }
                }
                Connection::ByOrder(nets) => {
                    self.push_positional(instance, nets, &mut tokens)?;
                    tokens.push("/".to_string());
                    tokens.push(name.to_string());
                }
            },
        }
        self.write_wrapped(&tokens, "", "+ ")?;
        Ok(())
    }

    fn push_positional(
        &self,
        instance: &netir::Instance,
        nets: &[Option<ArcStr>],
        tokens: &mut Vec<String>,
    ) -> Result<(), NetlistError> {
        for net in nets {
            let net = net.as_ref().ok_or_else(|| NetlistError::FloatingPosition {
                instance: instance.name().clone(),
            })?;
            tokens.push(net.to_string());
        }
        Ok(())
    }

    /// Writes `tokens` as space-joined lines no wider than the limit,
    /// prefixing continuation lines with `subsequent`.
    fn write_wrapped<S: AsRef<str>>(
        &mut self,
        tokens: &[S],
        initial: &str,
        subsequent: &str,
    ) -> Result<(), NetlistError> {
        let mut line = String::from(initial);
        let mut first_on_line = true;
        let mut wrote_any = false;
        for token in tokens {
            let token = token.as_ref();
            let sep = if first_on_line { 0 } else { 1 };
            if !first_on_line && line.len() + sep + token.len() > self.width_limit {
                writeln!(self.out, "{line}")?;
                wrote_any = true;
                line = String::from(subsequent);
                line.push_str(token);
            } else {
                if !first_on_line {
                    line.push(' ');
                }
                line.push_str(token);
                first_on_line = false;
            }
        }
        if !line.is_empty() || !wrote_any {
            writeln!(self.out, "{line}")?;
        }
        Ok(())
    }
}

/// Writes `design` as a SPICE netlist string.
pub fn to_spice_string(design: &Design) -> Result<String, NetlistError> {
    let mut buf = Vec::new();
    Netlister::new(design, &mut buf).export()?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;
    use netir::{Instance, Net, Terminal};

    use super::*;

    fn inv_design() -> Design {
        let mut design = Design::new("top.sp");
        let mut inv = Module::new("inv");
        inv.terminals_mut()
            .push(Terminal::new("in", Direction::Input));
        inv.terminals_mut()
            .push(Terminal::new("out", Direction::Output));
        design.modules_mut().push(inv);

        let mut buf = Module::new("buf");
        buf.terminals_mut()
            .push(Terminal::new("in", Direction::Input));
        buf.terminals_mut()
            .push(Terminal::new("out", Direction::Output));
        for net in ["in", "net1", "out"] {
            buf.nets_mut().push(Net::new(net));
        }
        let mut x0 = Instance::new("X0", Reference::Module("inv".into()));
        let mut conn = IndexMap::new();
        conn.insert("in".into(), NetDesc::Net("in".into()));
        conn.insert("out".into(), NetDesc::Net("net1".into()));
        x0.set_connection(Connection::ByName(conn));
        buf.instances_mut().push(x0);
        let mut x1 = Instance::new("X1", Reference::Module("inv".into()));
        x1.set_connection(Connection::ByOrder(vec![
            Some("net1".into()),
            Some("out".into()),
        ]));
        buf.instances_mut().push(x1);
        design.modules_mut().push(buf);
        design
    }

    #[test]
    fn writes_subckts_with_pininfo() {
        let out = to_spice_string(&inv_design()).unwrap();
        let expected = "\
.SUBCKT inv in out
*.PININFO in:I out:O
.ENDS


.SUBCKT buf in out
*.PININFO in:I out:O
X0 / inv $PINS in=in out=net1
X1 net1 out / inv
.ENDS
";
        assert_eq!(out, expected);
    }

    #[test]
    fn wraps_long_headers() {
        let mut design = Design::new("wide.sp");
        let mut module = Module::new("wide");
        for i in 0..40 {
            module
                .terminals_mut()
                .push(Terminal::new(format!("term{i}"), Direction::InOut));
        }
        design.modules_mut().push(module);
        let out = to_spice_string(&design).unwrap();
        for line in out.lines() {
            assert!(line.len() <= DEFAULT_WIDTH_LIMIT, "line too long: {line}");
        }
        assert!(out.contains("\n+ term"));
        assert!(out.contains("\n*.PININFO term"));
    }

    #[test]
    fn designate_instances_keep_their_marker() {
        let mut design = Design::new("res.sp");
        let mut module = Module::new("divider");
        let mut r0 = Instance::new("R0", Reference::Designate("pdk_res".into()));
        r0.set_connection(Connection::ByOrder(vec![
            Some("a".into()),
            Some("b".into()),
        ]));
        module.instances_mut().push(r0);
        design.modules_mut().push(module);
        let out = to_spice_string(&design).unwrap();
        assert!(out.contains("R0 a b $[pdk_res]"));
    }

    #[test]
    fn floating_position_is_an_error() {
        let mut design = Design::new("bad.sp");
        let mut module = Module::new("m");
        let mut x0 = Instance::new("X0", Reference::Module("inv".into()));
        x0.set_connection(Connection::ByOrder(vec![Some("a".into()), None]));
        module.instances_mut().push(x0);
        design.modules_mut().push(module);
        let err = to_spice_string(&design).unwrap_err();
        assert!(matches!(err, NetlistError::FloatingPosition { .. }));
    }

    #[test]
    fn unknown_instances_are_written_verbatim() {
        let mut design = Design::new("u.sp");
        let mut module = Module::new("m");
        module.instances_mut().push(Instance::new(
            "Z0",
            Reference::Unknown {
                raw: "Z0 net1 net2 zdev".into(),
                reason: "unsupported device prefix `Z` on `Z0`".into(),
            },
        ));
        design.modules_mut().push(module);
        let out = to_spice_string(&design).unwrap();
        assert!(out.contains("\nZ0 net1 net2 zdev\n"));
    }
}
