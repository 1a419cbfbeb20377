//! Structural-Verilog parser.
//!
//! Only the structural subset is understood: module heads (with optional
//! inline port directions and ranges), direction and wire declarations,
//! specify blocks, and instantiations. Behavioral constructs fail the
//! parse.

use std::path::PathBuf;

use arcstr::ArcStr;
use indexmap::IndexMap;
use netir::member::expand_range;
use netir::{
    Connection, Design, Direction, Fig, Instance, Module, Net, NetDesc, Reference, Terminal,
    Value,
};
use thiserror::Error;

use crate::lexer::{tokenize, Keyword, LexerError, Token, TokenKind};

/// An error arising from parsing a Verilog netlist.
#[derive(Debug, Error)]
pub enum ParserError {
    /// A tokenizer error.
    #[error(transparent)]
    Lexer(#[from] LexerError),
    /// The input ended mid-construct.
    #[error("unexpected end of input")]
    UnexpectedEof,
    /// An unexpected token.
    #[error("unexpected token `{found}` at line {line}; expected {expected}")]
    UnexpectedToken {
        /// The 1-based source line.
        line: usize,
        /// The offending token text.
        found: String,
        /// What the parser was looking for.
        expected: &'static str,
    },
    /// A direction declaration for a port the module head does not list.
    #[error("module `{module}` declares a direction for undefined port `{port}`")]
    UndefinedPort {
        /// The module being parsed.
        module: ArcStr,
        /// The undeclared port.
        port: ArcStr,
    },
    /// Two declarations give one port different directions.
    #[error("conflicting directions for port `{port}` of module `{module}`")]
    ConflictingDirection {
        /// The module being parsed.
        module: ArcStr,
        /// The conflicted port.
        port: ArcStr,
    },
    /// A head port with no direction declaration anywhere in the module.
    #[error("no direction declared for port `{port}` of module `{module}`")]
    UndeclaredDirection {
        /// The module being parsed.
        module: ArcStr,
        /// The directionless port.
        port: ArcStr,
    },
    /// A relative include path was used where it cannot be resolved.
    #[error("unexpected relative include path: {0:?}")]
    UnexpectedRelativePath(PathBuf),
    /// An include cycle.
    #[error("circular include of {0:?}")]
    CircularInclude(PathBuf),
    /// Error trying to read the given file.
    #[error("failed to read file at path `{path:?}`: {err:?}")]
    FailedToRead {
        /// The path we attempted to read.
        path: PathBuf,
        /// The underlying error.
        #[source]
        err: std::io::Error,
    },
    /// A connection rebuild failure after parsing.
    #[error(transparent)]
    Rebuild(#[from] netir::rebuild::RebuildError),
}

/// Parses Verilog netlists into a [`Design`].
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    /// Parses a single Verilog source unit.
    ///
    /// `` `include `` directives are ignored here; use [`crate::from_file`]
    /// to parse a full include hierarchy.
    pub fn parse_str(name: impl Into<ArcStr>, data: &str) -> Result<Design, ParserError> {
        let mut parser = Self {
            tokens: tokenize(data)?,
            pos: 0,
        };
        let mut design = Design::new(name);
        while parser.pos < parser.tokens.len() {
            let module = parser.parse_module()?;
            if design.modules().contains(module.name()) {
                // First definition wins.
                tracing::warn!(
                    module = %module.name(),
                    "ignoring duplicate module definition"
                );
            } else {
                design.modules_mut().push(module);
            }
        }
        Ok(design)
    }

    pub(crate) fn parse_unit(
        name: impl Into<ArcStr>,
        data: &str,
        priority: Vec<usize>,
        path: Option<PathBuf>,
    ) -> Result<Design, ParserError> {
        let mut design = Self::parse_str(name, data)?;
        design.set_priority(priority);
        design.set_path(path);
        Ok(design)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Result<&Token, ParserError> {
        let token = self.tokens.get(self.pos).ok_or(ParserError::UnexpectedEof)?;
        self.pos += 1;
        Ok(token)
    }

    fn unexpected(token: &Token, expected: &'static str) -> ParserError {
        ParserError::UnexpectedToken {
            line: token.line,
            found: token.kind.to_string(),
            expected,
        }
    }

    fn expect_punct(&mut self, c: char) -> Result<(), ParserError> {
        let token = self.next()?;
        if token.kind == TokenKind::Punct(c) {
            Ok(())
        } else {
            Err(Self::unexpected(token, punct_name(c)))
        }
    }

    fn expect_keyword(&mut self, kw: Keyword) -> Result<(), ParserError> {
        let token = self.next()?;
        if token.kind == TokenKind::Keyword(kw) {
            Ok(())
        } else {
            Err(Self::unexpected(token, "keyword"))
        }
    }

    fn take_punct(&mut self, c: char) -> bool {
        if matches!(self.peek(), Some(token) if token.kind == TokenKind::Punct(c)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_ident(&mut self) -> Result<ArcStr, ParserError> {
        let token = self.next()?;
        match &token.kind {
            TokenKind::Ident(name) | TokenKind::Escaped(name) => Ok(name.clone()),
            _ => Err(Self::unexpected(token, "an identifier")),
        }
    }

    fn expect_index(&mut self) -> Result<usize, ParserError> {
        let token = self.next()?;
        if let TokenKind::Number(raw) = &token.kind {
            if let Ok(index) = raw.parse::<usize>() {
                return Ok(index);
            }
        }
        Err(Self::unexpected(token, "a bit index"))
    }

    /// Skips a balanced `( ... )` block.
    fn skip_parenthesized(&mut self) -> Result<(), ParserError> {
        self.expect_punct('(')?;
        let mut depth = 1usize;
        while depth > 0 {
            let token = self.next()?;
            match token.kind {
                TokenKind::Punct('(') => depth += 1,
                TokenKind::Punct(')') => depth -= 1,
                _ => {}
            }
        }
        Ok(())
    }

    /// `[first:second]`, after the opening bracket has been consumed.
    fn parse_range(&mut self) -> Result<(usize, usize), ParserError> {
        let first = self.expect_index()?;
        self.expect_punct(':')?;
        let second = self.expect_index()?;
        self.expect_punct(']')?;
        Ok((first, second))
    }

    fn parse_module(&mut self) -> Result<Module, ParserError> {
        let line = self.peek().map(|t| t.line);
        self.expect_keyword(Keyword::Module)?;
        let name = self.expect_ident()?;
        let mut module = Module::new(name);
        module.set_lineno(line);

        // A module parameter list is informational only.
        if self.take_punct('#') {
            self.skip_parenthesized()?;
        }

        // Head port list, in declaration order. Each port maps to the bit
        // members later filled in by direction declarations.
        let mut port_order: IndexMap<ArcStr, Vec<ArcStr>> = IndexMap::new();
        let mut port_dir: IndexMap<ArcStr, Direction> = IndexMap::new();

        if self.take_punct('(') {
            if !self.take_punct(')') {
                loop {
                    self.parse_head_port(&mut module, &mut port_order, &mut port_dir)?;
                    if self.take_punct(',') {
                        continue;
                    }
                    self.expect_punct(')')?;
                    break;
                }
            }
        }
        self.expect_punct(';')?;

        loop {
            let token = self.next()?;
            match token.kind.clone() {
                TokenKind::Keyword(Keyword::EndModule) => break,
                TokenKind::Keyword(Keyword::Wire) => {
                    for net in self.parse_decl_names()? {
                        push_net(&mut module, net);
                    }
                }
                TokenKind::Keyword(kw @ (Keyword::Input | Keyword::Output | Keyword::Inout)) => {
                    let direction = keyword_direction(kw);
                    for member in self.parse_decl_names()? {
                        declare_port(
                            &mut module,
                            &mut port_order,
                            &mut port_dir,
                            member,
                            direction,
                        )?;
                    }
                }
                TokenKind::Keyword(Keyword::Specify) => self.parse_specify(&mut module)?,
                TokenKind::Ident(_) | TokenKind::Escaped(_) => {
                    self.pos -= 1;
                    let instance = self.parse_instance()?;
                    module.instances_mut().push(instance);
                }
                _ => return Err(Self::unexpected(token, "a module item")),
            }
        }

        build_terminals(&mut module, port_order, port_dir)?;
        Ok(module)
    }

    /// One entry of the head port list: `[direction] [range] name`.
    fn parse_head_port(
        &mut self,
        module: &mut Module,
        port_order: &mut IndexMap<ArcStr, Vec<ArcStr>>,
        port_dir: &mut IndexMap<ArcStr, Direction>,
    ) -> Result<(), ParserError> {
        let direction = match self.peek().map(|t| &t.kind) {
            Some(TokenKind::Keyword(kw @ (Keyword::Input | Keyword::Output | Keyword::Inout))) => {
                let kw = *kw;
                self.pos += 1;
                Some(keyword_direction(kw))
            }
            _ => None,
        };
        let range = if self.take_punct('[') {
            Some(self.parse_range()?)
        } else {
            None
        };
        let name = self.expect_ident()?;
        match direction {
            Some(direction) => {
                let members = match range {
                    Some((first, second)) => expand_range(&name, '[', first, second),
                    None => vec![name.clone()],
                };
                for member in members {
                    declare_port(module, port_order, port_dir, member, direction)?;
                }
            }
            None => {
                port_order.entry(name).or_default();
            }
        }
        Ok(())
    }

    /// The names of a direction or wire declaration, after its keyword.
    ///
    /// Either `[a:b] name ;` or `name1, name2, ... ;`.
    fn parse_decl_names(&mut self) -> Result<Vec<ArcStr>, ParserError> {
        if self.take_punct('[') {
            let (first, second) = self.parse_range()?;
            let name = self.expect_ident()?;
            self.expect_punct(';')?;
            Ok(expand_range(&name, '[', first, second))
        } else {
            let mut names = vec![self.expect_ident()?];
            while self.take_punct(',') {
                names.push(self.expect_ident()?);
            }
            self.expect_punct(';')?;
            Ok(names)
        }
    }

    /// `specify specparam k = scalar ; ... endspecify`, after `specify`.
    fn parse_specify(&mut self, module: &mut Module) -> Result<(), ParserError> {
        loop {
            let token = self.next()?;
            match &token.kind {
                TokenKind::Keyword(Keyword::EndSpecify) => return Ok(()),
                TokenKind::Keyword(Keyword::Specparam) => {
                    let key = self.expect_ident()?;
                    self.expect_punct('=')?;
                    let token = self.next()?;
                    let value = match &token.kind {
                        TokenKind::Number(raw) => Value::parse(raw),
                        TokenKind::Str(s) => Value::String(s.clone()),
                        _ => return Err(Self::unexpected(token, "a specparam value")),
                    };
                    self.expect_punct(';')?;
                    module.specparams_mut().insert(key, value);
                }
                _ => return Err(Self::unexpected(token, "specparam or endspecify")),
            }
        }
    }

    /// `ref [#(...)] name ( connection ) ;`
    fn parse_instance(&mut self) -> Result<Instance, ParserError> {
        let reference = self.expect_ident()?;
        let mut parameters = Vec::new();
        if self.take_punct('#') {
            parameters = self.parse_parameter_info()?;
        }
        let name = self.expect_ident()?;
        let mut instance = Instance::new(name, Reference::Module(reference));
        for (k, v) in parameters {
            instance.parameters_mut().insert(k, v);
        }
        self.expect_punct('(')?;
        if self.take_punct(')') {
            self.expect_punct(';')?;
            return Ok(instance);
        }

        if matches!(self.peek(), Some(token) if token.kind == TokenKind::Punct('.')) {
            let mut pairs: Vec<(ArcStr, Option<NetDesc>)> = Vec::new();
            loop {
                self.expect_punct('.')?;
                let terminal = self.expect_ident()?;
                self.expect_punct('(')?;
                let desc = if self.take_punct(')') {
                    None
                } else {
                    let nets = self.parse_net_description()?;
                    self.expect_punct(')')?;
                    Some(match <[ArcStr; 1]>::try_from(nets) {
                        Ok([net]) => NetDesc::Net(net),
                        Err(nets) => NetDesc::Group(nets),
                    })
                };
                pairs.push((terminal, desc));
                if self.take_punct(',') {
                    continue;
                }
                break;
            }
            instance.set_connection(Connection::by_name(pairs));
        } else {
            // Positional entries flatten onto bit-level terminal positions.
            let mut nets = Vec::new();
            loop {
                for net in self.parse_net_description()? {
                    nets.push(Some(net));
                }
                if self.take_punct(',') {
                    continue;
                }
                break;
            }
            instance.set_connection(Connection::ByOrder(nets));
        }
        self.expect_punct(')')?;
        self.expect_punct(';')?;
        Ok(instance)
    }

    /// `#( .k(v), ... )` or `#( )`, after `#`.
    fn parse_parameter_info(&mut self) -> Result<Vec<(ArcStr, Value)>, ParserError> {
        self.expect_punct('(')?;
        let mut parameters = Vec::new();
        if self.take_punct(')') {
            return Ok(parameters);
        }
        loop {
            self.expect_punct('.')?;
            let key = self.expect_ident()?;
            self.expect_punct('(')?;
            let token = self.next()?;
            let value = match &token.kind {
                TokenKind::Number(raw) => Value::parse(raw),
                TokenKind::Str(s) => Value::String(s.clone()),
                TokenKind::Ident(s) | TokenKind::Escaped(s) => Value::String(s.clone()),
                _ => return Err(Self::unexpected(token, "a parameter value")),
            };
            self.expect_punct(')')?;
            parameters.push((key, value));
            if self.take_punct(',') {
                continue;
            }
            self.expect_punct(')')?;
            return Ok(parameters);
        }
    }

    /// A net, a bit select, a range select, or a `{...}` concatenation,
    /// flattened to scalar net names.
    fn parse_net_description(&mut self) -> Result<Vec<ArcStr>, ParserError> {
        if self.take_punct('{') {
            let mut nets = Vec::new();
            loop {
                nets.extend(self.parse_net_description()?);
                if self.take_punct(',') {
                    continue;
                }
                self.expect_punct('}')?;
                return Ok(nets);
            }
        }
        let token = self.next()?;
        let name = match &token.kind {
            TokenKind::Escaped(name) => return Ok(vec![name.clone()]),
            TokenKind::Ident(name) => name.clone(),
            _ => return Err(Self::unexpected(token, "a net")),
        };
        if self.take_punct('[') {
            let first = self.expect_index()?;
            if self.take_punct(':') {
                let second = self.expect_index()?;
                self.expect_punct(']')?;
                Ok(expand_range(&name, '[', first, second))
            } else {
                self.expect_punct(']')?;
                Ok(vec![arcstr::format!("{}[{}]", name, first)])
            }
        } else {
            Ok(vec![name])
        }
    }
}

fn keyword_direction(kw: Keyword) -> Direction {
    match kw {
        Keyword::Input => Direction::Input,
        Keyword::Output => Direction::Output,
        _ => Direction::InOut,
    }
}

fn push_net(module: &mut Module, net: ArcStr) {
    if !module.nets().contains(&net) {
        module.nets_mut().push(Net::new(net));
    }
}

/// Registers one declared port member: records its direction, its place in
/// the head port's member list, and its net.
fn declare_port(
    module: &mut Module,
    port_order: &mut IndexMap<ArcStr, Vec<ArcStr>>,
    port_dir: &mut IndexMap<ArcStr, Direction>,
    member: ArcStr,
    direction: Direction,
) -> Result<(), ParserError> {
    let root = if netir::escape::is_escaped(&member) {
        member.as_str()
    } else {
        member.split('[').next().unwrap_or(&member)
    };
    let Some(members) = port_order.get_mut(root) else {
        return Err(ParserError::UndefinedPort {
            module: module.name().clone(),
            port: member,
        });
    };
    match port_dir.get(&member) {
        Some(existing) if *existing != direction => {
            return Err(ParserError::ConflictingDirection {
                module: module.name().clone(),
                port: member,
            });
        }
        Some(_) => {}
        None => {
            members.push(member.clone());
            port_dir.insert(member.clone(), direction);
        }
    }
    push_net(module, member);
    Ok(())
}

/// Builds the terminal list in head-port order from the collected member
/// and direction maps.
fn build_terminals(
    module: &mut Module,
    port_order: IndexMap<ArcStr, Vec<ArcStr>>,
    port_dir: IndexMap<ArcStr, Direction>,
) -> Result<(), ParserError> {
    for (root, members) in port_order {
        if members.is_empty() {
            return Err(ParserError::UndeclaredDirection {
                module: module.name().clone(),
                port: root,
            });
        }
        for member in members {
            // declare_port recorded a direction for every member.
            let direction = port_dir.get(&member).copied().unwrap_or_default();
            module.terminals_mut().push(Terminal::new(member, direction));
        }
    }
    Ok(())
}

fn punct_name(c: char) -> &'static str {
    match c {
        '(' => "`(`",
        ')' => "`)`",
        '[' => "`[`",
        ']' => "`]`",
        '{' => "`{`",
        '}' => "`}`",
        ';' => "`;`",
        ':' => "`:`",
        ',' => "`,`",
        '.' => "`.`",
        '=' => "`=`",
        _ => "punctuation",
    }
}
