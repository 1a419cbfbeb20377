//! SPICE netlist parser.

mod include;
mod inst;
#[cfg(test)]
mod tests;

use std::borrow::Borrow;
use std::fmt::Display;
use std::iter::FusedIterator;
use std::ops::{Deref, DerefMut};
use std::path::PathBuf;

use arcstr::ArcStr;
use netir::{Design, Fig, Module, Net, Terminal, Value};
use nom::bytes::complete::{take_till, take_while};
use nom::Input;
use thiserror::Error;

pub(crate) use include::{parse_hierarchy, parse_hierarchy_str};

/// A substring of a file being parsed.
#[derive(Clone, Default, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
#[repr(transparent)]
pub struct Substr(arcstr::Substr);

/// Parses SPICE netlists into a [`Design`].
#[derive(Default, Debug)]
pub struct Parser {
    buffer: Vec<Token>,
    /// Source line of the first token of the current logical line.
    line: usize,
    state: ReaderState,
    design: Design,
}

#[derive(Default, Debug)]
enum ReaderState {
    #[default]
    Top,
    Subckt(Module),
}

impl Parser {
    /// Parses a single SPICE source unit.
    ///
    /// `.INCLUDE` directives are ignored here; use [`crate::from_file`] to
    /// parse a full include hierarchy.
    pub fn parse_str(
        name: impl Into<ArcStr>,
        data: impl Into<Substr>,
    ) -> Result<Design, ParserError> {
        let mut parser = Self {
            design: Design::new(name),
            ..Self::default()
        };
        parser.parse_inner(data.into())?;
        Ok(parser.design)
    }

    pub(crate) fn parse_unit(
        name: impl Into<ArcStr>,
        data: Substr,
        priority: Vec<usize>,
        path: Option<PathBuf>,
    ) -> Result<Design, ParserError> {
        let mut design = Self::parse_str(name, data)?;
        design.set_priority(priority);
        design.set_path(path);
        Ok(design)
    }

    fn parse_inner(&mut self, data: Substr) -> Result<(), ParserError> {
        let mut tok = Tokenizer::new(data);
        while let Some(token) = tok.get()? {
            if token == Token::LineEnd {
                self.parse_line()?;
            } else {
                if self.buffer.is_empty() {
                    self.line = tok.line();
                }
                self.buffer.push(token);
            }
        }
        if let ReaderState::Subckt(module) = &self.state {
            return Err(ParserError::UnterminatedSubckt(module.name().clone()));
        }
        Ok(())
    }

    fn parse_line(&mut self) -> Result<(), ParserError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        match &self.buffer[0] {
            Token::Directive(d) => {
                if d.eq_ignore_ascii_case(".subckt") {
                    self.start_subckt()?;
                } else if d.eq_ignore_ascii_case(".ends") {
                    self.end_subckt()?;
                } else if d.eq_ignore_ascii_case(".param") {
                    self.parse_params()?;
                } else if d.eq_ignore_ascii_case(".include") {
                    // Includes are resolved by a pre-scan of the source
                    // tree; within a unit they are no-ops.
                    tracing::debug!(line = self.line, "skipping include directive");
                } else if d.eq_ignore_ascii_case(".end") {
                    // End of netlist; nothing to do.
                } else {
                    tracing::warn!(
                        line = self.line,
                        directive = %d,
                        "ignoring unsupported SPICE directive"
                    );
                }
            }
            Token::MetaDirective(d) => {
                if d.eq_ignore_ascii_case("pininfo") {
                    self.parse_pininfo()?;
                }
                // Other metadata directives are comments to us.
            }
            Token::Ident(_) => self.parse_instance()?,
            tok => {
                return Err(ParserError::UnexpectedToken(tok.clone()));
            }
        }
        self.buffer.clear();
        Ok(())
    }

    /// `.SUBCKT name term1 term2 ... [k=v ...]`
    fn start_subckt(&mut self) -> Result<(), ParserError> {
        if let ReaderState::Subckt(module) = &self.state {
            return Err(ParserError::InvalidLine {
                line: self.line,
                reason: format!("subckt `{}` is still open", module.name()),
            });
        }
        if self.buffer.len() < 2 {
            return Err(ParserError::InvalidLine {
                line: self.line,
                reason: "subckt declaration is missing a name".to_string(),
            });
        }
        let name = self.buffer[1].try_ident()?.clone();
        let mut module = Module::new(ArcStr::from(name.as_str()));
        module.set_lineno(Some(self.line));

        let mut i = 2;
        while i < self.buffer.len() {
            if matches!(self.buffer.get(i + 1), Some(Token::Equals)) {
                break;
            }
            let term = self.buffer[i].try_ident()?;
            module
                .terminals_mut()
                .push(Terminal::new(ArcStr::from(term.as_str()), Default::default()));
            i += 1;
        }
        while i < self.buffer.len() {
            let k = self.buffer[i].try_ident()?;
            if !matches!(self.buffer.get(i + 1), Some(Token::Equals)) {
                return Err(ParserError::InvalidLine {
                    line: self.line,
                    reason: format!("expected `=` after subckt parameter `{k}`"),
                });
            }
            let v = self
                .buffer
                .get(i + 2)
                .ok_or(ParserError::InvalidLine {
                    line: self.line,
                    reason: format!("missing value for subckt parameter `{k}`"),
                })?
                .try_ident()?;
            module.parameters_mut().insert(k.as_str(), Value::parse(v));
            i += 3;
        }

        self.state = ReaderState::Subckt(module);
        Ok(())
    }

    fn end_subckt(&mut self) -> Result<(), ParserError> {
        match std::mem::take(&mut self.state) {
            ReaderState::Subckt(module) => {
                if self.design.modules().contains(module.name()) {
                    // First definition within a unit wins.
                    tracing::warn!(
                        module = %module.name(),
                        line = self.line,
                        "ignoring duplicate subckt definition"
                    );
                } else {
                    self.design.modules_mut().push(module);
                }
                Ok(())
            }
            ReaderState::Top => Err(ParserError::InvalidLine {
                line: self.line,
                reason: ".ends without a matching .subckt".to_string(),
            }),
        }
    }

    /// `.PARAM k=v [k=v ...]`
    fn parse_params(&mut self) -> Result<(), ParserError> {
        let mut pairs = Vec::new();
        let mut i = 1;
        while i < self.buffer.len() {
            let k = self.buffer[i].try_ident()?;
            if !matches!(self.buffer.get(i + 1), Some(Token::Equals)) {
                return Err(ParserError::InvalidLine {
                    line: self.line,
                    reason: format!("expected `=` after parameter `{k}`"),
                });
            }
            let v = self
                .buffer
                .get(i + 2)
                .ok_or(ParserError::InvalidLine {
                    line: self.line,
                    reason: format!("missing value for parameter `{k}`"),
                })?
                .try_ident()?;
            pairs.push((ArcStr::from(k.as_str()), Value::parse(v)));
            i += 3;
        }
        let params = match &mut self.state {
            ReaderState::Subckt(module) => module.parameters_mut(),
            ReaderState::Top => self.design.parameters_mut(),
        };
        for (k, v) in pairs {
            params.insert(k, v);
        }
        Ok(())
    }

    /// `*.PININFO A:I B:I Y:O VDD:B VSS:B`
    fn parse_pininfo(&mut self) -> Result<(), ParserError> {
        let ReaderState::Subckt(module) = &mut self.state else {
            tracing::warn!(line = self.line, "ignoring pininfo outside a subckt");
            return Ok(());
        };
        for token in &self.buffer[1..] {
            let token = token.try_ident()?;
            let Some((term, dir)) = token.split_once(':') else {
                return Err(ParserError::InvalidLine {
                    line: self.line,
                    reason: format!("malformed pininfo entry `{token}`"),
                });
            };
            let direction = match dir.to_ascii_uppercase().as_str() {
                "I" => netir::Direction::Input,
                "O" => netir::Direction::Output,
                "B" => netir::Direction::InOut,
                _ => {
                    return Err(ParserError::InvalidLine {
                        line: self.line,
                        reason: format!("unknown pininfo direction `{dir}`"),
                    })
                }
            };
            match module.terminals_mut().get_mut(term) {
                Some(terminal) => terminal.set_direction(direction),
                None => {
                    return Err(ParserError::PinInfo {
                        subckt: module.name().clone(),
                        terminal: ArcStr::from(term),
                    })
                }
            }
        }
        Ok(())
    }

    fn parse_instance(&mut self) -> Result<(), ParserError> {
        let ReaderState::Subckt(module) = &mut self.state else {
            tracing::warn!(
                line = self.line,
                "ignoring component line outside a subckt"
            );
            return Ok(());
        };
        let instance = match inst::parse_instance(&self.buffer) {
            Ok(instance) => instance,
            Err(err) => {
                // A malformed instance is kept as an unknown so dumps can
                // reproduce the input.
                tracing::warn!(
                    line = self.line,
                    error = %err,
                    "keeping unparseable instance line as unknown"
                );
                inst::unknown_instance(&self.buffer, &err)
            }
        };
        for net in instance.connection().net_names() {
            if !module.nets().contains(net) {
                module.nets_mut().push(Net::new(net.clone()));
            }
        }
        module.instances_mut().push(instance);
        Ok(())
    }
}

/// An error arising from parsing a SPICE netlist.
#[derive(Debug, Error)]
pub enum ParserError {
    /// A tokenizer error.
    #[error("tokenizer error: {0}")]
    Tokenizer(#[from] TokenizerError),
    /// An unsupported or unexpected token.
    #[error("unexpected token: {0:?}")]
    UnexpectedToken(Token),
    /// An invalid line.
    #[error("invalid line {line}: {reason}")]
    InvalidLine {
        /// The 1-based source line.
        line: usize,
        /// The reason the line is invalid.
        reason: String,
    },
    /// A pininfo entry names a terminal the subckt does not declare.
    #[error("pininfo of subckt `{subckt}` names unknown terminal `{terminal}`")]
    PinInfo {
        /// The subckt being parsed.
        subckt: ArcStr,
        /// The unknown terminal.
        terminal: ArcStr,
    },
    /// The source ended with a subckt still open.
    #[error("unterminated subckt `{0}`")]
    UnterminatedSubckt(ArcStr),
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

#[inline]
fn is_newline(c: char) -> bool {
    c == '\n' || c == '\r'
}

#[inline]
fn is_space(c: char) -> bool {
    c == ' ' || c == '\t'
}

#[inline]
fn is_space_or_newline(c: char) -> bool {
    is_space(c) || is_newline(c)
}

#[inline]
fn is_special(c: char) -> bool {
    is_space_or_newline(c) || c == '='
}

/// The string prefixing metadata directives such as `*.PININFO`.
const META_DIRECTIVE_PREFIX: &str = "*.";

struct Tokenizer {
    data: Substr,
    rem: Substr,
    state: TokState,
    line: usize,
    line_continuation: char,
}

/// A SPICE token.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Token {
    /// A SPICE directive that starts with a leading dot.
    ///
    /// Examples: ".subckt", ".ends", ".include".
    ///
    /// The tokenizer returns tokens with case matching the input file.
    Directive(Substr),
    /// A SPICE identifier.
    Ident(Substr),
    /// A line end indicator.
    LineEnd,
    /// An equal sign token ('=').
    Equals,
    /// A metadata directive, such as "*.PININFO".
    MetaDirective(Substr),
}

#[derive(Copy, Clone, Default, Eq, PartialEq, Hash, Debug)]
enum TokState {
    /// Initial state.
    #[default]
    Init,
    /// Parsing a line.
    Line,
}

/// A tokenizer error.
#[derive(Debug, Error)]
pub struct TokenizerError {
    state: TokState,
    /// The byte offset in the file being tokenized.
    ofs: usize,
    line: usize,
    rem: Substr,
    message: ArcStr,
    token: Substr,
}

impl Tokenizer {
    fn new(data: impl Into<arcstr::Substr>) -> Self {
        let data = data.into();
        let rem = data.clone();
        Self {
            data: Substr(data),
            rem: Substr(rem),
            state: TokState::Init,
            line: 1,
            line_continuation: '+',
        }
    }

    /// The 1-based line number at the current read position.
    fn line(&self) -> usize {
        self.line
    }

    fn next_is_meta_directive(&self) -> bool {
        self.rem.starts_with(META_DIRECTIVE_PREFIX)
    }

    fn take_meta_directive(&mut self) -> Substr {
        self.rem = Substr(self.rem.substr(META_DIRECTIVE_PREFIX.len()..));
        self.take_ident()
    }

    /// Returns `true` if the character at the read position starts a
    /// trailing `$` comment rather than a `$`-prefixed token such as
    /// `$PINS` or `$[model]`.
    fn next_is_dollar_comment(&self) -> bool {
        let mut chars = self.rem.chars();
        if chars.next() != Some('$') {
            return false;
        }
        matches!(chars.next(), None | Some(' ') | Some('\t') | Some('\n') | Some('\r'))
    }

    fn get(&mut self) -> Result<Option<Token>, TokenizerError> {
        loop {
            self.take_ws();
            if self.rem.is_empty() {
                if self.state == TokState::Line {
                    // At EOF, but have not yet returned a final LineEnd.
                    self.state = TokState::Init;
                    return Ok(Some(Token::LineEnd));
                } else {
                    return Ok(None);
                }
            }

            let c = self.peek().unwrap();
            match self.state {
                TokState::Init => {
                    if (c == '*' && !self.next_is_meta_directive()) || c == '$' {
                        self.take_until_newline();
                    } else if c.is_whitespace() {
                        self.take1();
                    } else if c == self.line_continuation {
                        self.err("unexpected line continuation", c)?;
                    } else {
                        self.state = TokState::Line;
                    }
                }
                TokState::Line => {
                    if c == '=' {
                        self.take1();
                        return Ok(Some(Token::Equals));
                    } else if self.next_is_meta_directive() {
                        let md = self.take_meta_directive();
                        return Ok(Some(Token::MetaDirective(md)));
                    } else if is_newline(c) {
                        self.take1();
                        self.take_ws();
                        if self.peek().unwrap_or(self.line_continuation) != self.line_continuation
                        {
                            self.state = TokState::Init;
                            return Ok(Some(Token::LineEnd));
                        }
                    } else if c == self.line_continuation {
                        self.take1();
                    } else if self.next_is_dollar_comment() {
                        self.take_until_newline();
                    } else if c == '.' {
                        let word = self.take_ident();
                        return Ok(Some(Token::Directive(word)));
                    } else {
                        let word = self.take_ident();
                        return Ok(Some(Token::Ident(word)));
                    }
                }
            }
        }
    }

    fn err(
        &self,
        message: impl Into<ArcStr>,
        token: impl Into<Substr>,
    ) -> Result<(), TokenizerError> {
        Err(TokenizerError {
            state: self.state,
            ofs: self.rem.range().start,
            line: self.line,
            rem: self.rem.clone(),
            message: message.into(),
            token: token.into(),
        })
    }

    fn take1(&mut self) -> Option<char> {
        let c = self.rem.chars().next()?;
        self.rem = Substr(self.rem.substr(c.len_utf8()..));
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn take_until_newline(&mut self) -> Substr {
        let (rest, comment) = take_till::<_, _, ()>(is_newline)(self.rem.clone()).unwrap();
        self.rem = rest;
        comment
    }

    fn take_ident(&mut self) -> Substr {
        let (rest, value) = take_till::<_, _, ()>(is_special)(self.rem.clone()).unwrap();
        self.rem = rest;
        value
    }

    fn take_ws(&mut self) {
        let (rest, _) = take_while::<_, _, ()>(is_space)(self.rem.clone()).unwrap();
        self.rem = rest;
    }

    fn peek(&self) -> Option<char> {
        self.rem.chars().next()
    }
}

struct Tokens {
    tok: Tokenizer,
}

impl Iterator for Tokens {
    type Item = Result<Token, TokenizerError>;
    fn next(&mut self) -> Option<Self::Item> {
        self.tok.get().transpose()
    }
}

impl IntoIterator for Tokenizer {
    type Item = Result<Token, TokenizerError>;
    type IntoIter = Tokens;
    fn into_iter(self) -> Self::IntoIter {
        Tokens { tok: self }
    }
}

impl Deref for Substr {
    type Target = arcstr::Substr;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Substr {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl Input for Substr {
    type Item = char;
    type Iter = SubstrChars;
    type IterIndices = SubstrCharIndices;

    fn input_len(&self) -> usize {
        <&str as Input>::input_len(&&***self)
    }

    fn take(&self, index: usize) -> Self {
        Substr(self.0.substr_from(<&str as Input>::take(&&***self, index)))
    }

    fn take_from(&self, index: usize) -> Self {
        Substr(
            self.0
                .substr_from(<&str as Input>::take_from(&&***self, index)),
        )
    }

    fn take_split(&self, index: usize) -> (Self, Self) {
        let (a, b) = <&str as Input>::take_split(&&***self, index);
        (Substr(self.0.substr_from(a)), Substr(self.0.substr_from(b)))
    }

    fn position<P>(&self, predicate: P) -> Option<usize>
    where
        P: Fn(Self::Item) -> bool,
    {
        <&str as Input>::position(&&***self, predicate)
    }

    fn iter_elements(&self) -> Self::Iter {
        SubstrChars {
            substr: self.clone(),
        }
    }

    fn iter_indices(&self) -> Self::IterIndices {
        SubstrCharIndices {
            substr: self.clone(),
            ofs: 0,
        }
    }

    fn slice_index(&self, count: usize) -> Result<usize, nom::Needed> {
        <&str as Input>::slice_index(&&***self, count)
    }
}

/// An iterator over the chars of a [`Substr`].
pub struct SubstrChars {
    substr: Substr,
}

impl Iterator for SubstrChars {
    type Item = char;
    fn next(&mut self) -> Option<Self::Item> {
        let mut chars = self.substr.chars();
        let c = chars.next();
        self.substr = Substr(self.substr.0.substr_from(chars.as_str()));
        c
    }
}

impl FusedIterator for SubstrChars {}

/// An iterator over the chars of a [`Substr`], and their byte offsets
/// from the start of the iterated input.
pub struct SubstrCharIndices {
    substr: Substr,
    ofs: usize,
}

impl Iterator for SubstrCharIndices {
    type Item = (usize, char);
    fn next(&mut self) -> Option<Self::Item> {
        let mut chars = self.substr.chars();
        let c = chars.next()?;
        self.substr = Substr(self.substr.0.substr_from(chars.as_str()));
        let ofs = self.ofs;
        self.ofs += c.len_utf8();
        Some((ofs, c))
    }
}

impl FusedIterator for SubstrCharIndices {}

impl Display for Substr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Substr> for arcstr::Substr {
    fn from(value: Substr) -> Self {
        value.0
    }
}

impl From<&str> for Substr {
    fn from(value: &str) -> Self {
        Self(arcstr::Substr::from(value))
    }
}

impl From<arcstr::Substr> for Substr {
    fn from(value: arcstr::Substr) -> Self {
        Self(value)
    }
}

impl From<ArcStr> for Substr {
    fn from(value: ArcStr) -> Self {
        Self(arcstr::Substr::full(value))
    }
}

impl From<char> for Substr {
    fn from(value: char) -> Self {
        Self(arcstr::Substr::from(value.to_string()))
    }
}

impl Borrow<str> for Substr {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl Token {
    fn try_ident(&self) -> Result<&Substr, ParserError> {
        match self {
            Self::Ident(x) => Ok(x),
            _ => Err(ParserError::UnexpectedToken(self.clone())),
        }
    }
}

impl Display for TokenizerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (token {} at line {}, offset {})",
            self.message, self.token, self.line, self.ofs
        )
    }
}
