//! The bus/member name grammar.
//!
//! Member expressions name one or more scalar members:
//!
//! * `clk` — a single name.
//! * `data[3]`, `q<0>` — a single bit-selected name.
//! * `data[3:0]`, `q<0:1>` — a bus range, expanded in literal bound order
//!   (`data[3]`, `data[2]`, ... for the first, `q<0>`, `q<1>` for the
//!   second). The bracket style is preserved.
//! * `{a, b[1:0], {c}}` — a group; groups may nest.
//! * `\a.b[3:0]` — an escaped name, terminated by whitespace. Escaped
//!   names are atomic and are never expanded.
//!
//! A trailing comma after the last member is permitted.

use arcstr::ArcStr;
use thiserror::Error;

/// A parsed member expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Member {
    /// A single scalar member, possibly bit-selected or escaped.
    Name(ArcStr),
    /// A bus range, already expanded to scalar members in literal order.
    Bus(Vec<ArcStr>),
    /// A brace-delimited group of members.
    Group(Vec<Member>),
}

impl Member {
    /// Appends the scalar members of this expression to `out`, in order.
    pub fn flatten_into(&self, out: &mut Vec<ArcStr>) {
        match self {
            Member::Name(name) => out.push(name.clone()),
            Member::Bus(names) => out.extend(names.iter().cloned()),
            Member::Group(members) => {
                for member in members {
                    member.flatten_into(out);
                }
            }
        }
    }

    /// The scalar members of this expression, in order.
    pub fn flatten(&self) -> Vec<ArcStr> {
        let mut out = Vec::new();
        self.flatten_into(&mut out);
        out
    }
}

/// An error parsing a member expression.
#[derive(Debug, Clone, Error)]
pub enum MemberError {
    /// An unexpected character in the input.
    #[error("unexpected character `{ch}` at offset {offset}")]
    UnexpectedChar {
        /// The offending character.
        ch: char,
        /// Its byte offset in the input.
        offset: usize,
    },
    /// The expression ended prematurely.
    #[error("unexpected end of member expression")]
    UnexpectedEnd,
    /// A token appeared where it is not allowed.
    #[error("unexpected token `{found}` in member expression")]
    UnexpectedToken {
        /// A rendering of the offending token.
        found: String,
    },
}

/// Parses a comma-separated list of member expressions.
pub fn parse_members(input: &str) -> Result<Vec<Member>, MemberError> {
    let tokens = lex(input)?;
    let mut parser = MemberParser { tokens, pos: 0 };
    let members = parser.member_list(None)?;
    if parser.pos != parser.tokens.len() {
        return Err(MemberError::UnexpectedToken {
            found: parser.tokens[parser.pos].render(),
        });
    }
    Ok(members)
}

/// Parses a comma-separated list of member expressions and flattens it to
/// scalar member names.
pub fn flatten_members(input: &str) -> Result<Vec<ArcStr>, MemberError> {
    let members = parse_members(input)?;
    let mut out = Vec::new();
    for member in &members {
        member.flatten_into(&mut out);
    }
    Ok(out)
}

/// Expands `base` over an index range in literal bound order.
///
/// `open` selects the bracket style (`[` or `<`).
pub fn expand_range(base: &str, open: char, first: usize, second: usize) -> Vec<ArcStr> {
    let (open, close) = bracket_pair(open);
    let indices: Vec<usize> = if first >= second {
        (second..=first).rev().collect()
    } else {
        (first..=second).collect()
    };
    indices
        .into_iter()
        .map(|i| arcstr::format!("{base}{open}{i}{close}"))
        .collect()
}

pub(crate) fn bracket_pair(open: char) -> (char, char) {
    if open == '<' {
        ('<', '>')
    } else {
        ('[', ']')
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Tok {
    Ident(String),
    Escaped(String),
    Int(usize),
    LBrace,
    RBrace,
    Comma,
    Colon,
    Open(char),
    Close(char),
}

impl Tok {
    fn render(&self) -> String {
        match self {
            Tok::Ident(s) | Tok::Escaped(s) => s.clone(),
            Tok::Int(i) => i.to_string(),
            Tok::LBrace => "{".to_string(),
            Tok::RBrace => "}".to_string(),
            Tok::Comma => ",".to_string(),
            Tok::Colon => ":".to_string(),
            Tok::Open(c) | Tok::Close(c) => c.to_string(),
        }
    }
}

fn lex(input: &str) -> Result<Vec<Tok>, MemberError> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();
    while let Some(&(offset, ch)) = chars.peek() {
        match ch {
            c if c.is_whitespace() => {
                chars.next();
            }
            '{' => {
                chars.next();
                tokens.push(Tok::LBrace);
            }
            '}' => {
                chars.next();
                tokens.push(Tok::RBrace);
            }
            ',' => {
                chars.next();
                tokens.push(Tok::Comma);
            }
            ':' => {
                chars.next();
                tokens.push(Tok::Colon);
            }
            '[' | '<' => {
                chars.next();
                tokens.push(Tok::Open(ch));
            }
            ']' | '>' => {
                chars.next();
                tokens.push(Tok::Close(if ch == '>' { '<' } else { '[' }));
            }
            '\\' => {
                // An escaped name runs until the next whitespace character.
                chars.next();
                let mut name = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if c.is_whitespace() {
                        break;
                    }
                    name.push(c);
                    chars.next();
                }
                tokens.push(Tok::Escaped(name));
            }
            c if c.is_ascii_digit() => {
                let mut value = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if !c.is_ascii_digit() {
                        break;
                    }
                    value.push(c);
                    chars.next();
                }
                // Lexed digits always form a valid integer.
                let value = value.parse().map_err(|_| MemberError::UnexpectedChar {
                    ch: c,
                    offset,
                })?;
                tokens.push(Tok::Int(value));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut name = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if !(c.is_ascii_alphanumeric() || c == '_') {
                        break;
                    }
                    name.push(c);
                    chars.next();
                }
                tokens.push(Tok::Ident(name));
            }
            _ => {
                return Err(MemberError::UnexpectedChar { ch, offset });
            }
        }
    }
    Ok(tokens)
}

struct MemberParser {
    tokens: Vec<Tok>,
    pos: usize,
}

impl MemberParser {
    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Result<Tok, MemberError> {
        let tok = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or(MemberError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(tok)
    }

    fn expect(&mut self, want: &Tok) -> Result<(), MemberError> {
        let tok = self.next()?;
        if &tok != want {
            return Err(MemberError::UnexpectedToken { found: tok.render() });
        }
        Ok(())
    }

    /// Parses members until `close` (or end of input when `close` is `None`).
    /// The closing token, if any, is consumed.
    fn member_list(&mut self, close: Option<Tok>) -> Result<Vec<Member>, MemberError> {
        let mut members = Vec::new();
        loop {
            match self.peek() {
                None if close.is_none() => return Ok(members),
                None => return Err(MemberError::UnexpectedEnd),
                Some(tok) if Some(tok) == close.as_ref() => {
                    self.pos += 1;
                    return Ok(members);
                }
                Some(_) => {}
            }
            members.push(self.member()?);
            match self.peek() {
                Some(Tok::Comma) => {
                    self.pos += 1;
                }
                Some(tok) if Some(tok) == close.as_ref() => {}
                None if close.is_none() => {}
                Some(tok) => {
                    return Err(MemberError::UnexpectedToken { found: tok.render() });
                }
                None => return Err(MemberError::UnexpectedEnd),
            }
        }
    }

    fn member(&mut self) -> Result<Member, MemberError> {
        match self.next()? {
            Tok::LBrace => {
                let members = self.member_list(Some(Tok::RBrace))?;
                Ok(Member::Group(members))
            }
            Tok::Escaped(name) => Ok(Member::Name(arcstr::format!("\\{name}"))),
            Tok::Ident(name) => self.member_suffix(name),
            tok => Err(MemberError::UnexpectedToken { found: tok.render() }),
        }
    }

    /// Parses the optional bit/range select after an identifier.
    fn member_suffix(&mut self, base: String) -> Result<Member, MemberError> {
        let open = match self.peek() {
            Some(&Tok::Open(c)) => c,
            _ => return Ok(Member::Name(ArcStr::from(base))),
        };
        self.pos += 1;
        let first = match self.next()? {
            Tok::Int(i) => i,
            tok => return Err(MemberError::UnexpectedToken { found: tok.render() }),
        };
        match self.next()? {
            Tok::Close(c) if c == open => {
                let (open, close) = bracket_pair(open);
                Ok(Member::Name(arcstr::format!("{base}{open}{first}{close}")))
            }
            Tok::Colon => {
                let second = match self.next()? {
                    Tok::Int(i) => i,
                    tok => return Err(MemberError::UnexpectedToken { found: tok.render() }),
                };
                self.expect(&Tok::Close(open))?;
                Ok(Member::Bus(expand_range(&base, open, first, second)))
            }
            tok => Err(MemberError::UnexpectedToken { found: tok.render() }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_name() {
        assert_eq!(flatten_members("A").unwrap(), vec![ArcStr::from("A")]);
    }

    #[test]
    fn bit_select_is_scalar() {
        assert_eq!(flatten_members("A[3]").unwrap(), vec![ArcStr::from("A[3]")]);
        assert_eq!(flatten_members("A<3>").unwrap(), vec![ArcStr::from("A<3>")]);
    }

    #[test]
    fn range_expands_in_literal_order() {
        let members = flatten_members("A[3:0]").unwrap();
        assert_eq!(members, ["A[3]", "A[2]", "A[1]", "A[0]"]);
        let members = flatten_members("A<0:2>").unwrap();
        assert_eq!(members, ["A<0>", "A<1>", "A<2>"]);
    }

    #[test]
    fn group_with_trailing_comma() {
        let members =
            flatten_members(r"{A<3>, A<1:0>, A[1], B[2:0], C, \D[2:0] ,}").unwrap();
        assert_eq!(
            members,
            [
                "A<3>", "A<1>", "A<0>", "A[1]", "B[2]", "B[1]", "B[0]", "C",
                r"\D[2:0]",
            ]
        );
    }

    #[test]
    fn nested_groups_flatten_in_order() {
        let members = flatten_members("{a, {b[1:0], c}, d}").unwrap();
        assert_eq!(members, ["a", "b[1]", "b[0]", "c", "d"]);
    }

    #[test]
    fn grouped_structure_is_preserved() {
        let members = parse_members("{a, b}, c").unwrap();
        assert_eq!(members.len(), 2);
        assert!(matches!(members[0], Member::Group(_)));
        assert_eq!(members[1], Member::Name(ArcStr::from("c")));
    }

    #[test]
    fn escaped_names_stay_atomic() {
        let members = flatten_members(r"\bus[3:0]").unwrap();
        assert_eq!(members, [r"\bus[3:0]"]);
    }

    #[test]
    fn mismatched_brackets_fail() {
        assert!(flatten_members("A[3:0>").is_err());
        assert!(flatten_members("{a, b").is_err());
    }
}
