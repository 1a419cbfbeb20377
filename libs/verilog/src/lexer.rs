//! Structural-Verilog tokenizer.
//!
//! Comments (`//`, `/* */`), synthesis attributes (`(* *)`), and
//! backtick directive lines are skipped. Escaped identifiers keep their
//! leading backslash and run to the next whitespace.

use std::fmt::Display;

use arcstr::ArcStr;
use thiserror::Error;

/// A Verilog token with its 1-based source line.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// The token kind.
    pub kind: TokenKind,
    /// The 1-based line the token starts on.
    pub line: usize,
}

/// A Verilog token kind.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// A plain identifier.
    Ident(ArcStr),
    /// An escaped identifier, stored with its leading backslash.
    Escaped(ArcStr),
    /// An integer or real literal, kept as source text.
    Number(ArcStr),
    /// A string literal, without its quotes.
    Str(ArcStr),
    /// A reserved word.
    Keyword(Keyword),
    /// A punctuation character.
    Punct(char),
}

/// A reserved word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    /// `module`
    Module,
    /// `endmodule`
    EndModule,
    /// `input`
    Input,
    /// `output`
    Output,
    /// `inout`
    Inout,
    /// `wire`
    Wire,
    /// `specify`
    Specify,
    /// `specparam`
    Specparam,
    /// `endspecify`
    EndSpecify,
}

impl Keyword {
    fn parse(word: &str) -> Option<Self> {
        Some(match word {
            "module" => Self::Module,
            "endmodule" => Self::EndModule,
            "input" => Self::Input,
            "output" => Self::Output,
            "inout" => Self::Inout,
            "wire" => Self::Wire,
            "specify" => Self::Specify,
            "specparam" => Self::Specparam,
            "endspecify" => Self::EndSpecify,
            _ => return None,
        })
    }
}

impl Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ident(s) | Self::Escaped(s) | Self::Number(s) => write!(f, "{s}"),
            Self::Str(s) => write!(f, "\"{s}\""),
            Self::Keyword(kw) => write!(f, "{kw:?}"),
            Self::Punct(c) => write!(f, "{c}"),
        }
    }
}

/// A tokenizer error.
#[derive(Debug, Error)]
pub enum LexerError {
    /// A character with no meaning in structural Verilog.
    #[error("unexpected character `{ch}` at line {line}")]
    UnexpectedChar {
        /// The offending character.
        ch: char,
        /// The 1-based source line.
        line: usize,
    },
    /// A block construct left open at end of input.
    #[error("unterminated `{open}` starting at line {line}")]
    Unterminated {
        /// The opening delimiter.
        open: &'static str,
        /// The line the construct starts on.
        line: usize,
    },
}

/// Tokenizes `data`, dropping comments and directives.
pub fn tokenize(data: &str) -> Result<Vec<Token>, LexerError> {
    let mut tokens = Vec::new();
    let mut chars = data.char_indices().peekable();
    let mut line = 1;
    while let Some((i, c)) = chars.next() {
        match c {
            '\n' => line += 1,
            c if c.is_whitespace() => {}
            '/' => match chars.peek() {
                Some((_, '/')) => {
                    for (_, c) in chars.by_ref() {
                        if c == '\n' {
                            line += 1;
                            break;
                        }
                    }
                }
                Some((_, '*')) => {
                    chars.next();
                    let start = line;
                    let mut star = false;
                    let mut closed = false;
                    for (_, c) in chars.by_ref() {
                        if c == '\n' {
                            line += 1;
                        }
                        if star && c == '/' {
                            closed = true;
                            break;
                        }
                        star = c == '*';
                    }
                    if !closed {
                        return Err(LexerError::Unterminated {
                            open: "/*",
                            line: start,
                        });
                    }
                }
                _ => return Err(LexerError::UnexpectedChar { ch: c, line }),
            },
            '(' => {
                if matches!(chars.peek(), Some((_, '*'))) {
                    chars.next();
                    let start = line;
                    let mut star = false;
                    let mut closed = false;
                    for (_, c) in chars.by_ref() {
                        if c == '\n' {
                            line += 1;
                        }
                        if star && c == ')' {
                            closed = true;
                            break;
                        }
                        star = c == '*';
                    }
                    if !closed {
                        return Err(LexerError::Unterminated {
                            open: "(*",
                            line: start,
                        });
                    }
                } else {
                    tokens.push(Token {
                        kind: TokenKind::Punct('('),
                        line,
                    });
                }
            }
            '`' => {
                // Compiler directives are handled (or ignored) before
                // tokenization; drop the rest of the line.
                for (_, c) in chars.by_ref() {
                    if c == '\n' {
                        line += 1;
                        break;
                    }
                }
            }
            '"' => {
                let start = line;
                let mut value = String::new();
                let mut closed = false;
                for (_, c) in chars.by_ref() {
                    if c == '"' {
                        closed = true;
                        break;
                    }
                    if c == '\n' {
                        line += 1;
                    }
                    value.push(c);
                }
                if !closed {
                    return Err(LexerError::Unterminated {
                        open: "\"",
                        line: start,
                    });
                }
                tokens.push(Token {
                    kind: TokenKind::Str(ArcStr::from(value)),
                    line: start,
                });
            }
            '\\' => {
                let mut value = String::from('\\');
                while let Some((_, c)) = chars.peek() {
                    if c.is_whitespace() {
                        break;
                    }
                    value.push(*c);
                    chars.next();
                }
                tokens.push(Token {
                    kind: TokenKind::Escaped(ArcStr::from(value)),
                    line,
                });
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut end = i + c.len_utf8();
                while let Some((j, c)) = chars.peek() {
                    if c.is_ascii_alphanumeric() || *c == '_' || *c == '$' {
                        end = j + c.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                let word = &data[i..end];
                let kind = match Keyword::parse(word) {
                    Some(kw) => TokenKind::Keyword(kw),
                    None => TokenKind::Ident(ArcStr::from(word)),
                };
                tokens.push(Token { kind, line });
            }
            c if c.is_ascii_digit() => {
                let mut end = i + c.len_utf8();
                while let Some((j, c)) = chars.peek() {
                    if c.is_ascii_digit() || *c == '.' {
                        end = j + c.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token {
                    kind: TokenKind::Number(ArcStr::from(&data[i..end])),
                    line,
                });
            }
            ')' | '[' | ']' | '{' | '}' | ',' | ';' | ':' | '.' | '=' | '#' => {
                tokens.push(Token {
                    kind: TokenKind::Punct(c),
                    line,
                });
            }
            ch => return Err(LexerError::UnexpectedChar { ch, line }),
        }
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(data: &str) -> Vec<TokenKind> {
        tokenize(data).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn comments_and_directives_are_skipped() {
        let toks = kinds(
            "`timescale 1ns / 1ns\n// line\n/* block\nspanning */\n(* flags = \"x\" *)\nmodule m;",
        );
        assert_eq!(
            toks,
            vec![
                TokenKind::Keyword(Keyword::Module),
                TokenKind::Ident("m".into()),
                TokenKind::Punct(';'),
            ]
        );
    }

    #[test]
    fn escaped_identifiers_run_to_whitespace() {
        let toks = kinds("wire \\a.b[2] ;");
        assert_eq!(
            toks,
            vec![
                TokenKind::Keyword(Keyword::Wire),
                TokenKind::Escaped("\\a.b[2]".into()),
                TokenKind::Punct(';'),
            ]
        );
    }

    #[test]
    fn bus_selects_tokenize() {
        let toks = kinds(".DQ(DQ[0:7])");
        assert_eq!(
            toks,
            vec![
                TokenKind::Punct('.'),
                TokenKind::Ident("DQ".into()),
                TokenKind::Punct('('),
                TokenKind::Ident("DQ".into()),
                TokenKind::Punct('['),
                TokenKind::Number("0".into()),
                TokenKind::Punct(':'),
                TokenKind::Number("7".into()),
                TokenKind::Punct(']'),
                TokenKind::Punct(')'),
            ]
        );
    }

    #[test]
    fn strings_and_lines_are_tracked() {
        let toks = tokenize("specparam CDS_LIBNAME = \"TEST\";\nmodule m;").unwrap();
        assert_eq!(toks[3].kind, TokenKind::Str("TEST".into()));
        assert_eq!(toks[5].kind, TokenKind::Keyword(Keyword::Module));
        assert_eq!(toks[5].line, 2);
    }

    #[test]
    fn unterminated_block_comment_fails() {
        assert!(matches!(
            tokenize("/* open"),
            Err(LexerError::Unterminated { open: "/*", .. })
        ));
    }
}
