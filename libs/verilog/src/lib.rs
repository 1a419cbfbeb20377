//! Structural-Verilog netlist parsing.
//!
//! The parser reads the structural subset of Verilog (module heads, port
//! direction and wire declarations, specify blocks, instantiations) into
//! a [`netir::Design`], following `` `include `` directives with
//! include-priority bookkeeping.
#![warn(missing_docs)]

pub mod lexer;
mod include;
pub mod parser;

use std::path::Path;

use netir::Design;

pub use lexer::{LexerError, Token, TokenKind};
pub use parser::{Parser, ParserError};

/// Parses a Verilog netlist file, following `` `include ``s.
///
/// When `rebuild` is set, connections are normalized against their
/// masters after the parse, with single-bit bus roots fanned out across
/// matching bus terminals (see [`netir::rebuild`]).
pub fn from_file(path: impl AsRef<Path>, rebuild: bool) -> Result<Design, ParserError> {
    let mut design = include::parse_hierarchy(path.as_ref())?;
    if rebuild {
        design.rebuild(true)?;
    }
    Ok(design)
}

/// Parses an in-memory Verilog netlist.
///
/// `` `include `` directives with relative paths are rejected, since
/// there is no file to resolve them against.
pub fn from_str(data: &str, rebuild: bool) -> Result<Design, ParserError> {
    let mut design = include::parse_hierarchy_str(data)?;
    if rebuild {
        design.rebuild(true)?;
    }
    Ok(design)
}
