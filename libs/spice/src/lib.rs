//! SPICE/CDL netlist parsing and writing.
//!
//! The parser reads `.SUBCKT` definitions into a [`netir::Design`],
//! following `.INCLUDE` directives with include-priority bookkeeping.
//! The [`netlist::Netlister`] writes a design back out as SPICE.
#![warn(missing_docs)]

pub mod netlist;
pub mod parser;

use std::path::Path;

use netir::Design;

pub use netlist::{NetlistError, Netlister};
pub use parser::{Parser, ParserError, Substr, Token};

/// Parses a SPICE netlist file, following `.INCLUDE`s.
///
/// When `rebuild` is set, connections are normalized against their
/// masters after the parse (see [`netir::rebuild`]).
pub fn from_file(path: impl AsRef<Path>, rebuild: bool) -> Result<Design, ParserError> {
    let mut design = parser::parse_hierarchy(path.as_ref())?;
    if rebuild {
        design.rebuild(false)?;
    }
    Ok(design)
}

/// Parses an in-memory SPICE netlist.
///
/// `.INCLUDE` directives with relative paths are rejected, since there is
/// no file to resolve them against.
pub fn from_str(data: impl Into<Substr>, rebuild: bool) -> Result<Design, ParserError> {
    let mut design = parser::parse_hierarchy_str(data.into())?;
    if rebuild {
        design.rebuild(false)?;
    }
    Ok(design)
}
