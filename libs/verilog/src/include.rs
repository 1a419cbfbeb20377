//! `` `include `` hierarchy handling.
//!
//! Mirrors the SPICE include scan: the source tree is walked depth first
//! before parsing, each unit gets a priority (the root is empty, a unit
//! included from line `n` of a parent with priority `p` gets `p + [n]`),
//! and the parsed units merge in depth-first order. Block comments are
//! blanked before scanning so commented-out includes are not followed.

use std::path::{Path, PathBuf};

use arcstr::ArcStr;
use lazy_static::lazy_static;
use netir::Design;
use regex::Regex;

use crate::parser::{Parser, ParserError};

lazy_static! {
    static ref INCLUDE: Regex = Regex::new(r#"(?m)^\s*`include\s+"([^"\s]+)"\s*$"#).unwrap();
    static ref BLOCK_COMMENT: Regex = Regex::new(r"(?s)/\*.*?\*/").unwrap();
}

#[derive(Debug)]
struct SourceUnit {
    priority: Vec<usize>,
    path: Option<PathBuf>,
    name: ArcStr,
    data: String,
}

/// Parses the netlist at `path` and everything it includes.
pub(crate) fn parse_hierarchy(path: &Path) -> Result<Design, ParserError> {
    let data = read_unit(path)?;
    let mut units = Vec::new();
    let mut ancestors = vec![canonical(path)];
    collect_includes(&data, Some(path), &[], &mut units, &mut ancestors)?;
    let root = SourceUnit {
        priority: Vec::new(),
        path: Some(path.to_path_buf()),
        name: unit_name(path),
        data,
    };
    merge_units(root, units)
}

/// Parses an in-memory netlist and everything it includes.
///
/// Relative include paths cannot be resolved without a source file and
/// are rejected.
pub(crate) fn parse_hierarchy_str(data: &str) -> Result<Design, ParserError> {
    let root = SourceUnit {
        priority: Vec::new(),
        path: None,
        name: arcstr::literal!("netlist"),
        data: data.to_string(),
    };
    let mut units = Vec::new();
    let mut ancestors = Vec::new();
    collect_includes(data, None, &[], &mut units, &mut ancestors)?;
    merge_units(root, units)
}

fn collect_includes(
    data: &str,
    path: Option<&Path>,
    priority: &[usize],
    units: &mut Vec<SourceUnit>,
    ancestors: &mut Vec<PathBuf>,
) -> Result<(), ParserError> {
    let scannable = BLOCK_COMMENT.replace_all(data, |caps: &regex::Captures| {
        "\n".repeat(caps[0].matches('\n').count())
    });
    for (i, line) in scannable.lines().enumerate() {
        let Some(captures) = INCLUDE.captures(line) else {
            continue;
        };
        let included = PathBuf::from(&captures[1]);
        let included = if included.is_relative() {
            let Some(parent) = path.and_then(Path::parent) else {
                return Err(ParserError::UnexpectedRelativePath(included));
            };
            parent.join(included)
        } else {
            included
        };
        let canonical = canonical(&included);
        if ancestors.contains(&canonical) {
            return Err(ParserError::CircularInclude(included));
        }

        let mut unit_priority = priority.to_vec();
        unit_priority.push(i + 1);
        tracing::debug!(path = %included.display(), priority = ?unit_priority, "reading include");
        let unit_data = read_unit(&included)?;
        units.push(SourceUnit {
            priority: unit_priority.clone(),
            path: Some(included.clone()),
            name: unit_name(&included),
            data: unit_data.clone(),
        });

        ancestors.push(canonical);
        collect_includes(
            &unit_data,
            Some(&included),
            &unit_priority,
            units,
            ancestors,
        )?;
        ancestors.pop();
    }
    Ok(())
}

fn merge_units(root: SourceUnit, units: Vec<SourceUnit>) -> Result<Design, ParserError> {
    let mut design = Parser::parse_unit(root.name, &root.data, root.priority, root.path)?;
    for unit in units {
        let parsed = Parser::parse_unit(unit.name, &unit.data, unit.priority, unit.path)?;
        design.include_design(parsed);
    }
    Ok(design)
}

fn read_unit(path: &Path) -> Result<String, ParserError> {
    std::fs::read_to_string(path).map_err(|err| ParserError::FailedToRead {
        path: path.to_path_buf(),
        err,
    })
}

fn unit_name(path: &Path) -> ArcStr {
    path.file_name()
        .map(|name| ArcStr::from(name.to_string_lossy().as_ref()))
        .unwrap_or_else(|| arcstr::literal!("netlist"))
}

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}
