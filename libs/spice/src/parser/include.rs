//! `.INCLUDE` hierarchy handling.
//!
//! Before parsing, the source tree is scanned depth first for include
//! directives. Each source unit gets a priority: the root is empty, and
//! a unit included from line `n` of a parent with priority `p` gets
//! `p + [n]`. Units are then parsed independently and merged in
//! depth-first order, so duplicate modules resolve by include priority.

use std::path::{Path, PathBuf};

use arcstr::ArcStr;
use lazy_static::lazy_static;
use netir::Design;
use regex::Regex;

use super::{Parser, ParserError, Substr};

lazy_static! {
    static ref INCLUDE: Regex =
        Regex::new(r#"(?i)^\s*\.include\s+"?([^"\s]+)"?"#).unwrap();
}

#[derive(Debug)]
struct SourceUnit {
    priority: Vec<usize>,
    path: Option<PathBuf>,
    name: ArcStr,
    data: Substr,
}

/// Parses the netlist at `path` and everything it includes.
pub(crate) fn parse_hierarchy(path: &Path) -> Result<Design, ParserError> {
    let data = read_unit(path)?;
    let root = SourceUnit {
        priority: Vec::new(),
        path: Some(path.to_path_buf()),
        name: unit_name(path),
        data: data.clone(),
    };
    let mut units = Vec::new();
    let mut ancestors = vec![canonical(path)];
    collect_includes(&data, Some(path), &[], &mut units, &mut ancestors)?;
    merge_units(root, units)
}

/// Parses an in-memory netlist and everything it includes.
///
/// Relative include paths cannot be resolved without a source file and
/// are rejected.
pub(crate) fn parse_hierarchy_str(data: Substr) -> Result<Design, ParserError> {
    let root = SourceUnit {
        priority: Vec::new(),
        path: None,
        name: arcstr::literal!("netlist"),
        data: data.clone(),
    };
    let mut units = Vec::new();
    let mut ancestors = Vec::new();
    collect_includes(&data, None, &[], &mut units, &mut ancestors)?;
    merge_units(root, units)
}

fn collect_includes(
    data: &Substr,
    path: Option<&Path>,
    priority: &[usize],
    units: &mut Vec<SourceUnit>,
    ancestors: &mut Vec<PathBuf>,
) -> Result<(), ParserError> {
    for (i, line) in data.lines().enumerate() {
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
    let mut design = Parser::parse_unit(root.name, root.data, root.priority, root.path)?;
    for unit in units {
        let parsed = Parser::parse_unit(unit.name, unit.data, unit.priority, unit.path)?;
        design.include_design(parsed);
    }
    Ok(design)
}

fn read_unit(path: &Path) -> Result<Substr, ParserError> {
    let data = std::fs::read_to_string(path).map_err(|err| ParserError::FailedToRead {
        path: path.to_path_buf(),
        err,
    })?;
    Ok(Substr::from(ArcStr::from(data)))
}

fn unit_name(path: &Path) -> ArcStr {
    path.file_name()
        .map(|name| ArcStr::from(name.to_string_lossy().as_ref()))
        .unwrap_or_else(|| arcstr::literal!("netlist"))
}

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}
