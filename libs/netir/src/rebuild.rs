//! The connection rebuild engine.
//!
//! Rebuilding normalizes instance connections against each instance's
//! master interface and then regenerates every module's net collection
//! from its connectivity:
//!
//! * By-name entries are validated against the master's terminals. Under
//!   `verilog_style`, a scalar entry naming a bus root (`data` against
//!   terminals `data[1]`, `data[0]`) fans out over the bus members.
//! * By-name group entries fan out over the matching bus terminals.
//! * By-order connections are converted to by-name form; their length must
//!   equal the master's terminal count.
//! * Instances without a resolvable master pass through untouched (by-name)
//!   or are skipped with a warning (by-order).
//!
//! Rebuilding is idempotent: a second pass over already-normalized
//! connections changes nothing.

use std::collections::HashMap;

use arcstr::ArcStr;
use indexmap::{IndexMap, IndexSet};
use thiserror::Error;

use crate::member::bracket_pair;
use crate::{
    Connection, Design, Direction, Fig, Instance, Module, Net, NetDesc, Terminal,
};

/// An error rebuilding connections or synthesizing a module.
#[derive(Debug, Error)]
pub enum RebuildError {
    /// A by-name connection names a terminal the master does not have.
    #[error("instance `{instance}`: master `{master}` has no terminal `{terminal}`")]
    TerminalNotFound {
        /// The offending instance.
        instance: ArcStr,
        /// The terminal named by the connection.
        terminal: ArcStr,
        /// The master module.
        master: ArcStr,
    },
    /// A bus fan-out matched a different number of terminals and nets.
    #[error(
        "instance `{instance}`: terminal `{terminal}` fans out over \
         {terminals} bus terminals but {nets} nets were supplied"
    )]
    BusWidthMismatch {
        /// The offending instance.
        instance: ArcStr,
        /// The bus terminal root.
        terminal: ArcStr,
        /// The number of matching bus terminals.
        terminals: usize,
        /// The number of supplied nets.
        nets: usize,
    },
    /// A positional connection does not match the master's terminal count.
    #[error(
        "instance `{instance}`: positional connection has {found} entries \
         but master `{master}` has {expected} terminals"
    )]
    ConnectionCountMismatch {
        /// The offending instance.
        instance: ArcStr,
        /// The master module.
        master: ArcStr,
        /// The master's terminal count.
        expected: usize,
        /// The number of positional entries.
        found: usize,
    },
    /// A named module does not exist in the design.
    #[error("no module named `{0}` in design")]
    ModuleNotFound(ArcStr),
    /// A named instance does not exist in the module.
    #[error("no instance named `{name}` in module `{module}`")]
    InstanceNotFound {
        /// The owning module.
        module: ArcStr,
        /// The missing instance name.
        name: ArcStr,
    },
    /// A synthesized module's name is already taken.
    #[error("design already contains a module named `{0}`")]
    DuplicateModule(ArcStr),
    /// A name-lookup pattern failed to compile.
    #[error(transparent)]
    Collection(#[from] crate::CollectionError),
}

/// A snapshot of a module's interface, used to resolve instance masters
/// while their owning modules are being mutated.
#[derive(Debug, Clone)]
pub struct MasterView {
    name: ArcStr,
    terminals: IndexMap<ArcStr, Direction>,
    nets: Vec<ArcStr>,
}

impl MasterView {
    fn of(module: &Module) -> Self {
        Self {
            name: module.name().clone(),
            terminals: module
                .terminals()
                .iter()
                .map(|t| (t.name().clone(), t.direction()))
                .collect(),
            nets: module.nets().names().cloned().collect(),
        }
    }

    /// The master module's name.
    #[inline]
    pub fn name(&self) -> &ArcStr {
        &self.name
    }

    /// The number of terminals.
    #[inline]
    pub fn terminal_count(&self) -> usize {
        self.terminals.len()
    }

    /// Returns `true` if the master has a terminal with this exact name.
    #[inline]
    pub fn has_terminal(&self, name: &str) -> bool {
        self.terminals.contains_key(name)
    }

    /// The direction of the given terminal.
    #[inline]
    pub fn direction(&self, terminal: &str) -> Option<Direction> {
        self.terminals.get(terminal).copied()
    }

    /// Terminal names, in declaration order.
    pub fn terminal_names(&self) -> impl Iterator<Item = &ArcStr> {
        self.terminals.keys()
    }

    /// The bus members of `root` among the terminals, bracket style `[n]`.
    fn square_bus_terminals(&self, root: &str) -> Vec<ArcStr> {
        let pattern = square_bus_pattern(root);
        self.terminals
            .keys()
            .filter(|name| pattern_matches(&pattern, name))
            .cloned()
            .collect()
    }

    /// The bus members of `root` among the terminals, either bracket style.
    fn bus_terminals(&self, root: &str) -> Vec<ArcStr> {
        let pattern = any_bus_pattern(root);
        self.terminals
            .keys()
            .filter(|name| pattern_matches(&pattern, name))
            .cloned()
            .collect()
    }

    /// The bus members of `root` among the nets, bracket style `[n]`.
    fn square_bus_nets(&self, root: &str) -> Vec<ArcStr> {
        let pattern = square_bus_pattern(root);
        self.nets
            .iter()
            .filter(|name| pattern_matches(&pattern, name))
            .cloned()
            .collect()
    }
}

fn square_bus_pattern(root: &str) -> regex::Regex {
    // The root is a literal name; escape it before embedding.
    regex::Regex::new(&format!(r"^{}\[[0-9]+\]$", regex::escape(root)))
        .unwrap_or_else(|_| match_nothing())
}

fn any_bus_pattern(root: &str) -> regex::Regex {
    regex::Regex::new(&format!(r"^{}(\[[0-9]+\]|<[0-9]+>)$", regex::escape(root)))
        .unwrap_or_else(|_| match_nothing())
}

fn match_nothing() -> regex::Regex {
    // Escaped literals always compile; this is unreachable in practice.
    regex::Regex::new(r"$^").unwrap()
}

fn pattern_matches(pattern: &regex::Regex, name: &str) -> bool {
    pattern.is_match(name)
}

/// Fabricates per-member net names for the bus terminals in `terminals`.
///
/// Indices run from `len - 1` down to `0`, and the bracket style follows
/// each terminal's own bracket. `data[1], data[0]` against net `d` yields
/// `data[1] -> d[1]`, `data[0] -> d[0]`.
pub fn expand_term_net_pairs<'a>(
    terminals: impl IntoIterator<Item = &'a ArcStr>,
    net: &str,
) -> Vec<(ArcStr, ArcStr)> {
    let terminals: Vec<&ArcStr> = terminals.into_iter().collect();
    let len = terminals.len();
    terminals
        .into_iter()
        .zip((0..len).rev())
        .map(|(term, i)| {
            let style = if term.contains('<') { '<' } else { '[' };
            let (open, close) = bracket_pair(style);
            (term.clone(), arcstr::format!("{net}{open}{i}{close}"))
        })
        .collect()
}

/// Fabricates per-member terminal names for the nets in `nets`.
///
/// The mirror of [`expand_term_net_pairs`]: indices run from `len - 1`
/// down to `0`, bracket style following each net's own bracket.
pub fn expand_net_term_pairs<'a>(
    terminal: &str,
    nets: impl IntoIterator<Item = &'a ArcStr>,
) -> Vec<(ArcStr, ArcStr)> {
    let nets: Vec<&ArcStr> = nets.into_iter().collect();
    let len = nets.len();
    nets.into_iter()
        .zip((0..len).rev())
        .map(|(net, i)| {
            let style = if net.contains('<') { '<' } else { '[' };
            let (open, close) = bracket_pair(style);
            (arcstr::format!("{terminal}{open}{i}{close}"), net.clone())
        })
        .collect()
}

impl Design {
    /// Snapshots every module's interface, keyed by module name.
    pub fn master_views(&self) -> HashMap<ArcStr, MasterView> {
        self.modules()
            .iter()
            .map(|module| (module.name().clone(), MasterView::of(module)))
            .collect()
    }

    /// Rebuilds every module in this design.
    ///
    /// `verilog_style` enables implicit bus fan-out for scalar by-name
    /// entries; use it for designs parsed from Verilog sources.
    pub fn rebuild(&mut self, verilog_style: bool) -> Result<(), RebuildError> {
        tracing::info!(design = %self.name(), "rebuilding design connectivity");
        let views = self.master_views();
        for module in self.modules_mut().iter_mut() {
            rebuild_module(module, &views, verilog_style)?;
        }
        Ok(())
    }

    /// Rebuilds a single module of this design.
    pub fn rebuild_module(
        &mut self,
        name: &str,
        verilog_style: bool,
    ) -> Result<(), RebuildError> {
        let views = self.master_views();
        let module = self
            .modules_mut()
            .get_mut(name)
            .ok_or_else(|| RebuildError::ModuleNotFound(ArcStr::from(name)))?;
        rebuild_module(module, &views, verilog_style)
    }

    /// Synthesizes a new module from a subset of `source`'s instances.
    ///
    /// The selected instances are copied into a new module named `name`.
    /// Nets that touch `source`'s terminals, or that also connect to
    /// instances outside the selection, become the new module's terminals.
    /// Each terminal's direction is inferred from the directions the
    /// selected instances drive onto the net: `output` wins over `inout`,
    /// which wins over `input`; a net with no known driver direction
    /// becomes `inout`.
    pub fn make_module(
        &mut self,
        source: &str,
        name: &str,
        instances: &[&str],
    ) -> Result<&Module, RebuildError> {
        if self.modules().contains(name) {
            return Err(RebuildError::DuplicateModule(ArcStr::from(name)));
        }
        let views = self.master_views();
        let source = self
            .modules()
            .get(source)
            .ok_or_else(|| RebuildError::ModuleNotFound(ArcStr::from(source)))?;

        let mut selected = Vec::with_capacity(instances.len());
        for inst_name in instances {
            let inst = source.instances().get(inst_name).ok_or_else(|| {
                RebuildError::InstanceNotFound {
                    module: source.name().clone(),
                    name: ArcStr::from(*inst_name),
                }
            })?;
            selected.push(inst.clone());
        }

        // Nets referenced by the selection, in discovery order, restricted
        // to nets the source module actually has.
        let mut assoc_nets: IndexSet<ArcStr> = IndexSet::new();
        for inst in &selected {
            for net in inst.connection().net_names() {
                if source.nets().contains(net) {
                    assoc_nets.insert(net.clone());
                }
            }
        }

        // Directions the selected instances drive onto each net.
        let mut net_dirs: HashMap<ArcStr, Vec<Direction>> = HashMap::new();
        for inst in &selected {
            let Some(master) = inst
                .reference()
                .module_name()
                .and_then(|name| views.get(name.as_str()))
            else {
                continue;
            };
            if let Connection::ByName(map) = inst.connection() {
                for (terminal, desc) in map {
                    let NetDesc::Net(net) = desc else { continue };
                    let direction = master.direction(terminal).ok_or_else(|| {
                        RebuildError::TerminalNotFound {
                            instance: inst.name().clone(),
                            terminal: terminal.clone(),
                            master: master.name().clone(),
                        }
                    })?;
                    net_dirs.entry(net.clone()).or_default().push(direction);
                }
            }
        }

        // Boundary nets: those exposed by the source module or also used
        // by instances outside the selection.
        let mut boundary = Vec::new();
        for net in &assoc_nets {
            if source.terminals().contains(net) {
                boundary.push(net.clone());
                continue;
            }
            let outside = source.instances().iter().any(|inst| {
                !instances.contains(&inst.name().as_str())
                    && inst
                        .connection()
                        .net_names()
                        .iter()
                        .any(|n| n.as_str() == net.as_str())
            });
            if outside {
                boundary.push(net.clone());
            }
        }

        let mut module = Module::new(name);
        for net in boundary {
            let dirs = net_dirs.get(&net).map(Vec::as_slice).unwrap_or_default();
            let direction = if dirs.contains(&Direction::Output) {
                Direction::Output
            } else if dirs.contains(&Direction::InOut) {
                Direction::InOut
            } else if dirs.contains(&Direction::Input) {
                Direction::Input
            } else {
                Direction::InOut
            };
            module.terminals_mut().push(Terminal::new(net, direction));
        }
        for inst in selected {
            module.instances_mut().push(inst);
        }
        rebuild_module(&mut module, &views, false)?;

        self.modules_mut().push(module);
        self.modules()
            .get(name)
            .ok_or_else(|| RebuildError::ModuleNotFound(ArcStr::from(name)))
    }
}

/// Rebuilds one module against the given master views.
pub fn rebuild_module(
    module: &mut Module,
    views: &HashMap<ArcStr, MasterView>,
    verilog_style: bool,
) -> Result<(), RebuildError> {
    for instance in module.instances_mut().iter_mut() {
        let master = instance
            .reference()
            .module_name()
            .and_then(|name| views.get(name.as_str()));
        rebuild_instance(instance, master, verilog_style)?;
    }
    regenerate_nets(module);
    Ok(())
}

/// Regenerates a module's net collection from its connectivity.
///
/// The new collection is the union of the module's terminal names and
/// every net referenced by an instance connection, in discovery order
/// (terminals first, then instances in declaration order).
pub fn regenerate_nets(module: &mut Module) {
    let mut names: IndexSet<ArcStr> = module.terminals().names().cloned().collect();
    for instance in module.instances() {
        for net in instance.connection().net_names() {
            names.insert(net.clone());
        }
    }
    module.nets_mut().clear();
    for name in names {
        module.nets_mut().push(Net::new(name));
    }
}

/// Rebuilds a single instance's connection against its master view.
///
/// `master` is `None` when the reference is designated, unknown, or names
/// a module absent from the design.
pub fn rebuild_instance(
    instance: &mut Instance,
    master: Option<&MasterView>,
    verilog_style: bool,
) -> Result<(), RebuildError> {
    if instance.reference().is_unknown() {
        return Ok(());
    }
    match instance.connection().clone() {
        Connection::ByName(map) => {
            let mut rebuilt: IndexMap<ArcStr, NetDesc> = IndexMap::new();
            for (terminal, desc) in &map {
                match desc {
                    NetDesc::Net(net) => rebuild_scalar_entry(
                        instance.name(),
                        master,
                        verilog_style,
                        terminal,
                        net,
                        &mut rebuilt,
                    )?,
                    NetDesc::Group(nets) => rebuild_group_entry(
                        instance.name(),
                        master,
                        terminal,
                        nets,
                        &mut rebuilt,
                    )?,
                }
            }
            instance.set_connection(Connection::ByName(rebuilt));
        }
        Connection::ByOrder(nets) => {
            let Some(master) = master else {
                tracing::warn!(
                    instance = %instance.name(),
                    "cannot rebuild positional connection without a resolvable master"
                );
                return Ok(());
            };
            if nets.len() != master.terminal_count() {
                return Err(RebuildError::ConnectionCountMismatch {
                    instance: instance.name().clone(),
                    master: master.name().clone(),
                    expected: master.terminal_count(),
                    found: nets.len(),
                });
            }
            let mut rebuilt: IndexMap<ArcStr, NetDesc> = IndexMap::new();
            for (terminal, net) in master.terminal_names().zip(nets.iter()) {
                if let Some(net) = net {
                    rebuilt.insert(terminal.clone(), NetDesc::Net(net.clone()));
                }
            }
            instance.set_connection(Connection::ByName(rebuilt));
        }
    }
    Ok(())
}

fn rebuild_scalar_entry(
    instance: &ArcStr,
    master: Option<&MasterView>,
    verilog_style: bool,
    terminal: &ArcStr,
    net: &ArcStr,
    rebuilt: &mut IndexMap<ArcStr, NetDesc>,
) -> Result<(), RebuildError> {
    let Some(master) = master else {
        rebuilt.insert(terminal.clone(), NetDesc::Net(net.clone()));
        return Ok(());
    };
    if master.has_terminal(terminal) {
        rebuilt.insert(terminal.clone(), NetDesc::Net(net.clone()));
        return Ok(());
    }
    if verilog_style && !crate::escape::is_escaped(terminal) {
        let bus_terms = master.square_bus_terminals(terminal);
        if !bus_terms.is_empty() {
            let bus_nets = master.square_bus_nets(net);
            if bus_nets.is_empty() {
                for (term, net) in expand_term_net_pairs(&bus_terms, net) {
                    rebuilt.insert(term, NetDesc::Net(net));
                }
            } else {
                if bus_terms.len() != bus_nets.len() {
                    return Err(RebuildError::BusWidthMismatch {
                        instance: instance.clone(),
                        terminal: terminal.clone(),
                        terminals: bus_terms.len(),
                        nets: bus_nets.len(),
                    });
                }
                for (term, net) in bus_terms.into_iter().zip(bus_nets) {
                    rebuilt.insert(term, NetDesc::Net(net));
                }
            }
            return Ok(());
        }
    }
    Err(RebuildError::TerminalNotFound {
        instance: instance.clone(),
        terminal: terminal.clone(),
        master: master.name().clone(),
    })
}

fn rebuild_group_entry(
    instance: &ArcStr,
    master: Option<&MasterView>,
    terminal: &ArcStr,
    nets: &[ArcStr],
    rebuilt: &mut IndexMap<ArcStr, NetDesc>,
) -> Result<(), RebuildError> {
    match master {
        Some(master) => {
            let bus_terms = master.bus_terminals(terminal);
            if bus_terms.is_empty() {
                return Err(RebuildError::TerminalNotFound {
                    instance: instance.clone(),
                    terminal: terminal.clone(),
                    master: master.name().clone(),
                });
            }
            if bus_terms.len() != nets.len() {
                return Err(RebuildError::BusWidthMismatch {
                    instance: instance.clone(),
                    terminal: terminal.clone(),
                    terminals: bus_terms.len(),
                    nets: nets.len(),
                });
            }
            for (term, net) in bus_terms.into_iter().zip(nets.iter()) {
                rebuilt.insert(term, NetDesc::Net(net.clone()));
            }
        }
        None => {
            for (term, net) in expand_net_term_pairs(terminal, nets) {
                rebuilt.insert(term, NetDesc::Net(net));
            }
        }
    }
    Ok(())
}
