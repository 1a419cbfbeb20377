//! An intermediate representation for hierarchical netlists.
//!
//! A [`Design`] owns an ordered collection of [`Module`]s. Each module owns
//! its [`Terminal`]s, [`Net`]s, and [`Instance`]s. Instances point at their
//! master module by name through a [`Reference`]; resolution is always lazy,
//! so modules can be parsed and registered in any order.
//!
//! Instance connections are recorded either by terminal name or by terminal
//! position (see [`Connection`]). The [`rebuild`] module converts positional
//! connections to named ones, expands implicit bus connections, and
//! regenerates each module's net collection from its connectivity.
#![warn(missing_docs)]

pub mod escape;
pub mod fig;
pub mod member;
pub mod rebuild;
pub mod trace;

use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;

use arcstr::ArcStr;
use indexmap::IndexMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use fig::{CollectionError, Fig, FigCollection};

/// The direction of a [`Terminal`].
#[derive(
    Copy, Clone, Default, Debug, Eq, PartialEq, Hash, Serialize, Deserialize,
)]
pub enum Direction {
    /// Input.
    Input,
    /// Output.
    Output,
    /// Input or output.
    ///
    /// Represents terminals whose direction is unknown or bidirectional.
    #[default]
    InOut,
}

impl Direction {
    /// Returns the flipped direction.
    ///
    /// [`Direction::InOut`] is unchanged by flipping.
    #[inline]
    pub fn flip(&self) -> Self {
        match *self {
            Self::Input => Self::Output,
            Self::Output => Self::Input,
            Self::InOut => Self::InOut,
        }
    }
}

impl Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Input => write!(f, "input"),
            Self::Output => write!(f, "output"),
            Self::InOut => write!(f, "inout"),
        }
    }
}

/// An error parsing a [`Direction`] from a string.
#[derive(Copy, Clone, Debug, Error)]
#[error("error parsing terminal direction")]
pub struct ParseDirectionError;

impl FromStr for Direction {
    type Err = ParseDirectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "input" => Ok(Self::Input),
            "output" => Ok(Self::Output),
            "inout" => Ok(Self::InOut),
            _ => Err(ParseDirectionError),
        }
    }
}

/// A parameter value: a numeric literal, or an uninterpreted string.
///
/// Values with unit suffixes (`10u`, `1.2K`) do not parse as numerics and
/// are stored as strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    /// A numeric literal.
    Numeric(Decimal),
    /// An uninterpreted string.
    String(ArcStr),
}

impl Value {
    /// Parses a value, preferring a numeric literal.
    pub fn parse(s: &str) -> Self {
        match Decimal::from_str(s) {
            Ok(d) => Self::Numeric(d),
            Err(_) => Self::String(ArcStr::from(s)),
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Numeric(d) => write!(f, "{d}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::parse(value)
    }
}

/// An ordered set of named parameter values.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Params {
    values: IndexMap<ArcStr, Value>,
}

impl Params {
    /// Creates a new, empty parameter set.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a key-value pair, replacing any previous value.
    pub fn insert(&mut self, k: impl Into<ArcStr>, v: impl Into<Value>) {
        self.values.insert(k.into(), v.into());
    }

    /// Gets the value for the given key.
    pub fn get(&self, k: &str) -> Option<&Value> {
        self.values.get(k)
    }

    /// The number of parameters.
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if there are no parameters.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterates over key-value pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&ArcStr, &Value)> {
        self.values.iter()
    }
}

impl<K: Into<ArcStr>, V: Into<Value>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Self::new();
        for (k, v) in iter {
            params.insert(k, v);
        }
        params
    }
}

/// What a [`Connection`] entry attaches to a terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetDesc {
    /// A single net.
    Net(ArcStr),
    /// A fan-out of nets onto the members of a bus terminal.
    Group(Vec<ArcStr>),
}

impl NetDesc {
    /// The scalar net names of this entry, in order.
    pub fn nets(&self) -> &[ArcStr] {
        match self {
            Self::Net(net) => std::slice::from_ref(net),
            Self::Group(nets) => nets,
        }
    }
}

impl From<&str> for NetDesc {
    fn from(value: &str) -> Self {
        Self::Net(ArcStr::from(value))
    }
}

impl From<ArcStr> for NetDesc {
    fn from(value: ArcStr) -> Self {
        Self::Net(value)
    }
}

/// How an [`Instance`] is connected to its master's terminals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Connection {
    /// Connections keyed by terminal name.
    ByName(IndexMap<ArcStr, NetDesc>),
    /// Connections by terminal position.
    ///
    /// `None` marks a floating position.
    ByOrder(Vec<Option<ArcStr>>),
}

impl Default for Connection {
    fn default() -> Self {
        Self::ByName(IndexMap::new())
    }
}

impl Connection {
    /// Builds a by-name connection, dropping floating (`None`) entries.
    pub fn by_name<K, V>(pairs: impl IntoIterator<Item = (K, Option<V>)>) -> Self
    where
        K: Into<ArcStr>,
        V: Into<NetDesc>,
    {
        let mut map = IndexMap::new();
        for (k, v) in pairs {
            if let Some(v) = v {
                map.insert(k.into(), v.into());
            }
        }
        Self::ByName(map)
    }

    /// The number of connection entries.
    pub fn len(&self) -> usize {
        match self {
            Self::ByName(map) => map.len(),
            Self::ByOrder(nets) => nets.len(),
        }
    }

    /// Returns `true` if there are no connection entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All scalar net names referenced by this connection, in order.
    pub fn net_names(&self) -> Vec<&ArcStr> {
        match self {
            Self::ByName(map) => map.values().flat_map(|v| v.nets().iter()).collect(),
            Self::ByOrder(nets) => nets.iter().flatten().collect(),
        }
    }

    /// The by-name map, if this connection is by name.
    pub fn as_by_name(&self) -> Option<&IndexMap<ArcStr, NetDesc>> {
        match self {
            Self::ByName(map) => Some(map),
            Self::ByOrder(_) => None,
        }
    }
}

/// A lazy, by-name reference from an [`Instance`] to its master.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reference {
    /// A reference to a [`Module`], resolved by name at use time.
    Module(ArcStr),
    /// A designated primitive device; never resolved to a module.
    Designate(ArcStr),
    /// An unparseable instance, kept so dumps can reproduce the input.
    Unknown {
        /// The raw source text of the instance.
        raw: ArcStr,
        /// Why the instance could not be parsed.
        reason: ArcStr,
    },
}

impl Reference {
    /// The referenced name, if any.
    pub fn name(&self) -> Option<&ArcStr> {
        match self {
            Self::Module(name) | Self::Designate(name) => Some(name),
            Self::Unknown { .. } => None,
        }
    }

    /// The referenced module name, if this reference can resolve to one.
    pub fn module_name(&self) -> Option<&ArcStr> {
        match self {
            Self::Module(name) => Some(name),
            _ => None,
        }
    }

    /// Returns `true` if this reference marks an unparseable instance.
    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown { .. })
    }
}

/// A terminal of a [`Module`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Terminal {
    name: ArcStr,
    direction: Direction,
}

impl Terminal {
    /// Creates a new terminal.
    pub fn new(name: impl Into<ArcStr>, direction: Direction) -> Self {
        Self {
            name: name.into(),
            direction,
        }
    }

    /// The direction of this terminal.
    #[inline]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Overwrites the direction of this terminal.
    #[inline]
    pub fn set_direction(&mut self, direction: Direction) {
        self.direction = direction;
    }
}

/// A net within a [`Module`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Net {
    name: ArcStr,
}

impl Net {
    /// Creates a new net.
    pub fn new(name: impl Into<ArcStr>) -> Self {
        Self { name: name.into() }
    }
}

/// An instance of a master module (or primitive device) within a [`Module`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    name: ArcStr,
    reference: Reference,
    connection: Connection,
    orderparams: Vec<ArcStr>,
    parameters: Params,
}

impl Instance {
    /// Creates a new instance with an empty connection.
    pub fn new(name: impl Into<ArcStr>, reference: Reference) -> Self {
        Self {
            name: name.into(),
            reference,
            connection: Connection::default(),
            orderparams: Vec::new(),
            parameters: Params::new(),
        }
    }

    /// The reference to this instance's master.
    #[inline]
    pub fn reference(&self) -> &Reference {
        &self.reference
    }

    /// Overwrites the reference to this instance's master.
    #[inline]
    pub fn set_reference(&mut self, reference: Reference) {
        self.reference = reference;
    }

    /// This instance's connection.
    #[inline]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Overwrites this instance's connection.
    #[inline]
    pub fn set_connection(&mut self, connection: Connection) {
        self.connection = connection;
    }

    /// Connects `terminal` by name.
    ///
    /// `None` disconnects the terminal (floating entries are not stored).
    /// A positional connection is converted to by-name form first only by
    /// [`rebuild`]; calling this on a positional connection replaces it
    /// with a by-name connection holding just this entry.
    pub fn connect(&mut self, terminal: impl Into<ArcStr>, net: Option<NetDesc>) {
        let map = match &mut self.connection {
            Connection::ByName(map) => map,
            Connection::ByOrder(_) => {
                self.connection = Connection::default();
                match &mut self.connection {
                    Connection::ByName(map) => map,
                    Connection::ByOrder(_) => unreachable!(),
                }
            }
        };
        let terminal = terminal.into();
        match net {
            Some(net) => {
                map.insert(terminal, net);
            }
            None => {
                map.shift_remove(&terminal);
            }
        }
    }

    /// Positional (unnamed) parameters, in source order.
    #[inline]
    pub fn orderparams(&self) -> &[ArcStr] {
        &self.orderparams
    }

    /// Mutable access to the positional parameters.
    #[inline]
    pub fn orderparams_mut(&mut self) -> &mut Vec<ArcStr> {
        &mut self.orderparams
    }

    /// Named parameters.
    #[inline]
    pub fn parameters(&self) -> &Params {
        &self.parameters
    }

    /// Mutable access to the named parameters.
    #[inline]
    pub fn parameters_mut(&mut self) -> &mut Params {
        &mut self.parameters
    }
}

/// A module definition.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Module {
    name: ArcStr,
    terminals: FigCollection<Terminal>,
    nets: FigCollection<Net>,
    instances: FigCollection<Instance>,
    parameters: Params,
    specparams: Params,
    /// The 1-based line of the definition in its source unit, if known.
    lineno: Option<usize>,
}

impl Module {
    /// Creates a new, empty module.
    pub fn new(name: impl Into<ArcStr>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// The terminals of this module, in declaration order.
    #[inline]
    pub fn terminals(&self) -> &FigCollection<Terminal> {
        &self.terminals
    }

    /// Mutable access to the terminals of this module.
    #[inline]
    pub fn terminals_mut(&mut self) -> &mut FigCollection<Terminal> {
        &mut self.terminals
    }

    /// The nets of this module.
    #[inline]
    pub fn nets(&self) -> &FigCollection<Net> {
        &self.nets
    }

    /// Mutable access to the nets of this module.
    #[inline]
    pub fn nets_mut(&mut self) -> &mut FigCollection<Net> {
        &mut self.nets
    }

    /// The instances of this module, in declaration order.
    #[inline]
    pub fn instances(&self) -> &FigCollection<Instance> {
        &self.instances
    }

    /// Mutable access to the instances of this module.
    #[inline]
    pub fn instances_mut(&mut self) -> &mut FigCollection<Instance> {
        &mut self.instances
    }

    /// The parameters of this module.
    #[inline]
    pub fn parameters(&self) -> &Params {
        &self.parameters
    }

    /// Mutable access to the parameters of this module.
    #[inline]
    pub fn parameters_mut(&mut self) -> &mut Params {
        &mut self.parameters
    }

    /// The specify-block parameters of this module.
    #[inline]
    pub fn specparams(&self) -> &Params {
        &self.specparams
    }

    /// Mutable access to the specify-block parameters of this module.
    #[inline]
    pub fn specparams_mut(&mut self) -> &mut Params {
        &mut self.specparams
    }

    /// The source line of this module's definition, if known.
    #[inline]
    pub fn lineno(&self) -> Option<usize> {
        self.lineno
    }

    /// Records the source line of this module's definition.
    #[inline]
    pub fn set_lineno(&mut self, lineno: Option<usize>) {
        self.lineno = lineno;
    }

    /// The nets of this module referenced by the given instance's
    /// connection, in connection order.
    ///
    /// Only nets already present in this module's net collection are
    /// returned; rebuild first for complete results.
    pub fn nets_of_instance(&self, instance: &str) -> Vec<&Net> {
        let Some(instance) = self.instances.get(instance) else {
            return Vec::new();
        };
        instance
            .connection()
            .net_names()
            .into_iter()
            .filter_map(|name| self.nets.get(name))
            .collect()
    }

    /// The instances of this module whose connections reference the given
    /// net, in declaration order.
    pub fn instances_on_net(&self, net: &str) -> Vec<&Instance> {
        self.instances
            .iter()
            .filter(|inst| {
                inst.connection()
                    .net_names()
                    .iter()
                    .any(|name| name.as_str() == net)
            })
            .collect()
    }
}

/// Provenance of a merged include unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncludeRecord {
    /// The name of the merged design.
    pub name: ArcStr,
    /// The source path of the merged design, if it came from a file.
    pub path: Option<PathBuf>,
    /// The priority of the merged design.
    pub priority: Vec<usize>,
}

/// A design: an ordered collection of modules plus design-level parameters.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Design {
    name: ArcStr,
    path: Option<PathBuf>,
    /// The position of this design in an include tree.
    ///
    /// The root unit has an empty priority; a unit included from line `n`
    /// of a parent with priority `p` has priority `p + [n]`. Lower
    /// priorities (lexicographically) win duplicate-module conflicts.
    priority: Vec<usize>,
    modules: FigCollection<Module>,
    parameters: Params,
    includes: Vec<IncludeRecord>,
}

impl Design {
    /// Creates a new, empty design.
    pub fn new(name: impl Into<ArcStr>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// The source path of this design, if it was parsed from a file.
    #[inline]
    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }

    /// Records the source path of this design.
    #[inline]
    pub fn set_path(&mut self, path: Option<PathBuf>) {
        self.path = path;
    }

    /// The include priority of this design.
    #[inline]
    pub fn priority(&self) -> &[usize] {
        &self.priority
    }

    /// Overwrites the include priority of this design.
    #[inline]
    pub fn set_priority(&mut self, priority: Vec<usize>) {
        self.priority = priority;
    }

    /// The modules of this design, in definition order.
    #[inline]
    pub fn modules(&self) -> &FigCollection<Module> {
        &self.modules
    }

    /// Mutable access to the modules of this design.
    #[inline]
    pub fn modules_mut(&mut self) -> &mut FigCollection<Module> {
        &mut self.modules
    }

    /// The design-level parameters.
    #[inline]
    pub fn parameters(&self) -> &Params {
        &self.parameters
    }

    /// Mutable access to the design-level parameters.
    #[inline]
    pub fn parameters_mut(&mut self) -> &mut Params {
        &mut self.parameters
    }

    /// Provenance records of designs merged into this one.
    #[inline]
    pub fn includes(&self) -> &[IncludeRecord] {
        &self.includes
    }

    /// Merges another design's modules into this one.
    ///
    /// A module name already present here is replaced only if this design
    /// does not outrank the other for that module. Rank is the design
    /// priority extended with the module's definition line, compared
    /// lexicographically; lower ranks win, and a tie goes to the incoming
    /// module.
    pub fn include_design(&mut self, other: Design) {
        let Design {
            name,
            path,
            priority,
            modules,
            parameters,
            includes: _,
        } = other;
        for module in modules {
            match self.modules.get(module.name()) {
                Some(existing) => {
                    let ours = merge_rank(&self.priority, existing.lineno());
                    let theirs = merge_rank(&priority, module.lineno());
                    if ours >= theirs {
                        tracing::debug!(
                            module = %module.name(),
                            "replacing module definition with higher-priority include"
                        );
                        self.modules.push(module);
                    } else {
                        tracing::debug!(
                            module = %module.name(),
                            "keeping existing module definition over lower-priority include"
                        );
                    }
                }
                None => self.modules.push(module),
            }
        }
        for (k, v) in parameters.iter() {
            if self.parameters.get(k).is_none() {
                self.parameters.insert(k.clone(), v.clone());
            }
        }
        self.includes.push(IncludeRecord {
            name,
            path,
            priority,
        });
    }

    /// The modules of this design that no instance references.
    pub fn top_levels(&self) -> Vec<&Module> {
        self.modules
            .iter()
            .filter(|module| {
                !self.modules.iter().any(|m| {
                    m.instances()
                        .iter()
                        .any(|inst| inst.reference().module_name() == Some(module.name()))
                })
            })
            .collect()
    }
}

fn merge_rank(priority: &[usize], lineno: Option<usize>) -> Vec<usize> {
    let mut rank = priority.to_vec();
    if let Some(lineno) = lineno {
        rank.push(lineno);
    }
    rank
}

macro_rules! impl_fig {
    ($($ty:ty),*) => {
        $(
            impl Fig for $ty {
                #[inline]
                fn name(&self) -> &ArcStr {
                    &self.name
                }
                #[inline]
                fn set_name(&mut self, name: ArcStr) {
                    self.name = name;
                }
            }
        )*
    };
}

impl_fig!(Design, Module, Instance, Net, Terminal);

#[cfg(test)]
mod tests;
