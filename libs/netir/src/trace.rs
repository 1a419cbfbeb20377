//! Connectivity tracing.
//!
//! Starting from a net in a module, tracing finds every instance that
//! connects to the net and, where the instance's master is resolvable,
//! descends into the master through the matched terminal, up to a depth
//! limit. Tracing expects rebuilt connections; positional connections
//! still record a hit but cannot name the terminal.

use arcstr::ArcStr;
use serde::{Deserialize, Serialize};

use crate::rebuild::RebuildError;
use crate::{Connection, Design, Fig, NetDesc};

/// A traced net and everything attached to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    /// The module the net lives in.
    pub module: ArcStr,
    /// The traced net.
    pub net: ArcStr,
    /// The instance attachments found on the net.
    pub hits: Vec<Hit>,
}

/// One instance attachment on a traced net.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hit {
    /// The attached instance.
    pub instance: ArcStr,
    /// The instance's reference name, if it has one.
    pub reference: Option<ArcStr>,
    /// The master terminal the net attaches to, for by-name connections.
    pub terminal: Option<ArcStr>,
    /// The position the net attaches at, for positional connections.
    pub position: Option<usize>,
    /// The continuation of the trace inside the master module.
    pub inner: Option<Box<Route>>,
}

impl Design {
    /// Traces `net` within `module`, descending at most `depth` levels
    /// into resolvable masters.
    pub fn trace_net(
        &self,
        module: &str,
        net: &str,
        depth: usize,
    ) -> Result<Route, RebuildError> {
        let owner = self
            .modules()
            .get(module)
            .ok_or_else(|| RebuildError::ModuleNotFound(ArcStr::from(module)))?;
        let mut route = Route {
            module: owner.name().clone(),
            net: ArcStr::from(net),
            hits: Vec::new(),
        };
        for instance in owner.instances() {
            let reference = instance.reference().name().cloned();
            match instance.connection() {
                Connection::ByName(map) => {
                    for (terminal, desc) in map {
                        let NetDesc::Net(candidate) = desc else { continue };
                        if candidate.as_str() != net {
                            continue;
                        }
                        // Inside the master, the terminal name is also the
                        // name of the attached net.
                        let inner = match (depth, instance.reference().module_name()) {
                            (d, Some(master)) if d > 0 && self.modules().contains(master) => {
                                Some(Box::new(self.trace_net(master, terminal, d - 1)?))
                            }
                            _ => None,
                        };
                        route.hits.push(Hit {
                            instance: instance.name().clone(),
                            reference: reference.clone(),
                            terminal: Some(terminal.clone()),
                            position: None,
                            inner,
                        });
                    }
                }
                Connection::ByOrder(nets) => {
                    for (position, candidate) in nets.iter().enumerate() {
                        if candidate.as_deref() != Some(net) {
                            continue;
                        }
                        route.hits.push(Hit {
                            instance: instance.name().clone(),
                            reference: reference.clone(),
                            terminal: None,
                            position: Some(position),
                            inner: None,
                        });
                    }
                }
            }
        }
        Ok(route)
    }
}
