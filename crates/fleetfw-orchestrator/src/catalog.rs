//! Firmware catalog and upgrade path resolution
//!
//! Vendors publish upgrade chains such as `1.0.0 -> 1.5.0 -> 2.0.0`, meaning a
//! host on 1.0.0 must pass through 1.5.0 before it may install 2.0.0. Each
//! model/component pair gets a [`VersionGraph`]: an arena of version nodes with
//! an index from canonical version to node. Graphs are checked for cycles when
//! the catalog is loaded, so path resolution never loops.

use std::collections::{HashMap, HashSet, VecDeque};

use fleetfw_errors::{CatalogError, FleetError};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::{ComponentType, Criticality};
use crate::version::FirmwareVersion;

fn default_step_duration() -> u32 {
    15
}

fn default_true() -> bool {
    true
}

/// Catalog declaration for one model/component pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Hardware model
    pub model: String,
    /// Component type
    pub component: ComponentType,
    /// Version hosts should end up on
    pub target_version: String,
    /// Criticality of the target release
    pub criticality: Criticality,
    /// Minutes per flash step
    #[serde(default = "default_step_duration")]
    pub step_duration_minutes: u32,
    /// Whether the firmware activates only after a host reboot
    #[serde(default = "default_true")]
    pub requires_reboot: bool,
    /// Tie-break for ordering components of equal criticality and precedence
    #[serde(default)]
    pub update_sequence_order: u32,
    /// Require every installed version to appear in a declared chain
    #[serde(default)]
    pub strict_paths: bool,
    /// Declared upgrade chains, oldest version first
    #[serde(default)]
    pub upgrade_chains: Vec<Vec<String>>,
}

/// Serializable catalog, as stored on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogDocument {
    /// All entries
    #[serde(default)]
    pub entries: Vec<CatalogEntry>,
}

/// What the catalog says about one model/component pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogTarget {
    /// Target version
    pub version: String,
    /// Declared upgrade chains
    pub upgrade_chains: Vec<Vec<String>>,
    /// Release criticality
    pub criticality: Criticality,
    /// Minutes per flash step
    pub step_duration_minutes: u32,
    /// Reboot needed to activate
    pub requires_reboot: bool,
    /// Ordering tie-break
    pub update_sequence_order: u32,
}

/// Source of target firmware and upgrade paths.
pub trait FirmwareCatalog: Send + Sync {
    /// Target firmware for a model/component pair, `None` if untracked.
    fn target(&self, model: &str, component: ComponentType) -> Option<CatalogTarget>;

    /// Versions to install, in order, to get from `current` to the target.
    ///
    /// The last element is the target. An empty result means `current` is
    /// already at or beyond the target.
    fn resolve_path(
        &self,
        model: &str,
        component: ComponentType,
        current: &str,
    ) -> Result<Vec<String>, FleetError>;
}

#[derive(Debug, Clone)]
struct VersionNode {
    version: String,
    edges: Vec<usize>,
}

/// Directed acyclic graph of declared upgrade hops.
#[derive(Debug, Clone, Default)]
pub struct VersionGraph {
    nodes: Vec<VersionNode>,
    index: HashMap<String, usize>,
}

impl VersionGraph {
    /// Build a graph from upgrade chains, rejecting malformed chains and cycles.
    pub fn from_chains(
        model: &str,
        component: ComponentType,
        chains: &[Vec<String>],
    ) -> Result<Self, CatalogError> {
        let mut graph = Self::default();
        for chain in chains {
            if chain.len() < 2 {
                return Err(CatalogError::EmptyChain {
                    model: model.to_string(),
                    component: component.to_string(),
                });
            }
            let mut ids = Vec::with_capacity(chain.len());
            for raw in chain {
                let version = FirmwareVersion::parse(raw).map_err(|source| {
                    CatalogError::InvalidVersion {
                        model: model.to_string(),
                        component: component.to_string(),
                        version: raw.clone(),
                        source,
                    }
                })?;
                ids.push(graph.intern(&version));
            }
            for pair in ids.windows(2) {
                if let [from, to] = *pair {
                    graph.add_edge(from, to);
                }
            }
        }

        if let Some(version) = graph.find_cycle() {
            return Err(CatalogError::Cycle {
                model: model.to_string(),
                component: component.to_string(),
                version,
            });
        }
        Ok(graph)
    }

    fn intern(&mut self, version: &FirmwareVersion) -> usize {
        let key = version.canonical();
        if let Some(&id) = self.index.get(&key) {
            return id;
        }
        let id = self.nodes.len();
        self.nodes.push(VersionNode {
            version: version.as_str().to_string(),
            edges: Vec::new(),
        });
        self.index.insert(key, id);
        id
    }

    fn add_edge(&mut self, from: usize, to: usize) {
        if let Some(node) = self.nodes.get_mut(from)
            && !node.edges.contains(&to)
        {
            node.edges.push(to);
        }
    }

    fn lookup(&self, version: &FirmwareVersion) -> Option<usize> {
        self.index.get(&version.canonical()).copied()
    }

    /// Number of distinct versions in the graph.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether no chains were declared.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Whether the version appears in any declared chain.
    pub fn contains(&self, version: &FirmwareVersion) -> bool {
        self.lookup(version).is_some()
    }

    // Three-color DFS; returns a version on the first back edge found.
    fn find_cycle(&self) -> Option<String> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            White,
            Gray,
            Black,
        }

        let mut marks = vec![Mark::White; self.nodes.len()];
        for start in 0..self.nodes.len() {
            if marks.get(start) != Some(&Mark::White) {
                continue;
            }
            // (node, next edge index)
            let mut stack = vec![(start, 0usize)];
            if let Some(m) = marks.get_mut(start) {
                *m = Mark::Gray;
            }
            while let Some(frame) = stack.last_mut() {
                let (node, next) = *frame;
                let edge = self.nodes.get(node).and_then(|n| n.edges.get(next)).copied();
                match edge {
                    Some(child) => {
                        frame.1 += 1;
                        match marks.get(child).copied() {
                            Some(Mark::Gray) => {
                                return self.nodes.get(child).map(|n| n.version.clone());
                            }
                            Some(Mark::White) => {
                                if let Some(m) = marks.get_mut(child) {
                                    *m = Mark::Gray;
                                }
                                stack.push((child, 0));
                            }
                            _ => {}
                        }
                    }
                    None => {
                        if let Some(m) = marks.get_mut(node) {
                            *m = Mark::Black;
                        }
                        stack.pop();
                    }
                }
            }
        }
        None
    }

    /// Shortest declared path from `current` to `target`, excluding `current`.
    ///
    /// A direct edge is the shortest path, so it always wins over multi-hop
    /// chains. Returns `None` when either version is absent or unreachable.
    pub fn shortest_path(
        &self,
        current: &FirmwareVersion,
        target: &FirmwareVersion,
    ) -> Option<Vec<String>> {
        let from = self.lookup(current)?;
        let to = self.lookup(target)?;

        let mut parent: HashMap<usize, usize> = HashMap::new();
        let mut seen = HashSet::from([from]);
        let mut queue = VecDeque::from([from]);
        while let Some(node) = queue.pop_front() {
            if node == to {
                break;
            }
            for &child in self.nodes.get(node).map(|n| n.edges.as_slice()).unwrap_or(&[]) {
                if seen.insert(child) {
                    parent.insert(child, node);
                    queue.push_back(child);
                }
            }
        }

        if !seen.contains(&to) || from == to {
            return None;
        }
        let mut hops = Vec::new();
        let mut cursor = to;
        while cursor != from {
            hops.push(self.nodes.get(cursor)?.version.clone());
            cursor = *parent.get(&cursor)?;
        }
        hops.reverse();
        Some(hops)
    }
}

#[derive(Debug, Clone)]
struct ResolvedEntry {
    entry: CatalogEntry,
    target: FirmwareVersion,
    graph: VersionGraph,
}

/// In-memory catalog built from a [`CatalogDocument`].
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    entries: HashMap<(String, ComponentType), ResolvedEntry>,
}

impl StaticCatalog {
    /// Validate a document and build its graphs.
    pub fn from_document(document: CatalogDocument) -> Result<Self, CatalogError> {
        let mut entries = HashMap::new();
        for entry in document.entries {
            let key = (entry.model.clone(), entry.component);
            if entries.contains_key(&key) {
                return Err(CatalogError::DuplicateEntry {
                    model: entry.model,
                    component: entry.component.to_string(),
                });
            }
            let target = FirmwareVersion::parse(&entry.target_version).map_err(|source| {
                CatalogError::InvalidVersion {
                    model: entry.model.clone(),
                    component: entry.component.to_string(),
                    version: entry.target_version.clone(),
                    source,
                }
            })?;
            let graph = VersionGraph::from_chains(&entry.model, entry.component, &entry.upgrade_chains)?;
            entries.insert(
                key,
                ResolvedEntry {
                    entry,
                    target,
                    graph,
                },
            );
        }
        Ok(Self { entries })
    }

    /// Number of model/component entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the catalog has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Distinct models, sorted.
    pub fn models(&self) -> Vec<String> {
        let mut models: Vec<String> = self.entries.keys().map(|(m, _)| m.clone()).collect();
        models.sort();
        models.dedup();
        models
    }
}

impl FirmwareCatalog for StaticCatalog {
    fn target(&self, model: &str, component: ComponentType) -> Option<CatalogTarget> {
        let resolved = self.entries.get(&(model.to_string(), component))?;
        let entry = &resolved.entry;
        Some(CatalogTarget {
            version: entry.target_version.clone(),
            upgrade_chains: entry.upgrade_chains.clone(),
            criticality: entry.criticality,
            step_duration_minutes: entry.step_duration_minutes,
            requires_reboot: entry.requires_reboot,
            update_sequence_order: entry.update_sequence_order,
        })
    }

    fn resolve_path(
        &self,
        model: &str,
        component: ComponentType,
        current: &str,
    ) -> Result<Vec<String>, FleetError> {
        let resolved = self
            .entries
            .get(&(model.to_string(), component))
            .ok_or_else(|| FleetError::not_found("catalog entry", format!("{model}/{component}")))?;
        let target_raw = &resolved.entry.target_version;
        let incompatible = |reason: String| FleetError::IncompatibleUpdate {
            component: component.to_string(),
            from: current.to_string(),
            to: target_raw.clone(),
            reason,
        };

        let installed = FirmwareVersion::parse(current)
            .map_err(|e| incompatible(format!("installed version does not parse: {e}")))?;
        if installed >= resolved.target {
            return Ok(Vec::new());
        }

        if let Some(mut hops) = resolved.graph.shortest_path(&installed, &resolved.target) {
            // Report the target exactly as the catalog spells it.
            if let Some(last) = hops.last_mut() {
                last.clone_from(target_raw);
            }
            debug!(model, %component, current, hops = hops.len(), "Resolved declared upgrade path");
            return Ok(hops);
        }

        if !resolved.graph.contains(&installed) {
            if resolved.entry.strict_paths {
                return Err(incompatible(
                    "installed version is not part of any declared upgrade chain".to_string(),
                ));
            }
            return Ok(vec![target_raw.clone()]);
        }

        Err(incompatible(
            "no declared upgrade chain reaches the target".to_string(),
        ))
    }
}
