//! Graph rewriting: recursive assembly flattening and rank projection.
//!
//! [`DeviceGraph::flatten`] replaces assembly devices with their expansion
//! sub-graphs under a selectable stopping policy until (or as far as) only
//! library leaves remain. [`DeviceGraph::follow_links`] projects the graph
//! onto one execution rank: links touching the rank are chased until they
//! terminate at libraries, off-rank assemblies not on those links stay
//! opaque, and everything unreachable from the rank is dropped.
//!
//! Both converge on the same splice primitive: run the assembly's expander
//! into a staging graph, resolve the binding links that map each exposed
//! assembly port to exactly one submodule port, rewrite the external links,
//! and remove the assembly. Expansion depth is bounded; a self-referential
//! assembly fails with [`GraphError::RecursionLimit`] instead of exhausting
//! the stack.

use std::collections::{HashMap, HashSet};

use crate::device::Device;
use crate::error::{GraphError, GraphResult};
use crate::graph::{collect_tree, DeviceGraph, Link, LinkKey};
use crate::port::PortInstance;
use crate::types::Rank;

/// Hard ceiling on assembly expansion depth. An expansion chain that reaches
/// it without bottoming out at library leaves is treated as non-terminating.
pub const MAX_EXPANSION_DEPTH: usize = 128;

/// Stopping policy for [`DeviceGraph::flatten`]. Policies are mutually
/// exclusive per call.
#[derive(Clone, Debug, Default)]
pub enum FlattenPolicy {
    /// Expand every assembly until only library leaves remain.
    #[default]
    Full,
    /// Stop expanding once recursion depth from the original graph reaches
    /// the limit; assemblies at the boundary remain unexpanded.
    Levels(usize),
    /// Expand only the subtree rooted at the device with this name.
    Name(String),
    /// Expand only assemblies whose partition rank equals the given value.
    Rank(Rank),
    /// Expand exactly these assemblies and, transitively, any assembly their
    /// expansions newly expose.
    Expand(Vec<Device>),
}

impl FlattenPolicy {
    fn selects(
        &self,
        device: &Device,
        depth: &HashMap<usize, usize>,
        explicit: &HashSet<usize>,
    ) -> bool {
        match self {
            FlattenPolicy::Full => true,
            FlattenPolicy::Levels(limit) => {
                depth.get(&device.ident()).copied().unwrap_or(0) < *limit
            }
            FlattenPolicy::Name(root) => {
                let name = device.name();
                name == *root || name.starts_with(&format!("{root}."))
            }
            FlattenPolicy::Rank(rank) => device.partition().map(|p| p.rank) == Some(*rank),
            FlattenPolicy::Expand(_) => explicit.contains(&device.ident()),
        }
    }
}

impl DeviceGraph {
    /// Recursively replaces assembly devices with their expansion sub-graphs
    /// under the given stopping policy, rewriting the graph in place.
    ///
    /// With [`FlattenPolicy::Full`] the result contains no assemblies. A
    /// self-referential assembly whose expansion never reaches a library
    /// leaf fails with [`GraphError::RecursionLimit`]; the graph is then in
    /// a partially expanded state and should be discarded.
    pub fn flatten(&mut self, policy: FlattenPolicy) -> GraphResult<()> {
        let mut depth: HashMap<usize, usize> = HashMap::new();
        let mut explicit: HashSet<usize> = match &policy {
            FlattenPolicy::Expand(devices) => devices.iter().map(Device::ident).collect(),
            _ => HashSet::new(),
        };

        loop {
            let targets: Vec<Device> = self
                .devices()
                .filter(|d| d.is_assembly() && policy.selects(d, &depth, &explicit))
                .cloned()
                .collect();
            if targets.is_empty() {
                return Ok(());
            }

            for target in targets {
                let introduced = self.splice_assembly(&target, &mut depth)?;
                if matches!(policy, FlattenPolicy::Expand(_)) {
                    for dev in &introduced {
                        if dev.is_assembly() {
                            explicit.insert(dev.ident());
                        }
                    }
                }
            }
        }
    }

    /// Projects the graph onto one execution rank.
    ///
    /// Starting from the links that touch devices partitioned to `rank`,
    /// assembly endpoints are spliced out until every such link terminates
    /// at a library leaf. Off-rank assemblies that are not endpoints of a
    /// followed link remain as opaque boundary nodes. Devices unreachable
    /// from any target-rank device through links are dropped. Requires a
    /// complete partition assignment; idempotent on its own output.
    pub fn follow_links(&self, rank: Rank) -> GraphResult<DeviceGraph> {
        self.check_partition()?;
        let mut graph = self.clone();
        let mut depth: HashMap<usize, usize> = HashMap::new();

        loop {
            let mut targets: Vec<Device> = Vec::new();
            for link in graph.links() {
                let touches_rank = [&link.a, &link.b]
                    .iter()
                    .any(|p| p.device.partition().map(|pt| pt.rank) == Some(rank));
                if !touches_rank {
                    continue;
                }
                for endpoint in [&link.a, &link.b] {
                    if endpoint.device.is_assembly()
                        && !targets.iter().any(|t| t.same_identity(&endpoint.device))
                    {
                        targets.push(endpoint.device.clone());
                    }
                }
            }
            if targets.is_empty() {
                break;
            }
            tracing::debug!(rank, assemblies = targets.len(), "follow_links round");
            for target in targets {
                graph.splice_assembly(&target, &mut depth)?;
            }
        }

        graph.prune_unreachable(rank);
        Ok(graph)
    }

    /// Substitutes one assembly device with its expansion sub-graph.
    ///
    /// Returns the devices introduced by the expansion. `depth` tracks how
    /// many expansions deep each device was introduced, for both the
    /// `Levels` policy and the recursion ceiling.
    pub(crate) fn splice_assembly(
        &mut self,
        device: &Device,
        depth: &mut HashMap<usize, usize>,
    ) -> GraphResult<Vec<Device>> {
        let expander = device.expander().ok_or_else(|| GraphError::Expansion {
            device: device.name(),
            reason: "device is not an assembly".to_string(),
        })?;

        let next_depth = depth.get(&device.ident()).copied().unwrap_or(0) + 1;
        if next_depth > MAX_EXPANSION_DEPTH {
            return Err(GraphError::RecursionLimit(MAX_EXPANSION_DEPTH));
        }

        let mut stage = DeviceGraph::new();
        expander.expand(device, &mut stage)?;

        // Partition bindings (assembly port -> submodule port) from internal
        // links of the expansion.
        let mut bindings: HashMap<(String, Option<usize>), PortInstance> = HashMap::new();
        let mut internal: Vec<Link> = Vec::new();
        for link in stage.links() {
            let a_is_self = link.a.device.same_identity(device);
            let b_is_self = link.b.device.same_identity(device);
            match (a_is_self, b_is_self) {
                (true, true) => {
                    return Err(GraphError::Expansion {
                        device: device.name(),
                        reason: format!(
                            "binding link {} <-> {} has no submodule endpoint",
                            link.a, link.b
                        ),
                    });
                }
                (true, false) | (false, true) => {
                    let (own, sub) = if a_is_self {
                        (&link.a, &link.b)
                    } else {
                        (&link.b, &link.a)
                    };
                    let slot = (own.descriptor.name.clone(), own.index);
                    if bindings.insert(slot, sub.clone()).is_some() {
                        return Err(GraphError::Expansion {
                            device: device.name(),
                            reason: format!("port {} bound more than once", own),
                        });
                    }
                }
                (false, false) => internal.push(link.clone()),
            }
        }

        let introduced: Vec<Device> = stage
            .devices()
            .filter(|d| !d.same_identity(device) && !self.devices().any(|e| e.same_identity(d)))
            .cloned()
            .collect();

        // Rebind every external link terminating at the assembly before
        // mutating anything; a rebind failure must leave the graph in its
        // last valid state.
        let mut rebound: Vec<(LinkKey, Link)> = Vec::new();
        for (key, link) in &self.links {
            if !link.a.device.same_identity(device) && !link.b.device.same_identity(device) {
                continue;
            }
            let a = rebind(device, link.a.clone(), &bindings)?;
            let b = rebind(device, link.b.clone(), &bindings)?;
            rebound.push((
                key.clone(),
                Link {
                    a,
                    b,
                    latency: link.latency.clone(),
                },
            ));
        }

        // New devices inherit the assembly's partition unless the expander
        // assigned one.
        if let Some(partition) = device.partition() {
            for dev in &introduced {
                if dev.partition().is_none() {
                    dev.set_partition(partition.rank, partition.thread);
                }
            }
        }

        self.register_batch(&introduced)?;
        for dev in &introduced {
            depth.insert(dev.ident(), next_depth);
        }

        for link in internal {
            let key = LinkKey::new(&link.a, &link.b);
            self.links.insert(key, link);
        }

        for (key, link) in rebound {
            self.links.shift_remove(&key);
            tracing::debug!(a = %link.a, b = %link.b, assembly = %device.name(), "rewrote link");
            self.links.insert(LinkKey::new(&link.a, &link.b), link);
        }

        self.remove_device(device);
        Ok(introduced)
    }

    /// Drops every device not reachable through links from a device on the
    /// target rank, along with the links among dropped devices. Submodule
    /// trees and ancestor chains of kept devices are preserved.
    fn prune_unreachable(&mut self, rank: Rank) {
        let mut keep: HashSet<usize> = HashSet::new();
        let mut frontier: Vec<Device> = self.devices_on_rank(rank);
        for dev in &frontier {
            keep.insert(dev.ident());
        }

        // Adjacency over the link table.
        let mut adjacent: HashMap<usize, Vec<Device>> = HashMap::new();
        for link in self.links.values() {
            adjacent
                .entry(link.a.device.ident())
                .or_default()
                .push(link.b.device.clone());
            adjacent
                .entry(link.b.device.ident())
                .or_default()
                .push(link.a.device.clone());
        }

        while let Some(dev) = frontier.pop() {
            for neighbor in adjacent.get(&dev.ident()).cloned().unwrap_or_default() {
                if keep.insert(neighbor.ident()) {
                    frontier.push(neighbor);
                }
            }
        }

        // Keep submodule trees of kept devices and the ancestor chain of
        // every kept device (a submodule cannot exist without its parent).
        let kept_devices: Vec<Device> = self
            .devices
            .values()
            .filter(|d| keep.contains(&d.ident()))
            .cloned()
            .collect();
        for dev in kept_devices {
            for sub in collect_tree(&dev) {
                keep.insert(sub.ident());
            }
            let mut current = dev;
            while let Some(parent) = current.parent() {
                keep.insert(parent.ident());
                current = parent;
            }
        }

        let before = self.devices.len();
        self.devices.retain(|_, d| keep.contains(&d.ident()));
        self.links.retain(|_, l| {
            keep.contains(&l.a.device.ident()) && keep.contains(&l.b.device.ident())
        });
        tracing::debug!(rank, dropped = before - self.devices.len(), "pruned off-rank devices");
    }
}

fn rebind(
    assembly: &Device,
    endpoint: PortInstance,
    bindings: &HashMap<(String, Option<usize>), PortInstance>,
) -> GraphResult<PortInstance> {
    if !endpoint.device.same_identity(assembly) {
        return Ok(endpoint);
    }
    bindings
        .get(&(endpoint.descriptor.name.clone(), endpoint.index))
        .cloned()
        .ok_or_else(|| GraphError::Expansion {
            device: assembly.name(),
            reason: format!("external link at {} has no binding", endpoint),
        })
}
