//! Plugin node lifecycle: turning a descriptor into a live engine node.
//!
//! ```text
//! Unloaded -> Instantiating -> Live -> Removed
//!                   \-------------------^  (instantiation failed)
//! ```
//!
//! No state is re-entered after `Removed`.

use chainhost_audio::{AudioGraph, NodeHandle};
use chainhost_plugin::{PluginDescriptor, PluginProvider};

use crate::PatchError;

/// Where a plugin node is in its life
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Descriptor known, no instance requested yet
    Unloaded,
    /// Instance requested from the provider
    Instantiating,
    /// Instance running in the engine under this handle
    Live(NodeHandle),
    /// Released, or never came up
    Removed,
}

impl Lifecycle {
    /// Engine handle while live
    pub fn handle(self) -> Option<NodeHandle> {
        match self {
            Self::Live(handle) => Some(handle),
            Self::Unloaded | Self::Instantiating | Self::Removed => None,
        }
    }

    pub fn is_live(self) -> bool {
        matches!(self, Self::Live(_))
    }

    /// Move to `next`, refusing transitions the lifecycle does not allow
    pub fn transition(self, next: Self) -> Result<Self, PatchError> {
        let allowed = matches!(
            (self, next),
            (Self::Unloaded, Self::Instantiating)
                | (Self::Instantiating, Self::Live(_) | Self::Removed)
                | (Self::Live(_), Self::Removed)
        );
        if allowed {
            Ok(next)
        } else {
            Err(PatchError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}

/// Bring a plugin up in the engine.
///
/// Requests an instance at the engine's current rate and block size, applies
/// `saved_state` (if any) before the engine prepares it, and adds it to the
/// engine. On failure nothing is left registered in the engine. The caller
/// commits with [`AudioGraph::rebuild`].
pub(crate) fn bring_live(
    provider: &dyn PluginProvider,
    graph: &mut AudioGraph,
    descriptor: &PluginDescriptor,
    saved_state: Option<&[u8]>,
) -> Result<Lifecycle, PatchError> {
    let lifecycle = Lifecycle::Unloaded.transition(Lifecycle::Instantiating)?;
    tracing::debug!("Instantiating {} [{}]", descriptor.name, descriptor.format);

    let instantiation_failed = |source| PatchError::Instantiation {
        name: descriptor.name.clone(),
        source,
    };

    let mut plugin = provider
        .create_instance(descriptor, graph.sample_rate(), graph.block_size())
        .map_err(instantiation_failed)?;

    if let Some(state) = saved_state
        && let Err(e) = plugin.set_state(state)
    {
        // Keep the instance with its defaults
        tracing::warn!("Could not restore state of {}: {}", descriptor.name, e);
    }

    let handle = graph.add_node(plugin).map_err(instantiation_failed)?;
    lifecycle.transition(Lifecycle::Live(handle))
}

/// Release a live plugin from the engine. The caller commits.
pub(crate) fn retire(graph: &mut AudioGraph, lifecycle: Lifecycle) -> Result<Lifecycle, PatchError> {
    let removed = lifecycle.transition(Lifecycle::Removed)?;
    if let Some(handle) = lifecycle.handle() {
        graph.remove_node(handle);
    }
    Ok(removed)
}
