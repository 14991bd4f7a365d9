use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use compositor_protocol::ChildFrameTarget;
use layer_tree::{LayerId, SharedLayerTree};
use log::{debug, warn};
use slotmap::SlotMap;

slotmap::new_key_type! {
    pub struct ContainerId;
}

/// Embedder element that displays a child frame: the plugin element of a
/// `<webview>` or the placeholder of a remote frame.
pub trait ChildFrameContainer {
    /// Shows `layer` in the element, or nothing when `None`.
    fn set_web_layer(&mut self, layer: Option<LayerId>);
}

pub type SharedContainerRegistry = Rc<RefCell<ContainerRegistry>>;

#[derive(Debug)]
struct ContainerEntry {
    target: ChildFrameTarget,
    host_layer: Option<LayerId>,
    web_layer: Option<LayerId>,
}

/// Containers of one compositing context, keyed both by handle and by the
/// child frame they display.
pub struct ContainerRegistry {
    layer_tree: SharedLayerTree,
    entries: SlotMap<ContainerId, ContainerEntry>,
    by_target: HashMap<ChildFrameTarget, ContainerId>,
}

impl ContainerRegistry {
    pub fn new(layer_tree: SharedLayerTree) -> Self {
        Self {
            layer_tree,
            entries: SlotMap::with_key(),
            by_target: HashMap::new(),
        }
    }

    pub fn into_shared(self) -> SharedContainerRegistry {
        Rc::new(RefCell::new(self))
    }

    /// Registers the container of `target`. Its web layer is parented under
    /// `host_layer` when one is given.
    pub fn register(&mut self, target: ChildFrameTarget, host_layer: Option<LayerId>) -> ContainerId {
        if self.by_target.contains_key(&target) {
            panic!("child frame {target:?} already has a registered container");
        }
        let id = self.entries.insert(ContainerEntry {
            target,
            host_layer,
            web_layer: None,
        });
        self.by_target.insert(target, id);
        id
    }

    pub fn unregister(&mut self, id: ContainerId) -> Option<ChildFrameTarget> {
        let entry = self.entries.remove(id)?;
        self.by_target.remove(&entry.target);
        if let Some(layer) = entry.web_layer {
            let _ = self.layer_tree.borrow_mut().remove_from_parent(layer);
        }
        Some(entry.target)
    }

    pub fn container_for(&self, target: ChildFrameTarget) -> Option<ContainerId> {
        self.by_target.get(&target).copied()
    }

    pub fn target(&self, id: ContainerId) -> Option<ChildFrameTarget> {
        self.entries.get(id).map(|entry| entry.target)
    }

    pub fn web_layer(&self, id: ContainerId) -> Option<LayerId> {
        self.entries.get(id).and_then(|entry| entry.web_layer)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn set_web_layer(&mut self, id: ContainerId, layer: Option<LayerId>) {
        let Some(entry) = self.entries.get_mut(id) else {
            warn!("web layer set on unregistered container {id:?}");
            return;
        };
        let previous = std::mem::replace(&mut entry.web_layer, layer);
        let host_layer = entry.host_layer;
        let mut tree = self.layer_tree.borrow_mut();
        if let Some(previous) = previous
            && Some(previous) != layer
        {
            let _ = tree.remove_from_parent(previous);
        }
        if let (Some(host_layer), Some(layer)) = (host_layer, layer)
            && let Err(error) = tree.add_child(host_layer, layer)
        {
            warn!("container {id:?} cannot show layer {layer:?}: {error}");
        }
        debug!("container {id:?} now shows {layer:?}");
    }
}

/// A registry entry seen through [`ChildFrameContainer`].
pub struct RegisteredContainer {
    registry: SharedContainerRegistry,
    id: ContainerId,
}

impl RegisteredContainer {
    pub fn new(registry: SharedContainerRegistry, id: ContainerId) -> Self {
        Self { registry, id }
    }

    pub fn id(&self) -> ContainerId {
        self.id
    }
}

impl ChildFrameContainer for RegisteredContainer {
    fn set_web_layer(&mut self, layer: Option<LayerId>) {
        self.registry.borrow_mut().set_web_layer(self.id, layer);
    }
}
