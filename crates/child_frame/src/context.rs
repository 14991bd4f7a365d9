use std::collections::BTreeMap;

use compositor_protocol::{ChildFrameEnvelope, ChildFrameMessage, ChildFrameTarget, HostMessage};
use crossbeam_channel::Sender;
use layer_tree::{LayerId, SharedLayerTree};
use log::{debug, trace, warn};

use crate::config::CompositingConfig;
use crate::container::{
    ContainerId, ContainerRegistry, RegisteredContainer, SharedContainerRegistry,
};
use crate::helper::ChildFrameCompositingHelper;
use crate::recipient::{BrowserPluginRecipient, FrameProxyRecipient, FrameRecipient};

/// Compositor-thread owner of every child frame helper of one embedder.
///
/// Helpers share the embedder's layer tree and report upstream through one
/// host channel. Their containers live in an explicit [`ContainerRegistry`]
/// owned here, so tearing the context down releases everything it created.
pub struct CompositingContext {
    layer_tree: SharedLayerTree,
    containers: SharedContainerRegistry,
    sink: Sender<HostMessage>,
    config: CompositingConfig,
    helpers: BTreeMap<ChildFrameTarget, ChildFrameCompositingHelper>,
}

impl CompositingContext {
    pub fn new(
        layer_tree: SharedLayerTree,
        sink: Sender<HostMessage>,
        config: CompositingConfig,
    ) -> Self {
        let containers = ContainerRegistry::new(layer_tree.clone()).into_shared();
        Self {
            layer_tree,
            containers,
            sink,
            config,
            helpers: BTreeMap::new(),
        }
    }

    pub fn layer_tree(&self) -> &SharedLayerTree {
        &self.layer_tree
    }

    pub fn containers(&self) -> &SharedContainerRegistry {
        &self.containers
    }

    pub fn len(&self) -> usize {
        self.helpers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.helpers.is_empty()
    }

    pub fn targets(&self) -> impl Iterator<Item = ChildFrameTarget> + '_ {
        self.helpers.keys().copied()
    }

    pub fn helper(&self, target: ChildFrameTarget) -> Option<&ChildFrameCompositingHelper> {
        self.helpers.get(&target)
    }

    pub fn helper_mut(
        &mut self,
        target: ChildFrameTarget,
    ) -> Option<&mut ChildFrameCompositingHelper> {
        self.helpers.get_mut(&target)
    }

    pub fn create_frame_proxy_helper(
        &mut self,
        routing_id: i32,
        host_routing_id: i32,
        host_layer: Option<LayerId>,
    ) -> ContainerId {
        let recipient = FrameProxyRecipient::new(host_routing_id, self.sink.clone());
        self.insert_helper(
            ChildFrameTarget::FrameProxy { routing_id },
            Box::new(recipient),
            host_layer,
        )
    }

    pub fn create_browser_plugin_helper(
        &mut self,
        instance_id: i32,
        host_routing_id: i32,
        host_layer: Option<LayerId>,
    ) -> ContainerId {
        let recipient =
            BrowserPluginRecipient::new(host_routing_id, instance_id, self.sink.clone());
        self.insert_helper(
            ChildFrameTarget::BrowserPlugin { instance_id },
            Box::new(recipient),
            host_layer,
        )
    }

    /// Creates the helper matching the kind of `target`.
    pub fn attach(
        &mut self,
        target: ChildFrameTarget,
        host_routing_id: i32,
        host_layer: Option<LayerId>,
    ) -> ContainerId {
        match target {
            ChildFrameTarget::FrameProxy { routing_id } => {
                self.create_frame_proxy_helper(routing_id, host_routing_id, host_layer)
            }
            ChildFrameTarget::BrowserPlugin { instance_id } => {
                self.create_browser_plugin_helper(instance_id, host_routing_id, host_layer)
            }
        }
    }

    /// Routes one inbound message to its helper. Returns `false` when no helper
    /// exists for the target, which happens for messages racing a teardown.
    pub fn dispatch(&mut self, envelope: ChildFrameEnvelope) -> bool {
        let ChildFrameEnvelope { target, message } = envelope;
        let Some(helper) = self.helpers.get_mut(&target) else {
            warn!("{} for unknown child frame {target:?} dropped", message.name());
            return false;
        };
        trace!("dispatching {} to {target:?}", message.name());
        match message {
            ChildFrameMessage::CompositorFrameSwapped {
                frame,
                epoch,
                shared_memory,
            } => {
                if !helper.is_compositing_enabled() {
                    helper.enable_compositing(true);
                }
                helper.on_compositor_frame_swapped(frame, epoch, shared_memory);
            }
            ChildFrameMessage::SetChildFrameSurface {
                surface_id,
                frame_size,
                scale_factor,
                sequence,
            } => {
                if !helper.is_compositing_enabled() {
                    helper.enable_compositing(true);
                }
                helper.on_set_surface(surface_id, frame_size, scale_factor, sequence);
            }
            ChildFrameMessage::ChildFrameProcessGone => helper.child_frame_gone(),
        }
        true
    }

    /// Called once the embedder's compositor committed; every helper with a
    /// pending frame acknowledges it.
    pub fn did_commit_compositor_frame(&mut self) {
        for helper in self.helpers.values_mut() {
            helper.did_commit_compositor_frame();
        }
    }

    pub fn destroy_helper(&mut self, target: ChildFrameTarget) -> bool {
        let Some(mut helper) = self.helpers.remove(&target) else {
            return false;
        };
        helper.on_container_destroy();
        drop(helper);

        let container = self.containers.borrow().container_for(target);
        if let Some(id) = container {
            self.containers.borrow_mut().unregister(id);
        }
        debug!("destroyed compositing helper of {target:?}");
        true
    }

    pub fn shutdown(&mut self) {
        let targets = self.helpers.keys().copied().collect::<Vec<_>>();
        for target in targets {
            self.destroy_helper(target);
        }
    }

    fn insert_helper(
        &mut self,
        target: ChildFrameTarget,
        recipient: Box<dyn FrameRecipient>,
        host_layer: Option<LayerId>,
    ) -> ContainerId {
        if self.helpers.contains_key(&target) {
            panic!("child frame {target:?} already has a compositing helper");
        }
        let id = self.containers.borrow_mut().register(target, host_layer);
        let container = RegisteredContainer::new(self.containers.clone(), id);
        let helper = ChildFrameCompositingHelper::new(
            self.layer_tree.clone(),
            recipient,
            Box::new(container),
            self.config,
        );
        self.helpers.insert(target, helper);
        debug!("created compositing helper of {target:?} in container {id:?}");
        id
    }
}

impl Drop for CompositingContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}
