use compositor_protocol::geometry::scale_to_floored_size;
use compositor_protocol::{
    CompositorFrame, CompositorFrameAck, CompositorFrameSwappedAckParams,
    OutputSurfaceEpoch, ReclaimCompositorResourcesParams, ReturnedResource, SharedMemoryHandle,
    Size, SurfaceId, SurfaceSequence, TransferableResource,
};
use frame_resources::{
    DelegatedFrameProvider, DelegatedFrameResourceCollection, ResourceError, UnusedResources,
};
use layer_tree::{LayerId, LayerTree, SharedLayerTree, SurfaceDependencyUpdate};
use log::{debug, trace};

use crate::config::CompositingConfig;
use crate::container::ChildFrameContainer;
use crate::recipient::FrameRecipient;

/// What the helper currently shows under its background layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositingMode {
    Uncomposited,
    DelegatedFrame,
    SurfaceReference,
}

enum ContentLayer {
    None,
    Delegated {
        layer: LayerId,
        provider: DelegatedFrameProvider,
    },
    Surface {
        layer: LayerId,
    },
}

impl ContentLayer {
    fn layer(&self) -> Option<LayerId> {
        match self {
            ContentLayer::None => None,
            ContentLayer::Delegated { layer, .. } | ContentLayer::Surface { layer } => Some(*layer),
        }
    }
}

/// Stitches the output of one cross-process child frame into the embedder's
/// layer tree.
///
/// The child either delegates whole compositor frames, whose resources are
/// tracked per output surface epoch and acknowledged back, or points at a
/// surface it renders itself. A helper never shows both at once.
pub struct ChildFrameCompositingHelper {
    layer_tree: SharedLayerTree,
    recipient: Box<dyn FrameRecipient>,
    container: Option<Box<dyn ChildFrameContainer>>,
    config: CompositingConfig,
    background_layer: Option<LayerId>,
    content: ContentLayer,
    resource_collection: Option<DelegatedFrameResourceCollection>,
    last_epoch: Option<OutputSurfaceEpoch>,
    ack_pending: bool,
    opaque: bool,
    buffer_size: Size,
}

impl ChildFrameCompositingHelper {
    pub fn new(
        layer_tree: SharedLayerTree,
        recipient: Box<dyn FrameRecipient>,
        container: Box<dyn ChildFrameContainer>,
        config: CompositingConfig,
    ) -> Self {
        Self {
            layer_tree,
            recipient,
            container: Some(container),
            config,
            background_layer: None,
            content: ContentLayer::None,
            resource_collection: None,
            last_epoch: None,
            // Nothing can be acknowledged before the first commit.
            ack_pending: true,
            opaque: config.opaque_by_default,
            buffer_size: Size::zero(),
        }
    }

    pub fn mode(&self) -> CompositingMode {
        match self.content {
            ContentLayer::None => CompositingMode::Uncomposited,
            ContentLayer::Delegated { .. } => CompositingMode::DelegatedFrame,
            ContentLayer::Surface { .. } => CompositingMode::SurfaceReference,
        }
    }

    pub fn background_layer(&self) -> Option<LayerId> {
        self.background_layer
    }

    pub fn delegated_layer(&self) -> Option<LayerId> {
        match self.content {
            ContentLayer::Delegated { layer, .. } => Some(layer),
            _ => None,
        }
    }

    pub fn surface_layer(&self) -> Option<LayerId> {
        match self.content {
            ContentLayer::Surface { layer } => Some(layer),
            _ => None,
        }
    }

    pub fn ack_pending(&self) -> bool {
        self.ack_pending
    }

    pub fn epoch(&self) -> Option<OutputSurfaceEpoch> {
        self.last_epoch
    }

    pub fn is_compositing_enabled(&self) -> bool {
        self.background_layer.is_some()
    }

    pub fn has_container(&self) -> bool {
        self.container.is_some()
    }

    pub fn outstanding_resource_count(&self) -> usize {
        self.resource_collection
            .as_ref()
            .map_or(0, DelegatedFrameResourceCollection::outstanding_resource_count)
    }

    pub fn enable_compositing(&mut self, enable: bool) {
        if enable && self.background_layer.is_none() {
            let mut tree = self.layer_tree.borrow_mut();
            let background = tree.create_solid_color_layer(self.config.background_color);
            if let Ok(layer) = tree.layer_mut(background) {
                layer.set_masks_to_bounds(true);
            }
            self.background_layer = Some(background);
        }
        let web_layer = if enable { self.background_layer } else { None };
        if let Some(container) = self.container.as_mut() {
            container.set_web_layer(web_layer);
        }
    }

    pub fn on_compositor_frame_swapped(
        &mut self,
        frame: CompositorFrame,
        epoch: OutputSurfaceEpoch,
        shared_memory: Option<SharedMemoryHandle>,
    ) {
        let Some(frame_data) = frame.delegated_frame_data else {
            trace!("compositor frame without delegated data for {epoch:?} ignored");
            return;
        };
        let Some(background) = self.background_layer else {
            debug!("compositor frame for {epoch:?} arrived after the background layer was destroyed");
            return;
        };
        if let Some(handle) = shared_memory {
            trace!("ignoring shared memory {handle:?} of a delegated frame");
        }
        if matches!(self.content, ContentLayer::Surface { .. }) {
            panic!("delegated frame swapped while the child frame shows a surface");
        }
        let Some(root_pass) = frame_data.root_pass() else {
            panic!("delegated frame must contain at least one render pass");
        };
        let frame_size = root_pass.output_rect.size;
        let device_scale_factor = frame.metadata.device_scale_factor;

        if self.last_epoch != Some(epoch) {
            self.reset_resources_for_epoch(epoch);
        }
        let collection = self.resource_collection.get_or_insert_with(|| {
            let mut collection = DelegatedFrameResourceCollection::new(epoch);
            collection.set_client_attached(true);
            collection
        });

        let mut unused = UnusedResources::None;
        let mut created = false;
        let layer = match &mut self.content {
            ContentLayer::Delegated { layer, provider } if provider.frame_size() == frame_size => {
                unused = provider.set_frame_data(collection, frame_data);
                *layer
            }
            content => {
                if let ContentLayer::Delegated { layer, provider } =
                    std::mem::replace(content, ContentLayer::None)
                {
                    unused = provider.release(collection);
                    satisfy_all(
                        self.recipient.as_ref(),
                        self.layer_tree.borrow_mut().destroy_layer(layer),
                    );
                }
                let provider = DelegatedFrameProvider::new(collection, frame_data);
                let layer = self
                    .layer_tree
                    .borrow_mut()
                    .create_delegated_renderer_layer(frame_size);
                created = true;
                *content = ContentLayer::Delegated { layer, provider };
                layer
            }
        };

        if let ContentLayer::Delegated { provider, .. } = &mut self.content {
            let mut tree = self.layer_tree.borrow_mut();
            tree.set_delegated_frame(
                layer,
                provider.frame_size(),
                provider.revision(),
                provider.take_damage(),
            )
            .expect("delegated layer belongs to the helper's tree");
            attach_content(&mut tree, background, layer);
            if let Ok(entry) = tree.layer_mut(layer) {
                entry.set_contents_opaque(self.opaque);
            }
        }

        self.check_size_and_adjust_layer_properties(frame_size, device_scale_factor, layer, created);
        if unused.is_available() {
            self.unused_resources_are_available();
        }
        self.ack_pending = true;
    }

    pub fn on_set_surface(
        &mut self,
        surface_id: SurfaceId,
        frame_size: Size,
        scale_factor: f32,
        sequence: SurfaceSequence,
    ) {
        let Some(background) = self.background_layer else {
            debug!("surface {surface_id:?} arrived after the background layer was destroyed");
            self.recipient.satisfy_dependency(sequence);
            return;
        };
        if matches!(self.content, ContentLayer::Delegated { .. }) {
            panic!("surface set while the child frame shows delegated frames");
        }

        let (layer, created) = match self.content {
            ContentLayer::Surface { layer } => (layer, false),
            _ => {
                let layer = self.layer_tree.borrow_mut().create_surface_layer();
                self.content = ContentLayer::Surface { layer };
                (layer, true)
            }
        };
        let update = self
            .layer_tree
            .borrow_mut()
            .set_surface_id(layer, surface_id, scale_factor, frame_size)
            .expect("surface layer belongs to the helper's tree");
        self.forward_surface_dependencies(update);

        self.update_visibility(true);
        self.set_contents_opaque(self.opaque);
        attach_content(&mut self.layer_tree.borrow_mut(), background, layer);

        // The producer keeps the surface alive until this sequence is satisfied.
        self.recipient.satisfy_dependency(sequence);
        self.check_size_and_adjust_layer_properties(frame_size, scale_factor, layer, created);
    }

    /// Sends the pending frame acknowledgement, carrying every resource that
    /// became unused since the previous one.
    pub fn did_commit_compositor_frame(&mut self) {
        if !self.ack_pending {
            return;
        }
        let (Some(collection), Some(epoch)) = (self.resource_collection.as_mut(), self.last_epoch)
        else {
            return;
        };
        let resources = collection.take_unused_resources_for_child_compositor();
        trace!(
            "acknowledging frame of {epoch:?} with {} returned resources",
            resources.len()
        );
        self.recipient.send_ack(CompositorFrameSwappedAckParams {
            producing_epoch: epoch,
            ack: CompositorFrameAck { resources },
        });
        self.ack_pending = false;
    }

    /// Takes compositor-side references on the resources of the frame being
    /// shown, as a draw of the delegated layer does. Hand the returned list to
    /// [`Self::release_resources`] once the draw no longer needs them.
    pub fn ref_resources_for_draw(&mut self) -> Option<(OutputSurfaceEpoch, Vec<ReturnedResource>)> {
        let ContentLayer::Delegated { provider, .. } = &self.content else {
            return None;
        };
        let collection = self.resource_collection.as_mut()?;
        let resources = &provider.frame_data().resource_list;
        collection.ref_resources(resources);
        Some((
            collection.epoch(),
            TransferableResource::return_resources(resources),
        ))
    }

    pub fn release_resources(
        &mut self,
        epoch: OutputSurfaceEpoch,
        returned: &[ReturnedResource],
    ) -> Result<(), ResourceError> {
        let Some(collection) = self.resource_collection.as_mut() else {
            debug!(
                "{} resources of {epoch:?} released after the collection was dropped",
                returned.len()
            );
            return Ok(());
        };
        if collection.unref_resources(epoch, returned)?.is_available() {
            self.unused_resources_are_available();
        }
        Ok(())
    }

    pub fn set_contents_opaque(&mut self, opaque: bool) {
        self.opaque = opaque;
        let mut tree = self.layer_tree.borrow_mut();
        if let Some(layer) = self.content.layer()
            && let Ok(entry) = tree.layer_mut(layer)
        {
            entry.set_contents_opaque(opaque);
        }
        if !opaque
            && let Some(background) = self.background_layer
            && let Ok(entry) = tree.layer_mut(background)
        {
            entry.set_is_drawable(false);
        }
    }

    pub fn update_visibility(&mut self, visible: bool) {
        let Some(layer) = self.content.layer() else {
            return;
        };
        if let Ok(entry) = self.layer_tree.borrow_mut().layer_mut(layer) {
            entry.set_is_drawable(visible);
        }
    }

    /// Paints the placeholder for a crashed or gone child. Content state is
    /// kept so that a reconnecting child can resume.
    pub fn child_frame_gone(&mut self) {
        let Some(background) = self.background_layer else {
            return;
        };
        let mut tree = self.layer_tree.borrow_mut();
        if let Err(error) = tree.remove_all_children(background) {
            trace!("background layer already gone: {error}");
        }
        if let Ok(entry) = tree.layer_mut(background) {
            entry.set_background_color(self.config.gone_color);
            entry.set_is_drawable(true);
            entry.set_contents_opaque(true);
        }
    }

    /// Tears the helper down. Safe to call more than once.
    pub fn on_container_destroy(&mut self) {
        self.did_commit_compositor_frame();

        if let Some(mut container) = self.container.take() {
            container.set_web_layer(None);
        }
        if let Some(collection) = self.resource_collection.as_mut() {
            collection.set_client_attached(false);
        }
        self.ack_pending = false;

        let content = std::mem::replace(&mut self.content, ContentLayer::None);
        let mut satisfied = Vec::new();
        {
            let mut tree = self.layer_tree.borrow_mut();
            match content {
                ContentLayer::None => {}
                ContentLayer::Delegated { layer, provider } => {
                    if let Some(collection) = self.resource_collection.as_mut() {
                        let _ = provider.release(collection);
                    }
                    satisfied.extend(tree.destroy_layer(layer));
                }
                ContentLayer::Surface { layer } => satisfied.extend(tree.destroy_layer(layer)),
            }
            if let Some(background) = self.background_layer.take() {
                satisfied.extend(tree.destroy_layer(background));
            }
        }
        satisfy_all(self.recipient.as_ref(), satisfied);
        self.resource_collection = None;
    }

    /// Resource ids are only meaningful within the epoch that minted them, so
    /// a new epoch reports everything tracked so far as lost.
    fn reset_resources_for_epoch(&mut self, epoch: OutputSurfaceEpoch) {
        if let Some(previous) = self.last_epoch {
            debug!("output surface changed from {previous:?} to {epoch:?}; dropping resources");
        }
        self.last_epoch = Some(epoch);
        let content = std::mem::replace(&mut self.content, ContentLayer::None);
        let Some(mut collection) = self.resource_collection.take() else {
            return;
        };
        collection.set_client_attached(false);
        let lost = collection.lose_all_resources();
        if let ContentLayer::Delegated { layer, provider } = content {
            let _ = provider.release(&mut collection);
            satisfy_all(
                self.recipient.as_ref(),
                self.layer_tree.borrow_mut().destroy_layer(layer),
            );
        }
        if lost {
            self.send_returned_delegated_resources(&mut collection);
        }
    }

    fn unused_resources_are_available(&mut self) {
        if self.ack_pending {
            return;
        }
        if let Some(mut collection) = self.resource_collection.take() {
            self.send_returned_delegated_resources(&mut collection);
            self.resource_collection = Some(collection);
        }
    }

    fn send_returned_delegated_resources(&self, collection: &mut DelegatedFrameResourceCollection) {
        let resources = collection.take_unused_resources_for_child_compositor();
        if resources.is_empty() {
            return;
        }
        self.recipient.reclaim_resources(ReclaimCompositorResourcesParams {
            epoch: collection.epoch(),
            ack: CompositorFrameAck { resources },
        });
    }

    fn forward_surface_dependencies(&self, update: SurfaceDependencyUpdate) {
        if let Some(sequence) = update.satisfied {
            self.recipient.satisfy_dependency(sequence);
        }
        if let Some((surface_id, sequence)) = update.required {
            self.recipient.require_dependency(surface_id, sequence);
        }
    }

    fn check_size_and_adjust_layer_properties(
        &mut self,
        new_size: Size,
        device_scale_factor: f32,
        layer: LayerId,
        layer_created: bool,
    ) {
        let mut tree = self.layer_tree.borrow_mut();
        if self.buffer_size != new_size || layer_created {
            self.buffer_size = new_size;
            // Buffers are in physical pixels, layers in DIPs.
            let bounds = scale_to_floored_size(new_size, device_scale_factor);
            if let Ok(entry) = tree.layer_mut(layer) {
                entry.set_bounds(bounds);
            }
        }
        // A transparent child must not show the background through it.
        if !self.opaque
            && let Some(background) = self.background_layer
            && let Ok(entry) = tree.layer_mut(background)
        {
            entry.set_is_drawable(false);
        }
    }
}

impl Drop for ChildFrameCompositingHelper {
    fn drop(&mut self) {
        self.on_container_destroy();
    }
}

fn attach_content(tree: &mut LayerTree, background: LayerId, layer: LayerId) {
    let attached = tree
        .layer(layer)
        .is_ok_and(|entry| entry.parent() == Some(background));
    if !attached {
        tree.add_child(background, layer)
            .expect("content layer can be attached to the background layer");
    }
}

fn satisfy_all(recipient: &dyn FrameRecipient, sequences: Vec<SurfaceSequence>) {
    for sequence in sequences {
        recipient.satisfy_dependency(sequence);
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use compositor_protocol::geometry::{rect, size};
    use compositor_protocol::{
        Color, CompositorFrame, CompositorFrameMetadata, DelegatedFrameData, HostMessage,
        HostMessageBody, Mailbox, MailboxHolder, OutputSurfaceEpoch, RenderPass, RenderPassId,
        ResourceFormat, ResourceId, SurfaceId, SurfaceSequence, SyncPoint, TransferableResource,
    };
    use crossbeam_channel::Receiver;
    use frame_resources::ResourceError;
    use layer_tree::{LayerId, LayerTree, SharedLayerTree};

    use super::{ChildFrameCompositingHelper, CompositingMode};
    use crate::config::CompositingConfig;
    use crate::container::ChildFrameContainer;
    use crate::recipient::FrameProxyRecipient;

    const EPOCH: OutputSurfaceEpoch = OutputSurfaceEpoch::new(1, 1, 1);

    struct RecordingContainer(Rc<RefCell<Vec<Option<LayerId>>>>);

    impl ChildFrameContainer for RecordingContainer {
        fn set_web_layer(&mut self, layer: Option<LayerId>) {
            self.0.borrow_mut().push(layer);
        }
    }

    struct Fixture {
        tree: SharedLayerTree,
        helper: ChildFrameCompositingHelper,
        messages: Receiver<HostMessage>,
        web_layers: Rc<RefCell<Vec<Option<LayerId>>>>,
    }

    impl Fixture {
        fn new() -> Self {
            let tree = LayerTree::new(7).into_shared();
            let (sender, messages) = crossbeam_channel::unbounded();
            let web_layers = Rc::new(RefCell::new(Vec::new()));
            let mut helper = ChildFrameCompositingHelper::new(
                tree.clone(),
                Box::new(FrameProxyRecipient::new(40, sender)),
                Box::new(RecordingContainer(web_layers.clone())),
                CompositingConfig::default(),
            );
            helper.enable_compositing(true);
            Self {
                tree,
                helper,
                messages,
                web_layers,
            }
        }

        fn sent(&self) -> Vec<HostMessageBody> {
            self.messages.try_iter().map(|message| message.body).collect()
        }

        fn layer_bounds(&self, layer: LayerId) -> compositor_protocol::Size {
            self.tree.borrow().layer(layer).expect("layer").bounds()
        }
    }

    fn resource(id: u32) -> TransferableResource {
        TransferableResource {
            id: ResourceId(id),
            format: ResourceFormat::Rgba8888,
            size: size(16, 16),
            mailbox_holder: MailboxHolder {
                mailbox: Mailbox::from_counter(9, id as u64),
                texture_target: 0x0DE1,
                sync_point: SyncPoint::NONE,
            },
            is_software: false,
            is_overlay_candidate: false,
        }
    }

    fn frame(width: i32, height: i32, ids: &[u32], device_scale_factor: f32) -> CompositorFrame {
        CompositorFrame {
            metadata: CompositorFrameMetadata {
                device_scale_factor,
                latency_info: Vec::new(),
            },
            delegated_frame_data: Some(Box::new(DelegatedFrameData {
                device_scale_factor,
                resource_list: ids.iter().copied().map(resource).collect(),
                render_pass_list: vec![RenderPass {
                    id: RenderPassId {
                        layer_id: 1,
                        index: 0,
                    },
                    output_rect: rect(0, 0, width, height),
                    damage_rect: rect(0, 0, width, height),
                    quads: Vec::new(),
                }],
            })),
        }
    }

    fn returned_ids(body: &HostMessageBody) -> Vec<ResourceId> {
        let resources = match body {
            HostMessageBody::CompositorFrameSwappedAck(params) => &params.ack.resources,
            HostMessageBody::ReclaimCompositorResources(params) => &params.ack.resources,
            other => panic!("expected a resource message, got {other:?}"),
        };
        resources.iter().map(|resource| resource.id).collect()
    }

    #[test]
    fn swapped_frame_is_acknowledged_exactly_once() {
        let mut fixture = Fixture::new();

        fixture
            .helper
            .on_compositor_frame_swapped(frame(100, 100, &[], 1.0), EPOCH, None);

        let layer = fixture.helper.delegated_layer().expect("delegated layer");
        assert_eq!(fixture.helper.mode(), CompositingMode::DelegatedFrame);
        assert_eq!(fixture.layer_bounds(layer), size(100, 100));
        assert!(fixture.helper.ack_pending());
        assert!(fixture.sent().is_empty());

        fixture.helper.did_commit_compositor_frame();
        let sent = fixture.sent();
        assert_eq!(sent.len(), 1);
        let HostMessageBody::CompositorFrameSwappedAck(params) = &sent[0] else {
            panic!("expected an ack, got {:?}", sent[0]);
        };
        assert_eq!(params.producing_epoch, EPOCH);
        assert!(!fixture.helper.ack_pending());

        fixture.helper.did_commit_compositor_frame();
        assert!(fixture.sent().is_empty());
    }

    #[test]
    fn layer_bounds_are_scaled_to_dips() {
        let mut fixture = Fixture::new();
        fixture
            .helper
            .on_compositor_frame_swapped(frame(101, 60, &[], 2.0), EPOCH, None);

        let layer = fixture.helper.delegated_layer().expect("delegated layer");
        assert_eq!(fixture.layer_bounds(layer), size(50, 30));
        let tree = fixture.tree.borrow();
        let background = fixture.helper.background_layer().expect("background");
        assert_eq!(tree.layer(layer).expect("layer").parent(), Some(background));
    }

    #[test]
    fn zero_sized_frame_is_shown_until_a_sized_frame_arrives() {
        let mut fixture = Fixture::new();
        fixture
            .helper
            .on_compositor_frame_swapped(frame(0, 0, &[], 1.0), EPOCH, None);

        let empty_layer = fixture.helper.delegated_layer().expect("delegated layer");
        assert_eq!(fixture.layer_bounds(empty_layer), size(0, 0));
        assert_eq!(
            fixture.tree.borrow().layer(empty_layer).expect("layer").damaged_region(),
            None
        );
        assert!(fixture.helper.ack_pending());

        fixture
            .helper
            .on_compositor_frame_swapped(frame(100, 100, &[], 1.0), EPOCH, None);

        let layer = fixture.helper.delegated_layer().expect("delegated layer");
        assert_ne!(layer, empty_layer);
        assert!(!fixture.tree.borrow().contains(empty_layer));
        assert_eq!(fixture.layer_bounds(layer), size(100, 100));
    }

    #[test]
    fn epoch_change_reports_previous_resources_as_lost() {
        let mut fixture = Fixture::new();
        fixture
            .helper
            .on_compositor_frame_swapped(frame(50, 50, &[1, 2], 1.0), EPOCH, None);
        let first_layer = fixture.helper.delegated_layer().expect("first layer");

        let next_epoch = OutputSurfaceEpoch::new(1, 2, 1);
        fixture
            .helper
            .on_compositor_frame_swapped(frame(50, 50, &[1], 1.0), next_epoch, None);

        let sent = fixture.sent();
        assert_eq!(sent.len(), 1);
        let HostMessageBody::ReclaimCompositorResources(params) = &sent[0] else {
            panic!("expected a reclaim, got {:?}", sent[0]);
        };
        assert_eq!(params.epoch, EPOCH);
        assert_eq!(returned_ids(&sent[0]), vec![ResourceId(1), ResourceId(2)]);
        assert!(params.ack.resources.iter().all(|resource| resource.lost));

        assert_eq!(fixture.helper.epoch(), Some(next_epoch));
        assert_eq!(fixture.helper.outstanding_resource_count(), 1);
        let second_layer = fixture.helper.delegated_layer().expect("second layer");
        assert_ne!(first_layer, second_layer);
        assert!(!fixture.tree.borrow().contains(first_layer));
        assert_eq!(fixture.layer_bounds(second_layer), size(50, 50));
    }

    #[test]
    fn replaced_frame_resources_are_reclaimed_when_no_ack_is_pending() {
        let mut fixture = Fixture::new();
        fixture
            .helper
            .on_compositor_frame_swapped(frame(20, 20, &[1], 1.0), EPOCH, None);
        fixture.helper.did_commit_compositor_frame();
        fixture.sent();

        fixture
            .helper
            .on_compositor_frame_swapped(frame(20, 20, &[2], 1.0), EPOCH, None);

        let sent = fixture.sent();
        assert_eq!(sent.len(), 1);
        assert!(matches!(
            sent[0],
            HostMessageBody::ReclaimCompositorResources(_)
        ));
        assert_eq!(returned_ids(&sent[0]), vec![ResourceId(1)]);

        fixture.helper.did_commit_compositor_frame();
        let sent = fixture.sent();
        assert_eq!(sent.len(), 1);
        assert!(returned_ids(&sent[0]).is_empty());
    }

    #[test]
    fn unused_resources_ride_on_pending_ack() {
        let mut fixture = Fixture::new();
        fixture
            .helper
            .on_compositor_frame_swapped(frame(20, 20, &[1], 1.0), EPOCH, None);
        fixture
            .helper
            .on_compositor_frame_swapped(frame(20, 20, &[2], 1.0), EPOCH, None);
        assert!(fixture.sent().is_empty());

        fixture.helper.did_commit_compositor_frame();
        let sent = fixture.sent();
        assert_eq!(sent.len(), 1);
        assert!(matches!(sent[0], HostMessageBody::CompositorFrameSwappedAck(_)));
        assert_eq!(returned_ids(&sent[0]), vec![ResourceId(1)]);
    }

    #[test]
    fn draw_references_delay_return_until_released() {
        let mut fixture = Fixture::new();
        fixture
            .helper
            .on_compositor_frame_swapped(frame(20, 20, &[1], 1.0), EPOCH, None);
        let (epoch, drawn) = fixture
            .helper
            .ref_resources_for_draw()
            .expect("frame to draw");
        fixture.helper.did_commit_compositor_frame();
        fixture
            .helper
            .on_compositor_frame_swapped(frame(20, 20, &[2], 1.0), EPOCH, None);
        fixture.helper.did_commit_compositor_frame();
        fixture.sent();

        assert_eq!(
            fixture
                .helper
                .release_resources(OutputSurfaceEpoch::new(9, 9, 9), &drawn),
            Err(ResourceError::StaleEpoch {
                expected: EPOCH,
                actual: OutputSurfaceEpoch::new(9, 9, 9),
            })
        );
        fixture
            .helper
            .release_resources(epoch, &drawn)
            .expect("release drawn resources");

        let sent = fixture.sent();
        assert_eq!(sent.len(), 1);
        assert!(matches!(
            sent[0],
            HostMessageBody::ReclaimCompositorResources(_)
        ));
        assert_eq!(returned_ids(&sent[0]), vec![ResourceId(1)]);
    }

    #[test]
    fn container_destroy_is_idempotent() {
        let mut fixture = Fixture::new();
        fixture
            .helper
            .on_compositor_frame_swapped(frame(30, 30, &[3], 1.0), EPOCH, None);

        fixture.helper.on_container_destroy();
        let sent = fixture.sent();
        assert_eq!(sent.len(), 1);
        assert!(matches!(sent[0], HostMessageBody::CompositorFrameSwappedAck(_)));
        assert_eq!(fixture.web_layers.borrow().last(), Some(&None));

        for _ in 0..2 {
            assert_eq!(fixture.helper.background_layer(), None);
            assert_eq!(fixture.helper.delegated_layer(), None);
            assert_eq!(fixture.helper.surface_layer(), None);
            assert!(!fixture.helper.ack_pending());
            assert!(!fixture.helper.has_container());
            assert!(fixture.tree.borrow().is_empty());
            fixture.helper.on_container_destroy();
        }
        assert!(fixture.sent().is_empty());
        assert_eq!(fixture.web_layers.borrow().len(), 2);
    }

    #[test]
    #[should_panic(expected = "surface set while the child frame shows delegated frames")]
    fn surface_after_delegated_frame_is_rejected() {
        let mut fixture = Fixture::new();
        fixture
            .helper
            .on_compositor_frame_swapped(frame(10, 10, &[], 1.0), EPOCH, None);
        fixture.helper.on_set_surface(
            SurfaceId::new(2, 1),
            size(10, 10),
            1.0,
            SurfaceSequence::new(2, 1),
        );
    }

    #[test]
    #[should_panic(expected = "delegated frame swapped while the child frame shows a surface")]
    fn delegated_frame_after_surface_is_rejected() {
        let mut fixture = Fixture::new();
        fixture.helper.on_set_surface(
            SurfaceId::new(2, 1),
            size(10, 10),
            1.0,
            SurfaceSequence::new(2, 1),
        );
        fixture
            .helper
            .on_compositor_frame_swapped(frame(10, 10, &[], 1.0), EPOCH, None);
    }

    #[test]
    #[should_panic(expected = "at least one render pass")]
    fn frame_without_render_passes_is_rejected() {
        let mut fixture = Fixture::new();
        let empty = CompositorFrame {
            metadata: CompositorFrameMetadata::default(),
            delegated_frame_data: Some(Box::new(DelegatedFrameData {
                device_scale_factor: 1.0,
                resource_list: Vec::new(),
                render_pass_list: Vec::new(),
            })),
        };
        fixture.helper.on_compositor_frame_swapped(empty, EPOCH, None);
    }

    #[test]
    fn set_surface_tracks_destruction_dependencies() {
        let mut fixture = Fixture::new();
        let first = SurfaceId::new(2, 1);
        let second = SurfaceId::new(2, 2);

        fixture
            .helper
            .on_set_surface(first, size(30, 20), 1.0, SurfaceSequence::new(2, 10));
        assert_eq!(
            fixture.sent(),
            vec![
                HostMessageBody::RequireSequence {
                    surface_id: first,
                    sequence: SurfaceSequence::new(7, 1),
                },
                HostMessageBody::SatisfySequence(SurfaceSequence::new(2, 10)),
            ]
        );
        let layer = fixture.helper.surface_layer().expect("surface layer");
        assert_eq!(fixture.helper.mode(), CompositingMode::SurfaceReference);
        assert_eq!(fixture.layer_bounds(layer), size(30, 20));

        fixture
            .helper
            .on_set_surface(second, size(30, 20), 1.0, SurfaceSequence::new(2, 11));
        assert_eq!(
            fixture.sent(),
            vec![
                HostMessageBody::SatisfySequence(SurfaceSequence::new(7, 1)),
                HostMessageBody::RequireSequence {
                    surface_id: second,
                    sequence: SurfaceSequence::new(7, 2),
                },
                HostMessageBody::SatisfySequence(SurfaceSequence::new(2, 11)),
            ]
        );
        assert_eq!(fixture.helper.surface_layer(), Some(layer));

        fixture.helper.on_container_destroy();
        assert_eq!(
            fixture.sent(),
            vec![HostMessageBody::SatisfySequence(SurfaceSequence::new(7, 2))]
        );
    }

    #[test]
    fn child_frame_gone_paints_placeholder_and_allows_reconnect() {
        let mut fixture = Fixture::new();
        fixture
            .helper
            .on_compositor_frame_swapped(frame(40, 40, &[1], 1.0), EPOCH, None);
        let background = fixture.helper.background_layer().expect("background");

        fixture.helper.child_frame_gone();
        {
            let tree = fixture.tree.borrow();
            let entry = tree.layer(background).expect("background");
            assert_eq!(entry.background_color(), Color::GONE_GREEN);
            assert!(entry.children().is_empty());
            assert!(entry.is_drawable());
            assert!(entry.contents_opaque());
        }
        assert_eq!(fixture.helper.mode(), CompositingMode::DelegatedFrame);

        fixture
            .helper
            .on_compositor_frame_swapped(frame(40, 40, &[2], 1.0), EPOCH, None);
        let layer = fixture.helper.delegated_layer().expect("delegated layer");
        assert_eq!(
            fixture.tree.borrow().layer(background).expect("background").children(),
            &[layer]
        );
    }

    #[test]
    fn updates_without_background_layer_are_ignored() {
        let tree = LayerTree::new(7).into_shared();
        let (sender, messages) = crossbeam_channel::unbounded();
        let web_layers = Rc::new(RefCell::new(Vec::new()));
        let mut helper = ChildFrameCompositingHelper::new(
            tree.clone(),
            Box::new(FrameProxyRecipient::new(40, sender)),
            Box::new(RecordingContainer(web_layers)),
            CompositingConfig::default(),
        );

        helper.on_compositor_frame_swapped(frame(10, 10, &[1], 1.0), EPOCH, None);
        helper.child_frame_gone();
        helper.did_commit_compositor_frame();

        assert_eq!(helper.mode(), CompositingMode::Uncomposited);
        assert!(tree.borrow().is_empty());
        assert!(messages.try_recv().is_err());

        helper.on_set_surface(
            SurfaceId::new(2, 1),
            size(10, 10),
            1.0,
            SurfaceSequence::new(2, 5),
        );
        assert_eq!(
            messages.try_recv().expect("satisfy").body,
            HostMessageBody::SatisfySequence(SurfaceSequence::new(2, 5))
        );
    }

    #[test]
    fn transparent_contents_hide_background() {
        let mut fixture = Fixture::new();
        fixture.helper.set_contents_opaque(false);
        fixture
            .helper
            .on_compositor_frame_swapped(frame(10, 10, &[], 1.0), EPOCH, None);

        let tree = fixture.tree.borrow();
        let background = fixture.helper.background_layer().expect("background");
        let layer = fixture.helper.delegated_layer().expect("delegated");
        assert!(!tree.layer(background).expect("background").is_drawable());
        assert!(!tree.layer(layer).expect("layer").contents_opaque());
    }

    #[test]
    fn disabling_compositing_detaches_from_container() {
        let mut fixture = Fixture::new();
        let background = fixture.helper.background_layer().expect("background");

        fixture.helper.enable_compositing(false);
        fixture.helper.enable_compositing(true);

        assert_eq!(
            *fixture.web_layers.borrow(),
            vec![Some(background), None, Some(background)]
        );
    }
}
