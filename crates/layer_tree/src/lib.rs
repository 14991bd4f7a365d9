//! Embedder-side compositing layer graph.
//!
//! Layers live in a slot map and reference each other by [`LayerId`]. A
//! destroyed layer's id never resolves again, so holders of stale ids observe
//! [`LayerTreeError::UnknownLayer`] instead of touching a reused slot.

use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

use compositor_protocol::geometry::union_rect;
use compositor_protocol::{Color, Mailbox, Rect, Size, SurfaceId, SurfaceSequence};
use log::trace;
use slotmap::SlotMap;

slotmap::new_key_type! {
    pub struct LayerId;
}

/// The compositor thread's layer tree, shared by every helper and reflector
/// that lives on that thread.
pub type SharedLayerTree = Rc<RefCell<LayerTree>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerKind {
    SolidColor,
    DelegatedRenderer,
    Surface,
    Texture,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelegatedRendererContent {
    pub frame_size: Size,
    pub frame_revision: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceContent {
    pub surface_id: SurfaceId,
    pub surface_scale: f32,
    pub surface_size: Size,
    destroy_sequence: Option<SurfaceSequence>,
}

impl SurfaceContent {
    pub fn destroy_sequence(&self) -> Option<SurfaceSequence> {
        self.destroy_sequence
    }
}

/// Content of a layer that shows a texture produced elsewhere, as used by
/// mirroring layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureContent {
    mailbox: Option<Mailbox>,
    texture_size: Size,
    flipped: bool,
    show_solid_color: bool,
}

impl Default for TextureContent {
    fn default() -> Self {
        Self {
            mailbox: None,
            texture_size: Size::zero(),
            flipped: false,
            show_solid_color: false,
        }
    }
}

impl TextureContent {
    pub fn mailbox(&self) -> Option<Mailbox> {
        self.mailbox
    }

    pub fn texture_size(&self) -> Size {
        self.texture_size
    }

    pub fn flipped(&self) -> bool {
        self.flipped
    }

    pub fn shows_solid_color(&self) -> bool {
        self.show_solid_color
    }

    pub fn set_mailbox(&mut self, mailbox: Mailbox, texture_size: Size) {
        self.mailbox = Some(mailbox);
        self.texture_size = texture_size;
        self.show_solid_color = false;
    }

    pub fn set_texture_size(&mut self, texture_size: Size) {
        self.texture_size = texture_size;
    }

    pub fn set_flipped(&mut self, flipped: bool) {
        self.flipped = flipped;
    }

    /// Drops the texture and falls back to the layer's background color.
    pub fn show_solid_color(&mut self) {
        self.mailbox = None;
        self.show_solid_color = true;
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LayerContent {
    SolidColor,
    DelegatedRenderer(DelegatedRendererContent),
    Surface(SurfaceContent),
    Texture(TextureContent),
}

impl LayerContent {
    pub fn kind(&self) -> LayerKind {
        match self {
            LayerContent::SolidColor => LayerKind::SolidColor,
            LayerContent::DelegatedRenderer(_) => LayerKind::DelegatedRenderer,
            LayerContent::Surface(_) => LayerKind::Surface,
            LayerContent::Texture(_) => LayerKind::Texture,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Layer {
    parent: Option<LayerId>,
    children: Vec<LayerId>,
    bounds: Size,
    masks_to_bounds: bool,
    is_drawable: bool,
    hidden: bool,
    contents_opaque: bool,
    background_color: Color,
    damaged_region: Option<Rect>,
    content: LayerContent,
}

impl Layer {
    fn new(content: LayerContent) -> Self {
        Self {
            parent: None,
            children: Vec::new(),
            bounds: Size::zero(),
            masks_to_bounds: false,
            is_drawable: false,
            hidden: false,
            contents_opaque: false,
            background_color: Color::TRANSPARENT,
            damaged_region: None,
            content,
        }
    }

    pub fn parent(&self) -> Option<LayerId> {
        self.parent
    }

    pub fn children(&self) -> &[LayerId] {
        &self.children
    }

    pub fn bounds(&self) -> Size {
        self.bounds
    }

    pub fn masks_to_bounds(&self) -> bool {
        self.masks_to_bounds
    }

    pub fn is_drawable(&self) -> bool {
        self.is_drawable
    }

    pub fn hidden(&self) -> bool {
        self.hidden
    }

    pub fn contents_opaque(&self) -> bool {
        self.contents_opaque
    }

    pub fn background_color(&self) -> Color {
        self.background_color
    }

    pub fn damaged_region(&self) -> Option<Rect> {
        self.damaged_region
    }

    pub fn content(&self) -> &LayerContent {
        &self.content
    }

    pub fn kind(&self) -> LayerKind {
        self.content.kind()
    }

    pub fn set_bounds(&mut self, bounds: Size) {
        self.bounds = bounds;
    }

    pub fn set_masks_to_bounds(&mut self, masks_to_bounds: bool) {
        self.masks_to_bounds = masks_to_bounds;
    }

    pub fn set_is_drawable(&mut self, is_drawable: bool) {
        self.is_drawable = is_drawable;
    }

    pub fn set_hidden(&mut self, hidden: bool) {
        self.hidden = hidden;
    }

    pub fn set_contents_opaque(&mut self, contents_opaque: bool) {
        self.contents_opaque = contents_opaque;
    }

    pub fn set_background_color(&mut self, color: Color) {
        self.background_color = color;
    }

    /// Adds `rect` to the damaged region. The region is kept as a bounding box.
    pub fn schedule_paint(&mut self, rect: Rect) {
        self.damaged_region = Some(union_rect(self.damaged_region, rect));
    }

    pub fn take_damaged_region(&mut self) -> Option<Rect> {
        self.damaged_region.take()
    }

    pub fn texture(&self) -> Option<&TextureContent> {
        match &self.content {
            LayerContent::Texture(texture) => Some(texture),
            _ => None,
        }
    }

    pub fn texture_mut(&mut self) -> Option<&mut TextureContent> {
        match &mut self.content {
            LayerContent::Texture(texture) => Some(texture),
            _ => None,
        }
    }

    pub fn texture_flipped(&self) -> bool {
        self.texture().is_some_and(TextureContent::flipped)
    }

    pub fn surface(&self) -> Option<&SurfaceContent> {
        match &self.content {
            LayerContent::Surface(surface) => Some(surface),
            _ => None,
        }
    }

    pub fn delegated(&self) -> Option<&DelegatedRendererContent> {
        match &self.content {
            LayerContent::DelegatedRenderer(delegated) => Some(delegated),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerTreeError {
    UnknownLayer {
        layer: LayerId,
    },
    WrongLayerKind {
        layer: LayerId,
        expected: LayerKind,
        actual: LayerKind,
    },
    WouldCreateCycle {
        parent: LayerId,
        child: LayerId,
    },
}

impl fmt::Display for LayerTreeError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayerTreeError::UnknownLayer { layer } => {
                write!(formatter, "layer {layer:?} does not exist")
            }
            LayerTreeError::WrongLayerKind {
                layer,
                expected,
                actual,
            } => write!(
                formatter,
                "layer {layer:?} is a {actual:?} layer, expected {expected:?}"
            ),
            LayerTreeError::WouldCreateCycle { parent, child } => write!(
                formatter,
                "adding layer {child:?} under {parent:?} would create a cycle"
            ),
        }
    }
}

impl std::error::Error for LayerTreeError {}

/// What the destruction-dependency bookkeeping of a surface layer changed.
/// Callers forward both halves to whoever produces the surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SurfaceDependencyUpdate {
    pub satisfied: Option<SurfaceSequence>,
    pub required: Option<(SurfaceId, SurfaceSequence)>,
}

#[derive(Debug)]
pub struct LayerTree {
    layers: SlotMap<LayerId, Layer>,
    surface_id_namespace: u32,
    next_surface_sequence: u32,
}

impl LayerTree {
    /// `surface_id_namespace` names this compositor in the surface sequences
    /// it mints; it must be non-zero.
    pub fn new(surface_id_namespace: u32) -> Self {
        assert!(
            surface_id_namespace != 0,
            "surface id namespace 0 is reserved for null sequences"
        );
        Self {
            layers: SlotMap::with_key(),
            surface_id_namespace,
            next_surface_sequence: 1,
        }
    }

    pub fn into_shared(self) -> SharedLayerTree {
        Rc::new(RefCell::new(self))
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn contains(&self, layer: LayerId) -> bool {
        self.layers.contains_key(layer)
    }

    pub fn layer(&self, layer: LayerId) -> Result<&Layer, LayerTreeError> {
        self.layers
            .get(layer)
            .ok_or(LayerTreeError::UnknownLayer { layer })
    }

    pub fn layer_mut(&mut self, layer: LayerId) -> Result<&mut Layer, LayerTreeError> {
        self.layers
            .get_mut(layer)
            .ok_or(LayerTreeError::UnknownLayer { layer })
    }

    pub fn create_solid_color_layer(&mut self, color: Color) -> LayerId {
        let mut layer = Layer::new(LayerContent::SolidColor);
        layer.background_color = color;
        layer.is_drawable = true;
        self.layers.insert(layer)
    }

    pub fn create_delegated_renderer_layer(&mut self, frame_size: Size) -> LayerId {
        let mut layer = Layer::new(LayerContent::DelegatedRenderer(DelegatedRendererContent {
            frame_size,
            frame_revision: 0,
        }));
        layer.is_drawable = true;
        self.layers.insert(layer)
    }

    pub fn create_surface_layer(&mut self) -> LayerId {
        self.layers.insert(Layer::new(LayerContent::Surface(SurfaceContent {
            surface_id: SurfaceId::default(),
            surface_scale: 1.0,
            surface_size: Size::zero(),
            destroy_sequence: None,
        })))
    }

    pub fn create_texture_layer(&mut self) -> LayerId {
        let mut layer = Layer::new(LayerContent::Texture(TextureContent::default()));
        layer.is_drawable = true;
        self.layers.insert(layer)
    }

    pub fn create_surface_sequence(&mut self) -> SurfaceSequence {
        let sequence = SurfaceSequence::new(self.surface_id_namespace, self.next_surface_sequence);
        self.next_surface_sequence = self
            .next_surface_sequence
            .checked_add(1)
            .expect("surface sequence space exhausted");
        sequence
    }

    pub fn add_child(&mut self, parent: LayerId, child: LayerId) -> Result<(), LayerTreeError> {
        self.layer(parent)?;
        self.layer(child)?;
        if parent == child || self.is_ancestor(child, parent) {
            return Err(LayerTreeError::WouldCreateCycle { parent, child });
        }
        self.remove_from_parent(child)?;
        self.layers[child].parent = Some(parent);
        self.layers[parent].children.push(child);
        Ok(())
    }

    pub fn remove_from_parent(&mut self, child: LayerId) -> Result<(), LayerTreeError> {
        let Some(parent) = self.layer(child)?.parent else {
            return Ok(());
        };
        if let Some(parent_layer) = self.layers.get_mut(parent) {
            parent_layer.children.retain(|id| *id != child);
        }
        self.layers[child].parent = None;
        Ok(())
    }

    pub fn remove_all_children(&mut self, parent: LayerId) -> Result<Vec<LayerId>, LayerTreeError> {
        let children = std::mem::take(&mut self.layer_mut(parent)?.children);
        for child in &children {
            if let Some(layer) = self.layers.get_mut(*child) {
                layer.parent = None;
            }
        }
        Ok(children)
    }

    /// Points a surface layer at `surface_id`. The dependency on the previous
    /// surface is satisfied and a new one is required for the new surface.
    pub fn set_surface_id(
        &mut self,
        layer: LayerId,
        surface_id: SurfaceId,
        surface_scale: f32,
        surface_size: Size,
    ) -> Result<SurfaceDependencyUpdate, LayerTreeError> {
        let actual = self.layer(layer)?.kind();
        if actual != LayerKind::Surface {
            return Err(LayerTreeError::WrongLayerKind {
                layer,
                expected: LayerKind::Surface,
                actual,
            });
        }
        let required = if surface_id.is_null() {
            None
        } else {
            Some((surface_id, self.create_surface_sequence()))
        };

        let LayerContent::Surface(surface) = &mut self.layers[layer].content else {
            unreachable!("layer kind checked above");
        };
        let satisfied = surface.destroy_sequence.take();
        surface.surface_id = surface_id;
        surface.surface_scale = surface_scale;
        surface.surface_size = surface_size;
        surface.destroy_sequence = required.map(|(_, sequence)| sequence);
        let has_content = !surface_id.is_null();
        self.layers[layer].is_drawable = has_content;

        trace!(
            "surface layer {layer:?} now shows {surface_id:?} (satisfied={satisfied:?} required={required:?})"
        );
        Ok(SurfaceDependencyUpdate {
            satisfied,
            required,
        })
    }

    pub fn set_delegated_frame(
        &mut self,
        layer: LayerId,
        frame_size: Size,
        frame_revision: u64,
        damage: Option<Rect>,
    ) -> Result<(), LayerTreeError> {
        let target = self.layer_mut(layer)?;
        let actual = target.kind();
        let LayerContent::DelegatedRenderer(delegated) = &mut target.content else {
            return Err(LayerTreeError::WrongLayerKind {
                layer,
                expected: LayerKind::DelegatedRenderer,
                actual,
            });
        };
        delegated.frame_size = frame_size;
        delegated.frame_revision = frame_revision;
        if let Some(damage) = damage {
            target.schedule_paint(damage);
        }
        Ok(())
    }

    /// Destroys `layer` and its whole subtree. Returns the destruction
    /// sequences of surface layers in the subtree, which the caller must
    /// satisfy. Destroying an unknown layer is a no-op.
    pub fn destroy_layer(&mut self, layer: LayerId) -> Vec<SurfaceSequence> {
        if !self.contains(layer) {
            return Vec::new();
        }
        let _ = self.remove_from_parent(layer);

        let mut satisfied = Vec::new();
        let mut pending = vec![layer];
        while let Some(next) = pending.pop() {
            let Some(removed) = self.layers.remove(next) else {
                continue;
            };
            if let LayerContent::Surface(surface) = removed.content
                && let Some(sequence) = surface.destroy_sequence
            {
                satisfied.push(sequence);
            }
            pending.extend(removed.children);
        }
        satisfied
    }

    /// Ids of `root` and everything below it, parents before children.
    pub fn subtree(&self, root: LayerId) -> Vec<LayerId> {
        let mut ordered = Vec::new();
        let mut visited = HashSet::new();
        let mut pending = vec![root];
        while let Some(next) = pending.pop() {
            let Some(layer) = self.layers.get(next) else {
                continue;
            };
            if !visited.insert(next) {
                continue;
            }
            ordered.push(next);
            pending.extend(layer.children.iter().rev().copied());
        }
        ordered
    }

    fn is_ancestor(&self, candidate: LayerId, layer: LayerId) -> bool {
        let mut current = self.layers.get(layer).and_then(|entry| entry.parent);
        while let Some(parent) = current {
            if parent == candidate {
                return true;
            }
            current = self.layers.get(parent).and_then(|entry| entry.parent);
        }
        false
    }
}
