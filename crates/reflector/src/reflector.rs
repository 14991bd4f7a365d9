use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use compositor_protocol::{Mailbox, Rect, Size, Vector};
use layer_tree::{LayerId, LayerKind, LayerTree, LayerTreeError, SharedLayerTree};
use log::{debug, trace, warn};

use crate::output_surface::{OutputSurfaceCapabilities, OutputSurfaceId};

/// A reflector is shared between the output surface it mirrors and the
/// embedder code that adds mirror layers, all on the compositor thread.
pub type SharedReflector = Rc<RefCell<Reflector>>;

/// Identity and capabilities of the output surface being mirrored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceSurface {
    pub id: OutputSurfaceId,
    pub capabilities: OutputSurfaceCapabilities,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirroringLayerError {
    Layer(LayerTreeError),
    AlreadyMirroring { layer: LayerId },
    ShutDown,
}

impl fmt::Display for MirroringLayerError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MirroringLayerError::Layer(error) => error.fmt(formatter),
            MirroringLayerError::AlreadyMirroring { layer } => {
                write!(formatter, "layer {layer:?} already mirrors this reflector")
            }
            MirroringLayerError::ShutDown => write!(formatter, "reflector was shut down"),
        }
    }
}

impl std::error::Error for MirroringLayerError {}

impl From<LayerTreeError> for MirroringLayerError {
    fn from(error: LayerTreeError) -> Self {
        MirroringLayerError::Layer(error)
    }
}

#[derive(Debug, Clone, Copy)]
struct MirroringLayer {
    layer: LayerId,
    needs_set_mailbox: bool,
}

/// Mirrors one output surface into any number of texture layers.
///
/// The source surface pushes notifications after each swap; the reflector
/// rebinds the shared mailbox where needed and damages every mirror layer.
pub struct Reflector {
    layer_tree: SharedLayerTree,
    mirroring_layers: Vec<MirroringLayer>,
    source: Option<SourceSurface>,
    mailbox: Option<Mailbox>,
    flip_texture: bool,
    pending_full_redraws: u32,
    shut_down: bool,
}

impl Reflector {
    pub fn new(layer_tree: SharedLayerTree) -> Self {
        Self {
            layer_tree,
            mirroring_layers: Vec::new(),
            source: None,
            mailbox: None,
            flip_texture: false,
            pending_full_redraws: 0,
            shut_down: false,
        }
    }

    pub fn into_shared(self) -> SharedReflector {
        Rc::new(RefCell::new(self))
    }

    pub fn source(&self) -> Option<SourceSurface> {
        self.source
    }

    pub fn is_attached_to(&self, id: OutputSurfaceId) -> bool {
        self.source.is_some_and(|source| source.id == id)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    /// Whether swaps of the source surface reach at least one layer.
    pub fn is_mirroring(&self) -> bool {
        self.source.is_some() && !self.mirroring_layers.is_empty()
    }

    pub fn mailbox(&self) -> Option<Mailbox> {
        self.mailbox
    }

    /// Mirror layers must show the texture upside down unless the source
    /// already renders flipped.
    pub fn flip_texture(&self) -> bool {
        self.flip_texture
    }

    pub fn mirroring_layers(&self) -> Vec<LayerId> {
        self.mirroring_layers.iter().map(|entry| entry.layer).collect()
    }

    /// Returns `true` once per requested full redraw that no full swap of the
    /// source has satisfied yet. Sources promote a partial swap to a full one
    /// while this holds.
    pub fn take_full_redraw_request(&mut self) -> bool {
        if self.pending_full_redraws == 0 {
            return false;
        }
        self.pending_full_redraws -= 1;
        true
    }

    /// Attaches to `source`, detaching from any previously mirrored surface.
    /// Returns `false` when the reflector was shut down.
    pub fn on_source_surface_ready(&mut self, source: SourceSurface) -> bool {
        if self.shut_down {
            debug!("shut down reflector ignores output surface {:?}", source.id);
            return false;
        }
        if self.source == Some(source) {
            return true;
        }
        if self.source.is_some() {
            self.detach_from_output_surface();
        }
        self.source = Some(source);
        self.flip_texture = !source
            .capabilities
            .contains(OutputSurfaceCapabilities::FLIPPED_OUTPUT_SURFACE);
        self.request_full_redraw();
        debug!(
            "reflector attached to output surface {:?} (flip_texture={})",
            source.id, self.flip_texture
        );
        true
    }

    pub fn on_source_texture_mailbox_updated(&mut self, mailbox: Option<Mailbox>) {
        self.mailbox = mailbox;
        if mailbox.is_some() {
            for entry in &mut self.mirroring_layers {
                entry.needs_set_mailbox = true;
            }
            self.request_full_redraw();
        }
    }

    pub fn add_mirroring_layer(&mut self, layer: LayerId) -> Result<(), MirroringLayerError> {
        if self.shut_down {
            return Err(MirroringLayerError::ShutDown);
        }
        let actual = self.layer_tree.borrow().layer(layer)?.kind();
        if actual != LayerKind::Texture {
            return Err(LayerTreeError::WrongLayerKind {
                layer,
                expected: LayerKind::Texture,
                actual,
            }
            .into());
        }
        if self.mirroring_layers.iter().any(|entry| entry.layer == layer) {
            return Err(MirroringLayerError::AlreadyMirroring { layer });
        }
        self.mirroring_layers.push(MirroringLayer {
            layer,
            needs_set_mailbox: self.mailbox.is_some(),
        });
        self.request_full_redraw();
        Ok(())
    }

    /// Stops mirroring into `layer`, which falls back to its solid color.
    pub fn remove_mirroring_layer(&mut self, layer: LayerId) {
        let Some(index) = self
            .mirroring_layers
            .iter()
            .position(|entry| entry.layer == layer)
        else {
            warn!("layer {layer:?} is not mirroring this reflector");
            return;
        };
        self.mirroring_layers.remove(index);
        show_solid_color(&mut self.layer_tree.borrow_mut(), layer);
        if self.mirroring_layers.is_empty() {
            debug!("reflector has no mirroring layers left");
        }
    }

    /// The whole source surface was repainted.
    pub fn on_source_swap_buffers(&mut self, surface_size: Size) {
        self.pending_full_redraws = 0;
        self.update_layers(surface_size, Rect::from_size(surface_size));
    }

    /// `rect` of the source surface was repainted, in the source's own
    /// coordinates.
    pub fn on_source_post_sub_buffer(&mut self, surface_size: Size, rect: Rect) {
        let damage = if self.flip_texture {
            rect.translate(Vector::new(0, surface_size.height))
                .translate(Vector::new(0, -rect.size.height))
        } else {
            rect
        };
        self.update_layers(surface_size, damage);
    }

    /// Every layer falls back to solid color until a new source attaches.
    pub fn detach_from_output_surface(&mut self) {
        let Some(source) = self.source.take() else {
            return;
        };
        debug!("reflector detached from output surface {:?}", source.id);
        self.mailbox = None;
        let mut tree = self.layer_tree.borrow_mut();
        for entry in &self.mirroring_layers {
            show_solid_color(&mut tree, entry.layer);
        }
    }

    pub fn shutdown(&mut self) {
        self.detach_from_output_surface();
        self.mirroring_layers.clear();
        self.shut_down = true;
    }

    fn request_full_redraw(&mut self) {
        self.pending_full_redraws = self.pending_full_redraws.saturating_add(1);
    }

    fn update_layers(&mut self, surface_size: Size, damage: Rect) {
        if self.mirroring_layers.is_empty() {
            return;
        }
        let Some(mailbox) = self.mailbox else {
            trace!("source swapped before publishing a mailbox; nothing to mirror");
            return;
        };
        let mut tree = self.layer_tree.borrow_mut();
        self.mirroring_layers
            .retain(|entry| tree.contains(entry.layer));
        for entry in &mut self.mirroring_layers {
            let Ok(layer) = tree.layer_mut(entry.layer) else {
                continue;
            };
            let flip_texture = self.flip_texture;
            let Some(texture) = layer.texture_mut() else {
                panic!("mirroring layer {:?} lost its texture content", entry.layer);
            };
            if entry.needs_set_mailbox {
                texture.set_mailbox(mailbox, surface_size);
                entry.needs_set_mailbox = false;
            } else {
                texture.set_texture_size(surface_size);
            }
            texture.set_flipped(flip_texture);
            layer.set_bounds(surface_size);
            layer.schedule_paint(damage);
        }
    }
}

impl Drop for Reflector {
    fn drop(&mut self) {
        if !self.shut_down && !self.mirroring_layers.is_empty() {
            warn!(
                "reflector dropped with {} mirroring layers without shutdown",
                self.mirroring_layers.len()
            );
        }
    }
}

fn show_solid_color(tree: &mut LayerTree, layer: LayerId) {
    match tree.layer_mut(layer) {
        Ok(entry) => {
            if let Some(texture) = entry.texture_mut() {
                texture.show_solid_color();
            }
        }
        Err(error) => trace!("mirror layer already gone: {error}"),
    }
}
