//! The slice of a GPU command context the output surfaces and the reflector
//! texture drive.
//!
//! The "framebuffer" is whatever the compositor renders into: the default
//! back buffer of a GPU surface, or a texture bound with
//! [`GpuContext::bind_framebuffer_texture`] by an offscreen surface.

use std::fmt;

use compositor_protocol::geometry::size_is_empty;
use compositor_protocol::{Mailbox, Rect, Size, SyncPoint};
use slotmap::SlotMap;

slotmap::new_key_type! {
    pub struct TextureId;
}

/// Runs once the GPU has passed the sync point it was registered for.
pub type SyncPointCallback = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GpuContextError {
    UnknownTexture {
        texture: TextureId,
    },
    EmptyTextureSize {
        size: Size,
    },
    CopyOutOfBounds {
        rect: Rect,
        source_size: Size,
        destination_size: Size,
    },
    DeviceLost {
        message: String,
    },
}

impl fmt::Display for GpuContextError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpuContextError::UnknownTexture { texture } => {
                write!(formatter, "texture {texture:?} does not exist")
            }
            GpuContextError::EmptyTextureSize { size } => write!(
                formatter,
                "texture size must be positive, got {}x{}",
                size.width, size.height
            ),
            GpuContextError::CopyOutOfBounds {
                rect,
                source_size,
                destination_size,
            } => write!(
                formatter,
                "copy of {rect:?} exceeds source {}x{} or destination {}x{}",
                source_size.width,
                source_size.height,
                destination_size.width,
                destination_size.height
            ),
            GpuContextError::DeviceLost { message } => {
                write!(formatter, "gpu device lost: {message}")
            }
        }
    }
}

impl std::error::Error for GpuContextError {}

pub trait GpuContext {
    fn create_texture(&mut self, size: Size) -> Result<TextureId, GpuContextError>;

    /// Deleting an unknown texture is a no-op.
    fn delete_texture(&mut self, texture: TextureId);

    fn texture_size(&self, texture: TextureId) -> Option<Size>;

    /// Names `texture` so that another context can consume it. Repeated calls
    /// return the same mailbox.
    fn produce_mailbox(&mut self, texture: TextureId) -> Result<Mailbox, GpuContextError>;

    /// Binds `texture` as the render target, or the default back buffer when
    /// `None`.
    fn bind_framebuffer_texture(
        &mut self,
        texture: Option<TextureId>,
    ) -> Result<(), GpuContextError>;

    fn framebuffer_size(&self) -> Size;

    /// Resizes the default back buffer.
    fn resize_back_buffer(&mut self, size: Size) -> Result<(), GpuContextError>;

    /// Reallocates `texture` to `size` and fills it with the framebuffer's
    /// top-left `size` pixels.
    fn copy_framebuffer_to_texture(
        &mut self,
        texture: TextureId,
        size: Size,
    ) -> Result<(), GpuContextError>;

    /// Copies `rect` of the framebuffer into the same rect of `texture`.
    fn copy_framebuffer_sub_image(
        &mut self,
        texture: TextureId,
        rect: Rect,
    ) -> Result<(), GpuContextError>;

    /// Orders previously recorded work before work recorded by other
    /// contexts afterwards.
    fn insert_ordering_barrier(&mut self);

    fn insert_sync_point(&mut self) -> SyncPoint;

    fn signal_sync_point(&mut self, sync_point: SyncPoint, callback: SyncPointCallback);

    fn swap_buffers(&mut self);

    fn partial_swap_buffers(&mut self, rect: Rect);

    /// Drives completion callbacks without blocking.
    fn poll(&mut self) -> Result<(), GpuContextError>;
}

/// Command recorded by [`RecordingGpuContext`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GpuCommand {
    CreateTexture { texture: TextureId, size: Size },
    DeleteTexture { texture: TextureId },
    BindFramebuffer { texture: Option<TextureId> },
    ResizeBackBuffer { size: Size },
    CopyFullImage { texture: TextureId, size: Size },
    CopySubImage { texture: TextureId, rect: Rect },
    OrderingBarrier,
    InsertSyncPoint { sync_point: SyncPoint },
    SwapBuffers,
    PartialSwapBuffers { rect: Rect },
}

#[derive(Debug)]
struct RecordedTexture {
    size: Size,
    mailbox: Option<Mailbox>,
}

/// Headless context that executes nothing and logs every command.
///
/// Sync point callbacks run on the first [`GpuContext::poll`] after they are
/// registered, which models a GPU that finishes all submitted work between
/// polls.
pub struct RecordingGpuContext {
    mailbox_namespace: u32,
    next_mailbox: u64,
    next_sync_point: u32,
    back_buffer_size: Size,
    bound_texture: Option<TextureId>,
    textures: SlotMap<TextureId, RecordedTexture>,
    pending_signals: Vec<(SyncPoint, SyncPointCallback)>,
    commands: Vec<GpuCommand>,
}

impl RecordingGpuContext {
    pub fn new(mailbox_namespace: u32, back_buffer_size: Size) -> Self {
        Self {
            mailbox_namespace,
            next_mailbox: 1,
            next_sync_point: 1,
            back_buffer_size,
            bound_texture: None,
            textures: SlotMap::with_key(),
            pending_signals: Vec::new(),
            commands: Vec::new(),
        }
    }

    pub fn commands(&self) -> &[GpuCommand] {
        &self.commands
    }

    pub fn take_commands(&mut self) -> Vec<GpuCommand> {
        std::mem::take(&mut self.commands)
    }

    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn bound_texture(&self) -> Option<TextureId> {
        self.bound_texture
    }

    pub fn pending_signal_count(&self) -> usize {
        self.pending_signals.len()
    }

    fn texture(&self, texture: TextureId) -> Result<&RecordedTexture, GpuContextError> {
        self.textures
            .get(texture)
            .ok_or(GpuContextError::UnknownTexture { texture })
    }
}

impl GpuContext for RecordingGpuContext {
    fn create_texture(&mut self, size: Size) -> Result<TextureId, GpuContextError> {
        if size_is_empty(size) {
            return Err(GpuContextError::EmptyTextureSize { size });
        }
        let texture = self.textures.insert(RecordedTexture {
            size,
            mailbox: None,
        });
        self.commands.push(GpuCommand::CreateTexture { texture, size });
        Ok(texture)
    }

    fn delete_texture(&mut self, texture: TextureId) {
        if self.textures.remove(texture).is_none() {
            return;
        }
        if self.bound_texture == Some(texture) {
            self.bound_texture = None;
        }
        self.commands.push(GpuCommand::DeleteTexture { texture });
    }

    fn texture_size(&self, texture: TextureId) -> Option<Size> {
        self.textures.get(texture).map(|entry| entry.size)
    }

    fn produce_mailbox(&mut self, texture: TextureId) -> Result<Mailbox, GpuContextError> {
        let Some(entry) = self.textures.get_mut(texture) else {
            return Err(GpuContextError::UnknownTexture { texture });
        };
        if let Some(mailbox) = entry.mailbox {
            return Ok(mailbox);
        }
        let mailbox = Mailbox::from_counter(self.mailbox_namespace, self.next_mailbox);
        self.next_mailbox += 1;
        entry.mailbox = Some(mailbox);
        Ok(mailbox)
    }

    fn bind_framebuffer_texture(
        &mut self,
        texture: Option<TextureId>,
    ) -> Result<(), GpuContextError> {
        if let Some(texture) = texture {
            self.texture(texture)?;
        }
        self.bound_texture = texture;
        self.commands.push(GpuCommand::BindFramebuffer { texture });
        Ok(())
    }

    fn framebuffer_size(&self) -> Size {
        self.bound_texture
            .and_then(|texture| self.texture_size(texture))
            .unwrap_or(self.back_buffer_size)
    }

    fn resize_back_buffer(&mut self, size: Size) -> Result<(), GpuContextError> {
        if size_is_empty(size) {
            return Err(GpuContextError::EmptyTextureSize { size });
        }
        self.back_buffer_size = size;
        self.commands.push(GpuCommand::ResizeBackBuffer { size });
        Ok(())
    }

    fn copy_framebuffer_to_texture(
        &mut self,
        texture: TextureId,
        size: Size,
    ) -> Result<(), GpuContextError> {
        let source_size = self.framebuffer_size();
        self.texture(texture)?;
        if size_is_empty(size) {
            return Err(GpuContextError::EmptyTextureSize { size });
        }
        if size.width > source_size.width || size.height > source_size.height {
            return Err(GpuContextError::CopyOutOfBounds {
                rect: Rect::from_size(size),
                source_size,
                destination_size: size,
            });
        }
        self.textures[texture].size = size;
        self.commands
            .push(GpuCommand::CopyFullImage { texture, size });
        Ok(())
    }

    fn copy_framebuffer_sub_image(
        &mut self,
        texture: TextureId,
        rect: Rect,
    ) -> Result<(), GpuContextError> {
        let source_size = self.framebuffer_size();
        let destination_size = self.texture(texture)?.size;
        if !rect_fits(rect, source_size) || !rect_fits(rect, destination_size) {
            return Err(GpuContextError::CopyOutOfBounds {
                rect,
                source_size,
                destination_size,
            });
        }
        self.commands
            .push(GpuCommand::CopySubImage { texture, rect });
        Ok(())
    }

    fn insert_ordering_barrier(&mut self) {
        self.commands.push(GpuCommand::OrderingBarrier);
    }

    fn insert_sync_point(&mut self) -> SyncPoint {
        let sync_point = SyncPoint(self.next_sync_point);
        self.next_sync_point += 1;
        self.commands.push(GpuCommand::InsertSyncPoint { sync_point });
        sync_point
    }

    fn signal_sync_point(&mut self, sync_point: SyncPoint, callback: SyncPointCallback) {
        self.pending_signals.push((sync_point, callback));
    }

    fn swap_buffers(&mut self) {
        self.commands.push(GpuCommand::SwapBuffers);
    }

    fn partial_swap_buffers(&mut self, rect: Rect) {
        self.commands.push(GpuCommand::PartialSwapBuffers { rect });
    }

    fn poll(&mut self) -> Result<(), GpuContextError> {
        for (_, callback) in self.pending_signals.drain(..) {
            callback();
        }
        Ok(())
    }
}

pub(crate) fn rect_fits(rect: Rect, bounds: Size) -> bool {
    rect.origin.x >= 0
        && rect.origin.y >= 0
        && rect.size.width >= 0
        && rect.size.height >= 0
        && rect.max_x() <= bounds.width
        && rect.max_y() <= bounds.height
}
