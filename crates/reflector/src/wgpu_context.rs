use compositor_protocol::geometry::size_is_empty;
use compositor_protocol::{Mailbox, Rect, Size, SyncPoint};
use log::{trace, warn};
use slotmap::SlotMap;

use crate::gpu_context::{GpuContext, GpuContextError, SyncPointCallback, TextureId, rect_fits};

const TEXTURE_USAGE: wgpu::TextureUsages = wgpu::TextureUsages::COPY_SRC
    .union(wgpu::TextureUsages::COPY_DST)
    .union(wgpu::TextureUsages::TEXTURE_BINDING)
    .union(wgpu::TextureUsages::RENDER_ATTACHMENT);

struct WgpuTexture {
    texture: wgpu::Texture,
    size: Size,
    mailbox: Option<Mailbox>,
}

/// [`GpuContext`] on top of a wgpu device.
///
/// Copies are recorded into one pending command encoder that is submitted on
/// ordering barriers, sync points and swaps. Presentation itself belongs to
/// whoever owns the window surface; a swap here only flushes the frame's work.
pub struct WgpuContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
    format: wgpu::TextureFormat,
    mailbox_namespace: u32,
    next_mailbox: u64,
    next_sync_point: u32,
    back_buffer: wgpu::Texture,
    back_buffer_size: Size,
    bound_texture: Option<TextureId>,
    textures: SlotMap<TextureId, WgpuTexture>,
    encoder: Option<wgpu::CommandEncoder>,
    swapped_frames: u64,
}

impl WgpuContext {
    pub fn new(
        device: wgpu::Device,
        queue: wgpu::Queue,
        format: wgpu::TextureFormat,
        mailbox_namespace: u32,
        back_buffer_size: Size,
    ) -> Result<Self, GpuContextError> {
        if size_is_empty(back_buffer_size) {
            return Err(GpuContextError::EmptyTextureSize {
                size: back_buffer_size,
            });
        }
        let back_buffer = create_wgpu_texture(
            &device,
            format,
            back_buffer_size,
            "compositor back buffer",
        );
        Ok(Self {
            device,
            queue,
            format,
            mailbox_namespace,
            next_mailbox: 1,
            next_sync_point: 1,
            back_buffer,
            back_buffer_size,
            bound_texture: None,
            textures: SlotMap::with_key(),
            encoder: None,
            swapped_frames: 0,
        })
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Texture the compositor renders into while the back buffer is bound.
    pub fn back_buffer(&self) -> &wgpu::Texture {
        &self.back_buffer
    }

    pub fn wgpu_texture(&self, texture: TextureId) -> Option<&wgpu::Texture> {
        self.textures.get(texture).map(|entry| &entry.texture)
    }

    pub fn swapped_frame_count(&self) -> u64 {
        self.swapped_frames
    }

    fn flush(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            self.queue.submit(Some(encoder.finish()));
        }
    }

    fn record_copy(
        &mut self,
        texture: TextureId,
        origin: wgpu::Origin3d,
        extent: wgpu::Extent3d,
    ) -> Result<(), GpuContextError> {
        if self.bound_texture == Some(texture) {
            trace!("skipping copy of framebuffer texture {texture:?} onto itself");
            return Ok(());
        }
        let source = match self.bound_texture {
            Some(bound) => {
                &self
                    .textures
                    .get(bound)
                    .ok_or(GpuContextError::UnknownTexture { texture: bound })?
                    .texture
            }
            None => &self.back_buffer,
        };
        let destination = &self
            .textures
            .get(texture)
            .ok_or(GpuContextError::UnknownTexture { texture })?
            .texture;
        let device = &self.device;
        let encoder = self.encoder.get_or_insert_with(|| {
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("reflector copy"),
            })
        });
        encoder.copy_texture_to_texture(
            wgpu::TexelCopyTextureInfo {
                texture: source,
                mip_level: 0,
                origin,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyTextureInfo {
                texture: destination,
                mip_level: 0,
                origin,
                aspect: wgpu::TextureAspect::All,
            },
            extent,
        );
        Ok(())
    }
}

impl GpuContext for WgpuContext {
    fn create_texture(&mut self, size: Size) -> Result<TextureId, GpuContextError> {
        if size_is_empty(size) {
            return Err(GpuContextError::EmptyTextureSize { size });
        }
        let texture = create_wgpu_texture(&self.device, self.format, size, "reflector texture");
        Ok(self.textures.insert(WgpuTexture {
            texture,
            size,
            mailbox: None,
        }))
    }

    fn delete_texture(&mut self, texture: TextureId) {
        let Some(entry) = self.textures.remove(texture) else {
            return;
        };
        if self.bound_texture == Some(texture) {
            self.bound_texture = None;
        }
        // Pending copies may still reference the texture.
        self.flush();
        entry.texture.destroy();
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
        if let Some(texture) = texture
            && !self.textures.contains_key(texture)
        {
            return Err(GpuContextError::UnknownTexture { texture });
        }
        self.bound_texture = texture;
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
        if size == self.back_buffer_size {
            return Ok(());
        }
        self.flush();
        let back_buffer =
            create_wgpu_texture(&self.device, self.format, size, "compositor back buffer");
        std::mem::replace(&mut self.back_buffer, back_buffer).destroy();
        self.back_buffer_size = size;
        Ok(())
    }

    fn copy_framebuffer_to_texture(
        &mut self,
        texture: TextureId,
        size: Size,
    ) -> Result<(), GpuContextError> {
        if size_is_empty(size) {
            return Err(GpuContextError::EmptyTextureSize { size });
        }
        let source_size = self.framebuffer_size();
        let Some(entry) = self.textures.get(texture) else {
            return Err(GpuContextError::UnknownTexture { texture });
        };
        if size.width > source_size.width || size.height > source_size.height {
            return Err(GpuContextError::CopyOutOfBounds {
                rect: Rect::from_size(size),
                source_size,
                destination_size: size,
            });
        }
        if entry.size != size {
            self.flush();
            let replacement =
                create_wgpu_texture(&self.device, self.format, size, "reflector texture");
            let entry = &mut self.textures[texture];
            std::mem::replace(&mut entry.texture, replacement).destroy();
            entry.size = size;
        }
        self.record_copy(texture, wgpu::Origin3d::ZERO, extent_of(size))
    }

    fn copy_framebuffer_sub_image(
        &mut self,
        texture: TextureId,
        rect: Rect,
    ) -> Result<(), GpuContextError> {
        let source_size = self.framebuffer_size();
        let Some(destination_size) = self.texture_size(texture) else {
            return Err(GpuContextError::UnknownTexture { texture });
        };
        if !rect_fits(rect, source_size) || !rect_fits(rect, destination_size) {
            return Err(GpuContextError::CopyOutOfBounds {
                rect,
                source_size,
                destination_size,
            });
        }
        if size_is_empty(rect.size) {
            return Ok(());
        }
        let origin = wgpu::Origin3d {
            x: rect.origin.x as u32,
            y: rect.origin.y as u32,
            z: 0,
        };
        self.record_copy(texture, origin, extent_of(rect.size))
    }

    fn insert_ordering_barrier(&mut self) {
        self.flush();
    }

    fn insert_sync_point(&mut self) -> SyncPoint {
        self.flush();
        let sync_point = SyncPoint(self.next_sync_point);
        self.next_sync_point = self
            .next_sync_point
            .checked_add(1)
            .expect("sync point space exhausted");
        sync_point
    }

    fn signal_sync_point(&mut self, sync_point: SyncPoint, callback: SyncPointCallback) {
        trace!("signal requested for {sync_point:?}");
        // Every sync point flushes, so the queue's latest submission covers it.
        self.queue.on_submitted_work_done(callback);
    }

    fn swap_buffers(&mut self) {
        self.flush();
        self.swapped_frames += 1;
    }

    fn partial_swap_buffers(&mut self, rect: Rect) {
        trace!("partial swap of {rect:?}");
        self.flush();
        self.swapped_frames += 1;
    }

    fn poll(&mut self) -> Result<(), GpuContextError> {
        if let Err(error) = self.device.poll(wgpu::PollType::Poll) {
            warn!("gpu device poll failed: {error}");
            return Err(GpuContextError::DeviceLost {
                message: error.to_string(),
            });
        }
        Ok(())
    }
}

fn extent_of(size: Size) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width: size.width as u32,
        height: size.height as u32,
        depth_or_array_layers: 1,
    }
}

fn create_wgpu_texture(
    device: &wgpu::Device,
    format: wgpu::TextureFormat,
    size: Size,
    label: &'static str,
) -> wgpu::Texture {
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: extent_of(size),
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage: TEXTURE_USAGE,
        view_formats: &[],
    })
}
