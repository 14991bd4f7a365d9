use compositor_protocol::Size;
use compositor_protocol::geometry::size_is_empty;
use log::debug;

use crate::gpu_context::{GpuContext, GpuContextError};
use crate::output_surface::{
    BrowserCompositorOutputSurface, OutputSurfaceCapabilities, OutputSurfaceState, SwapFrame,
};
use crate::reflector::SharedReflector;
use crate::reflector_texture::ReflectorTexture;

/// Output surface presenting through the default framebuffer of a GPU
/// context. Mirrors get a copy of the back buffer before every swap.
pub struct GpuBrowserCompositorOutputSurface<C: GpuContext> {
    state: OutputSurfaceState,
    context: C,
    reflector_texture: Option<ReflectorTexture>,
}

impl<C: GpuContext> GpuBrowserCompositorOutputSurface<C> {
    pub fn new(mut context: C, surface_size: Size) -> Result<Self, GpuContextError> {
        context.resize_back_buffer(surface_size)?;
        Ok(Self {
            state: OutputSurfaceState::new(
                OutputSurfaceCapabilities::USES_DEFAULT_FRAMEBUFFER
                    | OutputSurfaceCapabilities::SUPPORTS_PARTIAL_SWAP,
                surface_size,
            ),
            context,
            reflector_texture: None,
        })
    }

    pub fn context(&self) -> &C {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut C {
        &mut self.context
    }

    pub fn reflector_texture(&self) -> Option<&ReflectorTexture> {
        self.reflector_texture.as_ref()
    }

    fn publish_reflector_texture(
        &mut self,
        reflector: &SharedReflector,
    ) -> Result<(), GpuContextError> {
        let texture = match self.reflector_texture.take() {
            Some(texture) => texture,
            None => ReflectorTexture::new(&mut self.context, self.state.surface_size())?,
        };
        reflector
            .borrow_mut()
            .on_source_texture_mailbox_updated(Some(texture.mailbox()));
        self.reflector_texture = Some(texture);
        Ok(())
    }

    fn destroy_reflector_texture(&mut self) {
        if let Some(texture) = self.reflector_texture.take() {
            debug!(
                "output surface {:?} drops reflector texture {:?}",
                self.state.id(),
                texture.texture_id()
            );
            texture.destroy(&mut self.context);
        }
    }

    fn mirror_swap(
        &mut self,
        reflector: &SharedReflector,
        frame: &SwapFrame,
    ) -> Result<(), GpuContextError> {
        if !reflector.borrow().is_mirroring() {
            return Ok(());
        }
        if self.reflector_texture.is_none() {
            self.publish_reflector_texture(reflector)?;
        }
        let Some(texture) = self.reflector_texture.as_ref() else {
            return Ok(());
        };
        let surface_size = self.state.surface_size();
        let full_copy =
            frame.is_full_swap() || reflector.borrow_mut().take_full_redraw_request();
        if full_copy {
            texture.copy_texture_full_image(&mut self.context, surface_size)?;
            reflector.borrow_mut().on_source_swap_buffers(surface_size);
        } else {
            texture.copy_texture_sub_image(&mut self.context, frame.sub_buffer_rect)?;
            reflector
                .borrow_mut()
                .on_source_post_sub_buffer(surface_size, frame.sub_buffer_rect);
        }
        Ok(())
    }
}

impl<C: GpuContext> BrowserCompositorOutputSurface for GpuBrowserCompositorOutputSurface<C> {
    fn state(&self) -> &OutputSurfaceState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut OutputSurfaceState {
        &mut self.state
    }

    fn reshape(&mut self, size: Size, device_scale_factor: f32) -> Result<(), GpuContextError> {
        if size_is_empty(size) {
            return Err(GpuContextError::EmptyTextureSize { size });
        }
        if size != self.state.surface_size() {
            self.context.resize_back_buffer(size)?;
        }
        self.state.set_surface_size(size, device_scale_factor);
        Ok(())
    }

    fn swap_buffers(&mut self, frame: SwapFrame) -> Result<(), GpuContextError> {
        match self.state.live_reflector() {
            Some(reflector) => self.mirror_swap(&reflector, &frame)?,
            None => self.destroy_reflector_texture(),
        }
        if frame.is_full_swap() {
            self.context.swap_buffers();
        } else {
            self.context.partial_swap_buffers(frame.sub_buffer_rect);
        }
        self.state.finish_swap(&mut self.context);
        Ok(())
    }

    fn on_reflector_changed(&mut self) -> Result<(), GpuContextError> {
        match self.state.reflector().cloned() {
            Some(reflector) => self.publish_reflector_texture(&reflector),
            None => {
                self.destroy_reflector_texture();
                Ok(())
            }
        }
    }

    fn poll_swap_completions(&mut self) -> Result<usize, GpuContextError> {
        self.state.poll_swap_completions(&mut self.context)
    }
}

impl<C: GpuContext> Drop for GpuBrowserCompositorOutputSurface<C> {
    fn drop(&mut self) {
        self.state.attach_reflector(None);
        self.destroy_reflector_texture();
    }
}
