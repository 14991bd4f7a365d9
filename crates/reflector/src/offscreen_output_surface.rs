use compositor_protocol::Size;
use compositor_protocol::geometry::size_is_empty;
use log::{debug, trace};

use crate::gpu_context::{GpuContext, GpuContextError};
use crate::output_surface::{
    BrowserCompositorOutputSurface, OutputSurfaceCapabilities, OutputSurfaceState, SwapFrame,
};
use crate::reflector_texture::ReflectorTexture;

/// Output surface without a window. The compositor renders straight into the
/// reflector texture, which doubles as the backbuffer, so mirrors need no
/// copy.
pub struct OffscreenBrowserCompositorOutputSurface<C: GpuContext> {
    state: OutputSurfaceState,
    context: C,
    backbuffer: Option<ReflectorTexture>,
}

impl<C: GpuContext> OffscreenBrowserCompositorOutputSurface<C> {
    pub fn new(context: C, surface_size: Size) -> Self {
        Self {
            state: OutputSurfaceState::new(
                OutputSurfaceCapabilities::FLIPPED_OUTPUT_SURFACE,
                surface_size,
            ),
            context,
            backbuffer: None,
        }
    }

    pub fn context(&self) -> &C {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut C {
        &mut self.context
    }

    pub fn backbuffer(&self) -> Option<&ReflectorTexture> {
        self.backbuffer.as_ref()
    }

    /// Allocates the backbuffer if needed and binds it as the render target.
    pub fn ensure_backbuffer(&mut self) -> Result<(), GpuContextError> {
        if self.backbuffer.is_some() {
            return Ok(());
        }
        let size = self.state.surface_size();
        if size_is_empty(size) {
            trace!("offscreen surface {:?} has no size yet", self.state.id());
            return Ok(());
        }
        let texture = ReflectorTexture::new(&mut self.context, size)?;
        if let Err(error) = self
            .context
            .bind_framebuffer_texture(Some(texture.texture_id()))
        {
            texture.destroy(&mut self.context);
            return Err(error);
        }
        debug!(
            "offscreen surface {:?} allocated backbuffer {:?}",
            self.state.id(),
            texture.texture_id()
        );
        let mailbox = texture.mailbox();
        self.backbuffer = Some(texture);
        if let Some(reflector) = self.state.live_reflector() {
            reflector
                .borrow_mut()
                .on_source_texture_mailbox_updated(Some(mailbox));
        }
        Ok(())
    }

    pub fn discard_backbuffer(&mut self) -> Result<(), GpuContextError> {
        let Some(texture) = self.backbuffer.take() else {
            return Ok(());
        };
        texture.destroy(&mut self.context);
        self.context.bind_framebuffer_texture(None)?;
        if let Some(reflector) = self.state.live_reflector() {
            reflector.borrow_mut().on_source_texture_mailbox_updated(None);
        }
        Ok(())
    }

    /// Binds the backbuffer before the compositor draws a frame.
    pub fn bind_framebuffer(&mut self) -> Result<(), GpuContextError> {
        self.ensure_backbuffer()
    }
}

impl<C: GpuContext> BrowserCompositorOutputSurface for OffscreenBrowserCompositorOutputSurface<C> {
    fn state(&self) -> &OutputSurfaceState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut OutputSurfaceState {
        &mut self.state
    }

    fn reshape(&mut self, size: Size, device_scale_factor: f32) -> Result<(), GpuContextError> {
        if size == self.state.surface_size() {
            self.state.set_surface_size(size, device_scale_factor);
            return Ok(());
        }
        self.state.set_surface_size(size, device_scale_factor);
        self.discard_backbuffer()?;
        self.ensure_backbuffer()
    }

    fn swap_buffers(&mut self, frame: SwapFrame) -> Result<(), GpuContextError> {
        if let Some(reflector) = self.state.live_reflector() {
            let surface_size = self.state.surface_size();
            let mut reflector = reflector.borrow_mut();
            if frame.is_full_swap() || reflector.take_full_redraw_request() {
                reflector.on_source_swap_buffers(surface_size);
            } else {
                reflector.on_source_post_sub_buffer(surface_size, frame.sub_buffer_rect);
            }
        }
        self.state.finish_swap(&mut self.context);
        Ok(())
    }

    fn on_reflector_changed(&mut self) -> Result<(), GpuContextError> {
        let Some(reflector) = self.state.reflector().cloned() else {
            return Ok(());
        };
        match self.backbuffer.as_ref() {
            Some(texture) => {
                reflector
                    .borrow_mut()
                    .on_source_texture_mailbox_updated(Some(texture.mailbox()));
                Ok(())
            }
            None => self.ensure_backbuffer(),
        }
    }

    fn poll_swap_completions(&mut self) -> Result<usize, GpuContextError> {
        self.state.poll_swap_completions(&mut self.context)
    }
}

impl<C: GpuContext> Drop for OffscreenBrowserCompositorOutputSurface<C> {
    fn drop(&mut self) {
        self.state.attach_reflector(None);
        if let Some(texture) = self.backbuffer.take() {
            texture.destroy(&mut self.context);
        }
    }
}

#[cfg(test)]
mod tests {
    use compositor_protocol::geometry::{rect, size};
    use layer_tree::LayerTree;

    use super::OffscreenBrowserCompositorOutputSurface;
    use crate::gpu_context::{GpuCommand, GpuContext, RecordingGpuContext};
    use crate::output_surface::{
        BrowserCompositorOutputSurface, OutputSurfaceCapabilities, SwapFrame,
    };
    use crate::reflector::Reflector;

    #[test]
    fn flipped_surface_mirrors_without_copy_or_flip() {
        let tree = LayerTree::new(1).into_shared();
        let layer = tree.borrow_mut().create_texture_layer();
        let reflector = Reflector::new(tree.clone()).into_shared();
        reflector
            .borrow_mut()
            .add_mirroring_layer(layer)
            .expect("mirror layer");
        let mut surface =
            OffscreenBrowserCompositorOutputSurface::new(RecordingGpuContext::new(1, size(1, 1)), size(256, 256));
        assert!(
            surface
                .capabilities()
                .contains(OutputSurfaceCapabilities::FLIPPED_OUTPUT_SURFACE)
        );

        surface
            .set_reflector(Some(reflector.clone()))
            .expect("attach reflector");
        let backbuffer = surface.backbuffer().expect("backbuffer").texture_id();
        assert_eq!(surface.context().bound_texture(), Some(backbuffer));
        assert_eq!(surface.context().framebuffer_size(), size(256, 256));

        surface
            .swap_buffers(SwapFrame::full(size(256, 256)))
            .expect("full swap");
        tree.borrow_mut()
            .layer_mut(layer)
            .expect("layer")
            .take_damaged_region();
        surface
            .swap_buffers(SwapFrame::partial(size(256, 256), rect(0, 0, 64, 64)))
            .expect("partial swap");

        let commands = surface.context().commands();
        assert!(!commands.iter().any(|command| matches!(
            command,
            GpuCommand::CopyFullImage { .. } | GpuCommand::CopySubImage { .. }
        )));
        let mut tree = tree.borrow_mut();
        let entry = tree.layer_mut(layer).expect("layer");
        assert!(!entry.texture_flipped());
        assert_eq!(entry.take_damaged_region(), Some(rect(0, 0, 64, 64)));
    }

    #[test]
    fn reshape_reallocates_backbuffer_and_republishes_mailbox() {
        let tree = LayerTree::new(1).into_shared();
        let reflector = Reflector::new(tree).into_shared();
        let mut surface =
            OffscreenBrowserCompositorOutputSurface::new(RecordingGpuContext::new(1, size(1, 1)), size(40, 40));
        surface
            .set_reflector(Some(reflector.clone()))
            .expect("attach reflector");
        let first_mailbox = reflector.borrow().mailbox().expect("first mailbox");

        surface.reshape(size(80, 60), 1.0).expect("reshape");

        let second_mailbox = reflector.borrow().mailbox().expect("second mailbox");
        assert_ne!(first_mailbox, second_mailbox);
        assert_eq!(surface.context().texture_count(), 1);
        assert_eq!(surface.context().framebuffer_size(), size(80, 60));
    }

    #[test]
    fn discard_backbuffer_withdraws_mailbox() {
        let tree = LayerTree::new(1).into_shared();
        let reflector = Reflector::new(tree).into_shared();
        let mut surface =
            OffscreenBrowserCompositorOutputSurface::new(RecordingGpuContext::new(1, size(1, 1)), size(16, 16));
        surface
            .set_reflector(Some(reflector.clone()))
            .expect("attach reflector");

        surface.discard_backbuffer().expect("discard");

        assert!(surface.backbuffer().is_none());
        assert_eq!(surface.context().bound_texture(), None);
        assert_eq!(reflector.borrow().mailbox(), None);

        surface.bind_framebuffer().expect("bind again");
        assert!(reflector.borrow().mailbox().is_some());
    }

    #[test]
    fn swap_signals_completion_through_sync_point() {
        let mut surface =
            OffscreenBrowserCompositorOutputSurface::new(RecordingGpuContext::new(1, size(1, 1)), size(16, 16));
        surface.bind_framebuffer().expect("bind");

        surface.swap_buffers(SwapFrame::full(size(16, 16))).expect("swap");
        surface.swap_buffers(SwapFrame::full(size(16, 16))).expect("swap");
        assert_eq!(surface.context().pending_signal_count(), 2);

        assert_eq!(surface.poll_swap_completions().expect("poll"), 2);
        assert_eq!(surface.context().pending_signal_count(), 0);
    }
}
