use compositor_protocol::{Mailbox, Rect, Size};

use crate::gpu_context::{GpuContext, GpuContextError, TextureId};

/// Destination texture that mirror layers sample, addressed by its mailbox.
#[derive(Debug)]
pub struct ReflectorTexture {
    texture: TextureId,
    mailbox: Mailbox,
}

impl ReflectorTexture {
    pub fn new(context: &mut dyn GpuContext, size: Size) -> Result<Self, GpuContextError> {
        let texture = context.create_texture(size)?;
        let mailbox = match context.produce_mailbox(texture) {
            Ok(mailbox) => mailbox,
            Err(error) => {
                context.delete_texture(texture);
                return Err(error);
            }
        };
        Ok(Self { texture, mailbox })
    }

    pub fn texture_id(&self) -> TextureId {
        self.texture
    }

    pub fn mailbox(&self) -> Mailbox {
        self.mailbox
    }

    pub fn copy_texture_full_image(
        &self,
        context: &mut dyn GpuContext,
        size: Size,
    ) -> Result<(), GpuContextError> {
        context.copy_framebuffer_to_texture(self.texture, size)?;
        context.insert_ordering_barrier();
        Ok(())
    }

    pub fn copy_texture_sub_image(
        &self,
        context: &mut dyn GpuContext,
        rect: Rect,
    ) -> Result<(), GpuContextError> {
        context.copy_framebuffer_sub_image(self.texture, rect)?;
        context.insert_ordering_barrier();
        Ok(())
    }

    pub fn destroy(self, context: &mut dyn GpuContext) {
        context.delete_texture(self.texture);
    }
}
