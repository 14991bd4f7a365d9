//! Mirroring of a browser compositor's output surface into layers of another
//! compositor.
//!
//! An output surface publishes a texture mailbox to its [`Reflector`] and
//! notifies it after every swap. The reflector binds that mailbox on each
//! mirroring layer and translates swap damage into layer damage, flipping it
//! vertically when the source renders bottom-up.

mod gpu_context;
mod gpu_output_surface;
mod offscreen_output_surface;
mod output_surface;
mod overlay;
mod reflector;
mod reflector_texture;
mod wgpu_context;

pub use gpu_context::{
    GpuCommand, GpuContext, GpuContextError, RecordingGpuContext, SyncPointCallback, TextureId,
};
pub use gpu_output_surface::GpuBrowserCompositorOutputSurface;
pub use offscreen_output_surface::OffscreenBrowserCompositorOutputSurface;
pub use output_surface::{
    BrowserCompositorOutputSurface, OutputSurfaceCapabilities, OutputSurfaceClient,
    OutputSurfaceId, OutputSurfaceState, SwapFrame,
};
pub use overlay::{OverlayCandidate, OverlayCandidateValidator, SingleOverlayValidator};
pub use reflector::{MirroringLayerError, Reflector, SharedReflector, SourceSurface};
pub use reflector_texture::ReflectorTexture;
pub use wgpu_context::WgpuContext;
