use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use bitflags::bitflags;
use compositor_protocol::{LatencyInfo, Rect, Size};
use crossbeam_channel::{Receiver, Sender};
use log::{debug, trace, warn};

use crate::gpu_context::{GpuContext, GpuContextError};
use crate::overlay::{OverlayCandidate, OverlayCandidateValidator};
use crate::reflector::{SharedReflector, SourceSurface};

static NEXT_OUTPUT_SURFACE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputSurfaceId(pub u64);

impl OutputSurfaceId {
    pub fn next() -> Self {
        Self(NEXT_OUTPUT_SURFACE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OutputSurfaceCapabilities: u32 {
        /// Rows are stored top-down, so mirrors need no vertical flip.
        const FLIPPED_OUTPUT_SURFACE = 1 << 0;
        const USES_DEFAULT_FRAMEBUFFER = 1 << 1;
        const SUPPORTS_PARTIAL_SWAP = 1 << 2;
    }
}

/// One frame handed to the output surface for presentation.
#[derive(Debug, Clone, PartialEq)]
pub struct SwapFrame {
    pub size: Size,
    pub sub_buffer_rect: Rect,
    pub latency_info: Vec<LatencyInfo>,
}

impl SwapFrame {
    pub fn full(size: Size) -> Self {
        Self {
            size,
            sub_buffer_rect: Rect::from_size(size),
            latency_info: Vec::new(),
        }
    }

    pub fn partial(size: Size, sub_buffer_rect: Rect) -> Self {
        Self {
            size,
            sub_buffer_rect,
            latency_info: Vec::new(),
        }
    }

    pub fn is_full_swap(&self) -> bool {
        self.sub_buffer_rect == Rect::from_size(self.size)
    }
}

/// Compositor-side observer of an output surface.
pub trait OutputSurfaceClient {
    /// A swap was issued to the GPU.
    fn did_swap_buffers(&mut self);

    /// The GPU finished the work of an earlier swap.
    fn did_swap_buffers_complete(&mut self);
}

/// State every output surface variant carries.
pub struct OutputSurfaceState {
    id: OutputSurfaceId,
    capabilities: OutputSurfaceCapabilities,
    surface_size: Size,
    device_scale_factor: f32,
    reflector: Option<SharedReflector>,
    overlay_validator: Option<Box<dyn OverlayCandidateValidator>>,
    client: Option<Box<dyn OutputSurfaceClient>>,
    completion_sender: Sender<u64>,
    completion_receiver: Receiver<u64>,
    next_swap_id: u64,
    swaps_in_flight: usize,
}

impl OutputSurfaceState {
    pub(crate) fn new(capabilities: OutputSurfaceCapabilities, surface_size: Size) -> Self {
        let (completion_sender, completion_receiver) = crossbeam_channel::unbounded();
        Self {
            id: OutputSurfaceId::next(),
            capabilities,
            surface_size,
            device_scale_factor: 1.0,
            reflector: None,
            overlay_validator: None,
            client: None,
            completion_sender,
            completion_receiver,
            next_swap_id: 1,
            swaps_in_flight: 0,
        }
    }

    pub fn id(&self) -> OutputSurfaceId {
        self.id
    }

    pub fn capabilities(&self) -> OutputSurfaceCapabilities {
        self.capabilities
    }

    pub fn surface_size(&self) -> Size {
        self.surface_size
    }

    pub fn device_scale_factor(&self) -> f32 {
        self.device_scale_factor
    }

    pub fn reflector(&self) -> Option<&SharedReflector> {
        self.reflector.as_ref()
    }

    pub fn swaps_in_flight(&self) -> usize {
        self.swaps_in_flight
    }

    pub(crate) fn set_surface_size(&mut self, surface_size: Size, device_scale_factor: f32) {
        self.surface_size = surface_size;
        self.device_scale_factor = device_scale_factor;
    }

    pub(crate) fn attach_reflector(&mut self, reflector: Option<SharedReflector>) {
        if let Some(previous) = self.reflector.take() {
            let reattached = reflector
                .as_ref()
                .is_some_and(|next| Rc::ptr_eq(next, &previous));
            let mut previous = previous.borrow_mut();
            if !reattached && previous.is_attached_to(self.id) {
                previous.detach_from_output_surface();
            }
        }
        if let Some(reflector) = reflector {
            let source = SourceSurface {
                id: self.id,
                capabilities: self.capabilities,
            };
            if reflector.borrow_mut().on_source_surface_ready(source) {
                self.reflector = Some(reflector);
            } else {
                debug!("output surface {:?} ignores a shut down reflector", self.id);
            }
        }
        let mirrored = self.reflector.is_some();
        if let Some(validator) = self.overlay_validator.as_mut() {
            validator.set_software_mirror_mode(mirrored);
        }
    }

    /// The attached reflector, or `None` once it moved to another surface or
    /// was shut down. A reflector lost that way is dropped here.
    pub(crate) fn live_reflector(&mut self) -> Option<SharedReflector> {
        let reflector = self.reflector.as_ref()?;
        let live = {
            let reflector = reflector.borrow();
            !reflector.is_shut_down() && reflector.is_attached_to(self.id)
        };
        if live {
            return Some(reflector.clone());
        }
        debug!("output surface {:?} lost its reflector", self.id);
        self.reflector = None;
        if let Some(validator) = self.overlay_validator.as_mut() {
            validator.set_software_mirror_mode(false);
        }
        None
    }

    pub(crate) fn bind_to_client(&mut self, client: Box<dyn OutputSurfaceClient>) {
        self.client = Some(client);
    }

    pub(crate) fn set_overlay_validator(
        &mut self,
        mut validator: Option<Box<dyn OverlayCandidateValidator>>,
    ) {
        if let Some(validator) = validator.as_mut() {
            validator.set_software_mirror_mode(self.reflector.is_some());
        }
        self.overlay_validator = validator;
    }

    pub(crate) fn check_overlay_support(&self, candidates: &mut [OverlayCandidate]) {
        match self.overlay_validator.as_ref() {
            Some(validator) => validator.check_overlay_support(candidates),
            None => {
                for candidate in candidates {
                    candidate.overlay_handled = false;
                }
            }
        }
    }

    /// Registers a completion signal for the swap just issued and tells the
    /// client about it.
    pub(crate) fn finish_swap(&mut self, context: &mut dyn GpuContext) {
        let swap_id = self.next_swap_id;
        self.next_swap_id += 1;
        self.swaps_in_flight += 1;

        let sync_point = context.insert_sync_point();
        let sender = self.completion_sender.clone();
        context.signal_sync_point(
            sync_point,
            Box::new(move || {
                if let Err(error) = sender.send(swap_id) {
                    warn!("swap completion channel closed before swap {swap_id}: {error}");
                }
            }),
        );
        trace!(
            "output surface {:?} swap {swap_id} waits on {sync_point:?}",
            self.id
        );
        if let Some(client) = self.client.as_mut() {
            client.did_swap_buffers();
        }
    }

    pub(crate) fn poll_swap_completions(
        &mut self,
        context: &mut dyn GpuContext,
    ) -> Result<usize, GpuContextError> {
        context.poll()?;
        let mut completed = 0;
        while let Ok(swap_id) = self.completion_receiver.try_recv() {
            trace!("output surface {:?} completed swap {swap_id}", self.id);
            self.swaps_in_flight = self.swaps_in_flight.saturating_sub(1);
            completed += 1;
            if let Some(client) = self.client.as_mut() {
                client.did_swap_buffers_complete();
            }
        }
        Ok(completed)
    }
}

/// Output surface of a browser compositor, optionally mirrored by a
/// [`Reflector`](crate::Reflector).
pub trait BrowserCompositorOutputSurface {
    fn state(&self) -> &OutputSurfaceState;

    fn state_mut(&mut self) -> &mut OutputSurfaceState;

    fn reshape(&mut self, size: Size, device_scale_factor: f32) -> Result<(), GpuContextError>;

    fn swap_buffers(&mut self, frame: SwapFrame) -> Result<(), GpuContextError>;

    /// Reacts to the reflector being attached or detached.
    fn on_reflector_changed(&mut self) -> Result<(), GpuContextError>;

    /// Returns how many swaps completed since the last poll.
    fn poll_swap_completions(&mut self) -> Result<usize, GpuContextError>;

    fn id(&self) -> OutputSurfaceId {
        self.state().id()
    }

    fn capabilities(&self) -> OutputSurfaceCapabilities {
        self.state().capabilities()
    }

    fn surface_size(&self) -> Size {
        self.state().surface_size()
    }

    fn device_scale_factor(&self) -> f32 {
        self.state().device_scale_factor()
    }

    fn set_reflector(&mut self, reflector: Option<SharedReflector>) -> Result<(), GpuContextError> {
        self.state_mut().attach_reflector(reflector);
        self.on_reflector_changed()
    }

    fn bind_to_client(&mut self, client: Box<dyn OutputSurfaceClient>) {
        self.state_mut().bind_to_client(client);
    }

    fn set_overlay_candidate_validator(
        &mut self,
        validator: Option<Box<dyn OverlayCandidateValidator>>,
    ) {
        self.state_mut().set_overlay_validator(validator);
    }

    /// Marks the candidates that can be scanned out as overlay planes.
    fn check_overlay_support(&self, candidates: &mut [OverlayCandidate]) {
        self.state().check_overlay_support(candidates);
    }
}

#[cfg(test)]
mod tests {
    use compositor_protocol::geometry::{rect, size};

    use super::{OutputSurfaceId, SwapFrame};

    #[test]
    fn swap_frame_covering_whole_size_is_full() {
        assert!(SwapFrame::full(size(30, 20)).is_full_swap());
        assert!(SwapFrame::partial(size(30, 20), rect(0, 0, 30, 20)).is_full_swap());
        assert!(!SwapFrame::partial(size(30, 20), rect(0, 0, 30, 19)).is_full_swap());
    }

    #[test]
    fn output_surface_ids_are_unique() {
        let first = OutputSurfaceId::next();
        let second = OutputSurfaceId::next();
        assert!(second > first);
    }
}
