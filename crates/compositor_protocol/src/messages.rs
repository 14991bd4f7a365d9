//! IPC messages crossing the child-frame boundary.
//!
//! Inbound messages reach the embedder's compositor thread addressed to a
//! [`ChildFrameTarget`]; outbound [`HostMessage`]s travel back to the browser
//! host that relays them to the producing renderer.

use serde::{Deserialize, Serialize};

use crate::{
    CompositorFrame, CompositorFrameAck, OutputSurfaceEpoch, SharedMemoryHandle, Size, SurfaceId,
    SurfaceSequence,
};

/// Which embedder-side object a child-frame message is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChildFrameTarget {
    /// Out-of-process iframe represented by a frame proxy.
    FrameProxy { routing_id: i32 },
    /// `<webview>` guest hosted through a browser plugin.
    BrowserPlugin { instance_id: i32 },
}

impl ChildFrameTarget {
    /// Host route that messages produced for this child frame travel on.
    pub fn host_destination(self, host_routing_id: i32) -> HostDestination {
        match self {
            ChildFrameTarget::FrameProxy { .. } => HostDestination::FrameProxy { host_routing_id },
            ChildFrameTarget::BrowserPlugin { instance_id } => HostDestination::BrowserPlugin {
                host_routing_id,
                browser_plugin_instance_id: instance_id,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChildFrameMessage {
    CompositorFrameSwapped {
        frame: CompositorFrame,
        epoch: OutputSurfaceEpoch,
        shared_memory: Option<SharedMemoryHandle>,
    },
    SetChildFrameSurface {
        surface_id: SurfaceId,
        frame_size: Size,
        scale_factor: f32,
        sequence: SurfaceSequence,
    },
    ChildFrameProcessGone,
}

impl ChildFrameMessage {
    pub fn name(&self) -> &'static str {
        match self {
            ChildFrameMessage::CompositorFrameSwapped { .. } => "CompositorFrameSwapped",
            ChildFrameMessage::SetChildFrameSurface { .. } => "SetChildFrameSurface",
            ChildFrameMessage::ChildFrameProcessGone => "ChildFrameProcessGone",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildFrameEnvelope {
    pub target: ChildFrameTarget,
    pub message: ChildFrameMessage,
}

/// Where on the host side an outbound message is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HostDestination {
    FrameProxy {
        host_routing_id: i32,
    },
    BrowserPlugin {
        host_routing_id: i32,
        browser_plugin_instance_id: i32,
    },
}

impl HostDestination {
    pub fn host_routing_id(&self) -> i32 {
        match *self {
            HostDestination::FrameProxy { host_routing_id }
            | HostDestination::BrowserPlugin {
                host_routing_id, ..
            } => host_routing_id,
        }
    }
}

/// Acknowledges one swapped frame, returning the resources that became unused
/// since the previous acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositorFrameSwappedAckParams {
    pub producing_epoch: OutputSurfaceEpoch,
    pub ack: CompositorFrameAck,
}

/// Returns resources outside of a frame acknowledgement, for example when the
/// producing output surface went away.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReclaimCompositorResourcesParams {
    pub epoch: OutputSurfaceEpoch,
    pub ack: CompositorFrameAck,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HostMessageBody {
    CompositorFrameSwappedAck(CompositorFrameSwappedAckParams),
    ReclaimCompositorResources(ReclaimCompositorResourcesParams),
    SatisfySequence(SurfaceSequence),
    RequireSequence {
        surface_id: SurfaceId,
        sequence: SurfaceSequence,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostMessage {
    pub destination: HostDestination,
    pub body: HostMessageBody,
}

impl HostMessage {
    pub fn is_ack(&self) -> bool {
        matches!(self.body, HostMessageBody::CompositorFrameSwappedAck(_))
    }
}
