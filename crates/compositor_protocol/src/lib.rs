//! Data model exchanged between a child renderer, the embedder's compositor
//! thread and the browser host.
//!
//! Everything here is plain data: frames travel by value, resources are
//! referenced by id, and ids are scoped by [`OutputSurfaceEpoch`].

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

pub mod geometry;
pub mod messages;

pub use geometry::{Color, DevicePixel, Point, Rect, Size, Vector};
pub use messages::{
    ChildFrameEnvelope, ChildFrameMessage, ChildFrameTarget, CompositorFrameSwappedAckParams,
    HostDestination, HostMessage, HostMessageBody, ReclaimCompositorResourcesParams,
};

/// Resource id minted by a child compositor. Only meaningful together with the
/// [`OutputSurfaceEpoch`] it was delivered under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId(pub u32);

/// The `(route_id, output_surface_id, host_id)` triple identifying the output
/// surface that produced a frame. A change of any component means the producer
/// recreated its output surface and every previously delivered resource id is
/// stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct OutputSurfaceEpoch {
    pub route_id: i32,
    pub output_surface_id: u32,
    pub host_id: i32,
}

impl OutputSurfaceEpoch {
    pub const fn new(route_id: i32, output_surface_id: u32, host_id: i32) -> Self {
        Self {
            route_id,
            output_surface_id,
            host_id,
        }
    }
}

/// Opaque cross-context name of a GPU texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Mailbox(pub [u8; 16]);

impl Mailbox {
    /// Builds a mailbox name from a context-local counter. Distinct counters
    /// give distinct names.
    pub fn from_counter(namespace: u32, counter: u64) -> Self {
        let mut name = [0u8; 16];
        name[..4].copy_from_slice(&namespace.to_le_bytes());
        name[4..12].copy_from_slice(&counter.to_le_bytes());
        name[15] = 1;
        Self(name)
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|byte| *byte == 0)
    }
}

/// GPU command-stream fence. Zero means "no fence".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct SyncPoint(pub u32);

impl SyncPoint {
    pub const NONE: Self = Self(0);

    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct MailboxHolder {
    pub mailbox: Mailbox,
    pub texture_target: u32,
    pub sync_point: SyncPoint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceFormat {
    Rgba8888,
    Bgra8888,
}

/// A GPU resource handed from producer to consumer inside a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferableResource {
    pub id: ResourceId,
    pub format: ResourceFormat,
    pub size: Size,
    pub mailbox_holder: MailboxHolder,
    pub is_software: bool,
    pub is_overlay_candidate: bool,
}

impl TransferableResource {
    pub fn to_returned_resource(&self) -> ReturnedResource {
        ReturnedResource {
            id: self.id,
            sync_point: self.mailbox_holder.sync_point,
            count: 1,
            lost: false,
        }
    }

    pub fn return_resources(resources: &[TransferableResource]) -> Vec<ReturnedResource> {
        resources
            .iter()
            .map(TransferableResource::to_returned_resource)
            .collect()
    }
}

/// A resource id reported back to its producer. `count` is how many times the
/// producer sent the id that are now released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnedResource {
    pub id: ResourceId,
    pub sync_point: SyncPoint,
    pub count: u32,
    pub lost: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RenderPassId {
    pub layer_id: u32,
    pub index: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuadMaterial {
    SolidColor { color: Color },
    Texture { resource_id: ResourceId },
    TileContent { resource_id: ResourceId },
    RenderPass { pass_id: RenderPassId },
    Surface { surface_id: SurfaceId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrawQuad {
    pub rect: Rect,
    pub material: QuadMaterial,
}

impl DrawQuad {
    pub fn resource_ids(&self) -> SmallVec<[ResourceId; 2]> {
        match self.material {
            QuadMaterial::Texture { resource_id } | QuadMaterial::TileContent { resource_id } => {
                SmallVec::from_slice(&[resource_id])
            }
            QuadMaterial::SolidColor { .. }
            | QuadMaterial::RenderPass { .. }
            | QuadMaterial::Surface { .. } => SmallVec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderPass {
    pub id: RenderPassId,
    pub output_rect: Rect,
    pub damage_rect: Rect,
    pub quads: Vec<DrawQuad>,
}

/// Delegated content of a frame. The last render pass is the root pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelegatedFrameData {
    pub device_scale_factor: f32,
    pub resource_list: Vec<TransferableResource>,
    pub render_pass_list: Vec<RenderPass>,
}

impl DelegatedFrameData {
    pub fn root_pass(&self) -> Option<&RenderPass> {
        self.render_pass_list.last()
    }

    /// Ids referenced by quads that were not shipped in `resource_list`.
    pub fn unlisted_resource_ids(&self) -> Vec<ResourceId> {
        let mut unlisted = Vec::new();
        for pass in &self.render_pass_list {
            for quad in &pass.quads {
                for id in quad.resource_ids() {
                    let listed = self.resource_list.iter().any(|resource| resource.id == id);
                    if !listed && !unlisted.contains(&id) {
                        unlisted.push(id);
                    }
                }
            }
        }
        unlisted
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LatencyInfo {
    pub trace_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositorFrameMetadata {
    pub device_scale_factor: f32,
    pub latency_info: Vec<LatencyInfo>,
}

impl Default for CompositorFrameMetadata {
    fn default() -> Self {
        Self {
            device_scale_factor: 1.0,
            latency_info: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CompositorFrame {
    pub metadata: CompositorFrameMetadata,
    pub delegated_frame_data: Option<Box<DelegatedFrameData>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CompositorFrameAck {
    pub resources: Vec<ReturnedResource>,
}

/// Identifier of a cross-process surface. The high 32 bits are the id
/// namespace of the producing compositor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SurfaceId(pub u64);

impl SurfaceId {
    pub const fn new(id_namespace: u32, local_id: u32) -> Self {
        Self(((id_namespace as u64) << 32) | local_id as u64)
    }

    pub const fn id_namespace(self) -> u32 {
        (self.0 >> 32) as u32
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// Destruction dependency on a surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SurfaceSequence {
    pub id_namespace: u32,
    pub sequence: u32,
}

impl SurfaceSequence {
    pub const fn new(id_namespace: u32, sequence: u32) -> Self {
        Self {
            id_namespace,
            sequence,
        }
    }

    pub const fn is_null(self) -> bool {
        self.id_namespace == 0 && self.sequence == 0
    }
}

/// Handle of the shared memory segment carrying a software frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SharedMemoryHandle(pub u64);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::rect;

    fn resource(id: u32, sync_point: u32) -> TransferableResource {
        TransferableResource {
            id: ResourceId(id),
            format: ResourceFormat::Rgba8888,
            size: geometry::size(16, 16),
            mailbox_holder: MailboxHolder {
                mailbox: Mailbox::from_counter(1, id as u64),
                texture_target: 0x0DE1,
                sync_point: SyncPoint(sync_point),
            },
            is_software: false,
            is_overlay_candidate: false,
        }
    }

    #[test]
    fn return_resources_carries_sync_points() {
        let returned = TransferableResource::return_resources(&[resource(3, 9), resource(4, 0)]);
        assert_eq!(returned.len(), 2);
        assert_eq!(returned[0].id, ResourceId(3));
        assert_eq!(returned[0].sync_point, SyncPoint(9));
        assert_eq!(returned[0].count, 1);
        assert!(!returned[1].lost);
    }

    #[test]
    fn surface_id_exposes_namespace() {
        let id = SurfaceId::new(7, 3);
        assert_eq!(id.id_namespace(), 7);
        assert!(!id.is_null());
        assert!(SurfaceId::default().is_null());
        assert!(SurfaceSequence::default().is_null());
    }

    #[test]
    fn mailbox_names_are_distinct_and_non_zero() {
        let first = Mailbox::from_counter(1, 1);
        let second = Mailbox::from_counter(1, 2);
        assert_ne!(first, second);
        assert!(!first.is_zero());
        assert!(Mailbox::default().is_zero());
    }

    #[test]
    fn unlisted_resource_ids_reports_quads_without_resources() {
        let frame = DelegatedFrameData {
            device_scale_factor: 1.0,
            resource_list: vec![resource(1, 0)],
            render_pass_list: vec![RenderPass {
                id: RenderPassId {
                    layer_id: 1,
                    index: 0,
                },
                output_rect: rect(0, 0, 10, 10),
                damage_rect: rect(0, 0, 10, 10),
                quads: vec![
                    DrawQuad {
                        rect: rect(0, 0, 5, 5),
                        material: QuadMaterial::Texture {
                            resource_id: ResourceId(1),
                        },
                    },
                    DrawQuad {
                        rect: rect(5, 5, 5, 5),
                        material: QuadMaterial::TileContent {
                            resource_id: ResourceId(2),
                        },
                    },
                ],
            }],
        };

        assert_eq!(frame.unlisted_resource_ids(), vec![ResourceId(2)]);
        assert_eq!(
            frame.root_pass().expect("root pass").output_rect,
            rect(0, 0, 10, 10)
        );
    }

    #[test]
    fn frame_round_trips_through_json() {
        let frame = CompositorFrame {
            metadata: CompositorFrameMetadata::default(),
            delegated_frame_data: Some(Box::new(DelegatedFrameData {
                device_scale_factor: 2.0,
                resource_list: vec![resource(5, 1)],
                render_pass_list: Vec::new(),
            })),
        };
        let json = serde_json::to_string(&frame).expect("serialize frame");
        let parsed: CompositorFrame = serde_json::from_str(&json).expect("parse frame");
        assert_eq!(parsed, frame);
    }
}
