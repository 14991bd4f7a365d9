use compositor_protocol::{
    DelegatedFrameData, OutputSurfaceEpoch, Rect, Size, TransferableResource,
};
use compositor_protocol::geometry::{size_is_empty, union_rect};

use crate::{DelegatedFrameResourceCollection, UnusedResources};

/// Holds the latest delegated frame of a child and the collection references
/// its resources keep alive.
///
/// The provider does not own the collection: callers pass the collection of
/// the same epoch into every call, and a provider must be released with
/// [`DelegatedFrameProvider::release`] before the collection is dropped.
#[derive(Debug)]
pub struct DelegatedFrameProvider {
    epoch: OutputSurfaceEpoch,
    frame: Box<DelegatedFrameData>,
    frame_size: Size,
    pending_damage: Option<Rect>,
    revision: u64,
}

impl DelegatedFrameProvider {
    pub fn new(
        collection: &mut DelegatedFrameResourceCollection,
        frame: Box<DelegatedFrameData>,
    ) -> Self {
        let frame_size = root_output_size(&frame);
        collection.received_resources(&frame.resource_list);
        collection.ref_resources(&frame.resource_list);
        let pending_damage = non_empty(Rect::from_size(frame_size));
        Self {
            epoch: collection.epoch(),
            frame,
            frame_size,
            pending_damage,
            revision: 1,
        }
    }

    pub fn epoch(&self) -> OutputSurfaceEpoch {
        self.epoch
    }

    pub fn frame_size(&self) -> Size {
        self.frame_size
    }

    pub fn frame_data(&self) -> &DelegatedFrameData {
        &self.frame
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Replaces the frame in place. The new frame's references are taken
    /// before the previous frame's are dropped, so a resource carried over
    /// from one frame to the next stays referenced and is returned only once
    /// the last frame showing it goes away.
    pub fn set_frame_data(
        &mut self,
        collection: &mut DelegatedFrameResourceCollection,
        frame: Box<DelegatedFrameData>,
    ) -> UnusedResources {
        let frame_size = root_output_size(&frame);
        collection.received_resources(&frame.resource_list);
        collection.ref_resources(&frame.resource_list);

        let released = self.unref_current_frame(collection);

        let root_damage = frame
            .root_pass()
            .map(|pass| pass.damage_rect)
            .unwrap_or_else(|| Rect::from_size(frame_size));
        let damage = if frame_size != self.frame_size {
            Rect::from_size(frame_size)
        } else {
            root_damage
        };
        if let Some(damage) = non_empty(damage) {
            self.pending_damage = Some(union_rect(self.pending_damage, damage));
        }
        self.frame = frame;
        self.frame_size = frame_size;
        self.revision = self
            .revision
            .checked_add(1)
            .expect("delegated frame revision overflow");
        released
    }

    /// Damage accumulated since the last call, in frame pixels.
    pub fn take_damage(&mut self) -> Option<Rect> {
        self.pending_damage.take()
    }

    pub fn release(mut self, collection: &mut DelegatedFrameResourceCollection) -> UnusedResources {
        self.unref_current_frame(collection)
    }

    fn unref_current_frame(
        &mut self,
        collection: &mut DelegatedFrameResourceCollection,
    ) -> UnusedResources {
        assert_eq!(
            collection.epoch(),
            self.epoch,
            "delegated frame provider used with a collection from another output surface"
        );
        let returned = TransferableResource::return_resources(&self.frame.resource_list);
        match collection.unref_resources(self.epoch, &returned) {
            Ok(released) => released,
            Err(error) => panic!("delegated frame provider lost track of its resources: {error}"),
        }
    }
}

fn root_output_size(frame: &DelegatedFrameData) -> Size {
    let Some(root_pass) = frame.root_pass() else {
        panic!("delegated frame must contain at least one render pass");
    };
    root_pass.output_rect.size
}

fn non_empty(rect: Rect) -> Option<Rect> {
    (!size_is_empty(rect.size)).then_some(rect)
}
