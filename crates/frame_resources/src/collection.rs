use std::collections::HashMap;

use compositor_protocol::{OutputSurfaceEpoch, ResourceId, ReturnedResource, TransferableResource};
use log::{debug, warn};

use crate::{ResourceError, UnusedResources};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct RefCount {
    // Times the producer sent the id; returned as `count`.
    refs_to_return: u32,
    // Consumer-side references still alive.
    refs_to_wait_for: u32,
}

/// Ledger of every resource delivered under one [`OutputSurfaceEpoch`].
///
/// Ids from another epoch are rejected instead of being matched against this
/// epoch's entries, since a recreated output surface reuses ids.
#[derive(Debug)]
pub struct DelegatedFrameResourceCollection {
    epoch: OutputSurfaceEpoch,
    client_attached: bool,
    lost_all_resources: bool,
    ref_counts: HashMap<ResourceId, RefCount>,
    returned_for_child: Vec<ReturnedResource>,
}

impl DelegatedFrameResourceCollection {
    pub fn new(epoch: OutputSurfaceEpoch) -> Self {
        Self {
            epoch,
            client_attached: false,
            lost_all_resources: false,
            ref_counts: HashMap::new(),
            returned_for_child: Vec::new(),
        }
    }

    pub fn epoch(&self) -> OutputSurfaceEpoch {
        self.epoch
    }

    /// While a client is attached, releases report [`UnusedResources::Available`]
    /// so the client can return them without waiting for the next frame.
    pub fn set_client_attached(&mut self, attached: bool) {
        self.client_attached = attached;
    }

    pub fn has_client(&self) -> bool {
        self.client_attached
    }

    pub fn received_resources(&mut self, resources: &[TransferableResource]) {
        self.assert_accepting_resources("received_resources");
        for resource in resources {
            let ref_count = self.ref_counts.entry(resource.id).or_default();
            ref_count.refs_to_return = ref_count
                .refs_to_return
                .checked_add(1)
                .expect("resource return count overflow");
        }
    }

    pub fn ref_resources(&mut self, resources: &[TransferableResource]) {
        self.assert_accepting_resources("ref_resources");
        for resource in resources {
            let Some(ref_count) = self.ref_counts.get_mut(&resource.id) else {
                panic!(
                    "resource {} referenced before it was received",
                    resource.id.0
                );
            };
            ref_count.refs_to_wait_for = ref_count
                .refs_to_wait_for
                .checked_add(1)
                .expect("resource reference count overflow");
        }
    }

    /// Drops consumer references. Resources whose last reference goes away are
    /// queued for return to the producer.
    ///
    /// The whole batch is validated before anything is applied, so a rejected
    /// batch leaves the ledger untouched.
    pub fn unref_resources(
        &mut self,
        epoch: OutputSurfaceEpoch,
        returned: &[ReturnedResource],
    ) -> Result<UnusedResources, ResourceError> {
        if epoch != self.epoch {
            return Err(ResourceError::StaleEpoch {
                expected: self.epoch,
                actual: epoch,
            });
        }
        if self.lost_all_resources {
            debug!(
                "ignoring {} released resources after the collection for {:?} lost them",
                returned.len(),
                self.epoch
            );
            return Ok(UnusedResources::None);
        }

        let mut pending_release = HashMap::<ResourceId, u32>::new();
        for resource in returned {
            let Some(ref_count) = self.ref_counts.get(&resource.id) else {
                return Err(ResourceError::UnknownResource { id: resource.id });
            };
            let requested = pending_release.entry(resource.id).or_default();
            *requested = requested.saturating_add(resource.count);
            if *requested > ref_count.refs_to_wait_for {
                return Err(ResourceError::OverRelease {
                    id: resource.id,
                    outstanding: ref_count.refs_to_wait_for,
                    requested: *requested,
                });
            }
        }

        let mut returned_any = false;
        for resource in returned {
            let Some(ref_count) = self.ref_counts.get_mut(&resource.id) else {
                continue;
            };
            ref_count.refs_to_wait_for -= resource.count;
            if ref_count.refs_to_wait_for > 0 {
                continue;
            }
            let refs_to_return = ref_count.refs_to_return;
            self.ref_counts.remove(&resource.id);
            self.returned_for_child.push(ReturnedResource {
                id: resource.id,
                sync_point: resource.sync_point,
                count: refs_to_return,
                lost: resource.lost,
            });
            returned_any = true;
        }

        if returned_any && self.client_attached {
            Ok(UnusedResources::Available)
        } else {
            Ok(UnusedResources::None)
        }
    }

    pub fn take_unused_resources_for_child_compositor(&mut self) -> Vec<ReturnedResource> {
        std::mem::take(&mut self.returned_for_child)
    }

    /// Reports every tracked resource as lost. Returns `true` when something was
    /// queued, in which case the caller must send it upstream before dropping
    /// the collection.
    pub fn lose_all_resources(&mut self) -> bool {
        if self.lost_all_resources {
            warn!("collection for {:?} already lost its resources", self.epoch);
            return false;
        }
        self.lost_all_resources = true;
        if self.ref_counts.is_empty() {
            return false;
        }

        let mut lost = self
            .ref_counts
            .drain()
            .map(|(id, ref_count)| ReturnedResource {
                id,
                sync_point: compositor_protocol::SyncPoint::NONE,
                count: ref_count.refs_to_return,
                lost: true,
            })
            .collect::<Vec<_>>();
        lost.sort_by_key(|resource| resource.id);
        debug!(
            "collection for {:?} lost {} resources",
            self.epoch,
            lost.len()
        );
        self.returned_for_child.extend(lost);
        true
    }

    pub fn outstanding_resource_count(&self) -> usize {
        self.ref_counts.len()
    }

    pub fn is_drained(&self) -> bool {
        self.ref_counts.is_empty() && self.returned_for_child.is_empty()
    }

    fn assert_accepting_resources(&self, stage: &'static str) {
        if self.lost_all_resources {
            panic!(
                "resource collection rejects new resources after losing all of them at stage {stage}"
            );
        }
    }
}
