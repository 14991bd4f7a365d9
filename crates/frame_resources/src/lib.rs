//! Bookkeeping for GPU resources delegated by a child compositor.
//!
//! The consumer never frees producer resources. It counts references, and once
//! nothing on the consumer side still uses a resource it is queued for return
//! to the producer, either inside the next frame acknowledgement or in a
//! standalone reclaim message.

use std::fmt;

use compositor_protocol::{OutputSurfaceEpoch, ResourceId};

mod collection;
mod provider;

pub use collection::DelegatedFrameResourceCollection;
pub use provider::DelegatedFrameProvider;

/// Tells the owner of a collection whether it should push unused resources
/// upstream right away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnusedResources {
    None,
    Available,
}

impl UnusedResources {
    pub fn is_available(self) -> bool {
        matches!(self, UnusedResources::Available)
    }

    pub fn merge(self, other: UnusedResources) -> UnusedResources {
        if self.is_available() || other.is_available() {
            UnusedResources::Available
        } else {
            UnusedResources::None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceError {
    StaleEpoch {
        expected: OutputSurfaceEpoch,
        actual: OutputSurfaceEpoch,
    },
    UnknownResource {
        id: ResourceId,
    },
    OverRelease {
        id: ResourceId,
        outstanding: u32,
        requested: u32,
    },
}

impl fmt::Display for ResourceError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceError::StaleEpoch { expected, actual } => write!(
                formatter,
                "resources returned for output surface {actual:?} but collection tracks {expected:?}"
            ),
            ResourceError::UnknownResource { id } => {
                write!(formatter, "resource {} is not tracked by this collection", id.0)
            }
            ResourceError::OverRelease {
                id,
                outstanding,
                requested,
            } => write!(
                formatter,
                "resource {} released {requested} times with only {outstanding} outstanding references",
                id.0
            ),
        }
    }
}

impl std::error::Error for ResourceError {}
