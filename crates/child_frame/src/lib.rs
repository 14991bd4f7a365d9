//! Embedding of cross-process child frames into the embedder's layer tree.
//!
//! A [`ChildFrameCompositingHelper`] per out-of-process iframe or `<webview>`
//! guest turns the child's delegated frames or surface references into layers
//! and keeps the producer's resources flowing back. [`CompositingContext`]
//! owns the helpers of one embedder and [`CompositorInbox`] feeds it from the
//! IPC channel.

mod config;
mod container;
mod context;
mod helper;
mod inbox;
mod recipient;

pub use config::{CompositingConfig, InboxConfig};
pub use container::{
    ChildFrameContainer, ContainerId, ContainerRegistry, RegisteredContainer,
    SharedContainerRegistry,
};
pub use context::CompositingContext;
pub use helper::{ChildFrameCompositingHelper, CompositingMode};
pub use inbox::{CompositorInbox, PumpStats};
pub use recipient::{
    BrowserPluginRecipient, FrameProxyRecipient, FrameRecipient, HostMessageSink,
};
