//! Where a helper's upstream messages go.
//!
//! Frame proxies and browser plugins reach their producers through different
//! host routes; a [`FrameRecipient`] hides that difference from the helper.

use compositor_protocol::{
    CompositorFrameSwappedAckParams, HostDestination, HostMessage, HostMessageBody,
    ReclaimCompositorResourcesParams, SurfaceId, SurfaceSequence,
};
use crossbeam_channel::Sender;
use log::{trace, warn};

pub trait HostMessageSink {
    fn send_host_message(&self, message: HostMessage);
}

impl HostMessageSink for Sender<HostMessage> {
    fn send_host_message(&self, message: HostMessage) {
        if let Err(error) = self.send(message) {
            warn!("host message dropped, channel disconnected: {:?}", error.0.body);
        }
    }
}

pub trait FrameRecipient {
    fn destination(&self) -> HostDestination;

    fn send(&self, body: HostMessageBody);

    fn satisfy_dependency(&self, sequence: SurfaceSequence) {
        self.send(HostMessageBody::SatisfySequence(sequence));
    }

    fn require_dependency(&self, surface_id: SurfaceId, sequence: SurfaceSequence) {
        self.send(HostMessageBody::RequireSequence {
            surface_id,
            sequence,
        });
    }

    fn send_ack(&self, params: CompositorFrameSwappedAckParams) {
        self.send(HostMessageBody::CompositorFrameSwappedAck(params));
    }

    fn reclaim_resources(&self, params: ReclaimCompositorResourcesParams) {
        self.send(HostMessageBody::ReclaimCompositorResources(params));
    }
}

/// Recipient for an out-of-process iframe.
pub struct FrameProxyRecipient<S: HostMessageSink> {
    host_routing_id: i32,
    sink: S,
}

impl<S: HostMessageSink> FrameProxyRecipient<S> {
    pub fn new(host_routing_id: i32, sink: S) -> Self {
        Self {
            host_routing_id,
            sink,
        }
    }
}

impl<S: HostMessageSink> FrameRecipient for FrameProxyRecipient<S> {
    fn destination(&self) -> HostDestination {
        HostDestination::FrameProxy {
            host_routing_id: self.host_routing_id,
        }
    }

    fn send(&self, body: HostMessageBody) {
        let destination = self.destination();
        trace!("frame proxy {} <- {body:?}", self.host_routing_id);
        self.sink.send_host_message(HostMessage { destination, body });
    }
}

/// Recipient for a `<webview>` guest; messages also carry the plugin
/// instance.
pub struct BrowserPluginRecipient<S: HostMessageSink> {
    host_routing_id: i32,
    browser_plugin_instance_id: i32,
    sink: S,
}

impl<S: HostMessageSink> BrowserPluginRecipient<S> {
    pub fn new(host_routing_id: i32, browser_plugin_instance_id: i32, sink: S) -> Self {
        Self {
            host_routing_id,
            browser_plugin_instance_id,
            sink,
        }
    }
}

impl<S: HostMessageSink> FrameRecipient for BrowserPluginRecipient<S> {
    fn destination(&self) -> HostDestination {
        HostDestination::BrowserPlugin {
            host_routing_id: self.host_routing_id,
            browser_plugin_instance_id: self.browser_plugin_instance_id,
        }
    }

    fn send(&self, body: HostMessageBody) {
        let destination = self.destination();
        trace!(
            "browser plugin {} <- {body:?}",
            self.browser_plugin_instance_id
        );
        self.sink.send_host_message(HostMessage { destination, body });
    }
}

#[cfg(test)]
mod tests {
    use compositor_protocol::{
        CompositorFrameAck, CompositorFrameSwappedAckParams, HostDestination, HostMessageBody,
        OutputSurfaceEpoch, SurfaceId, SurfaceSequence,
    };

    use super::{BrowserPluginRecipient, FrameProxyRecipient, FrameRecipient};

    #[test]
    fn browser_plugin_messages_carry_instance_id() {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let recipient = BrowserPluginRecipient::new(12, 4, sender);

        recipient.require_dependency(SurfaceId::new(3, 1), SurfaceSequence::new(1, 9));

        let message = receiver.try_recv().expect("require message");
        assert_eq!(
            message.destination,
            HostDestination::BrowserPlugin {
                host_routing_id: 12,
                browser_plugin_instance_id: 4,
            }
        );
        assert_eq!(
            message.body,
            HostMessageBody::RequireSequence {
                surface_id: SurfaceId::new(3, 1),
                sequence: SurfaceSequence::new(1, 9),
            }
        );
    }

    #[test]
    fn frame_proxy_ack_targets_host_route() {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let recipient = FrameProxyRecipient::new(30, sender);

        recipient.send_ack(CompositorFrameSwappedAckParams {
            producing_epoch: OutputSurfaceEpoch::new(1, 2, 3),
            ack: CompositorFrameAck::default(),
        });

        let message = receiver.try_recv().expect("ack");
        assert!(message.is_ack());
        assert_eq!(message.destination.host_routing_id(), 30);
    }

    #[test]
    fn disconnected_sink_drops_messages_quietly() {
        let (sender, receiver) = crossbeam_channel::unbounded();
        drop(receiver);
        let recipient = FrameProxyRecipient::new(1, sender);
        recipient.satisfy_dependency(SurfaceSequence::new(1, 1));
    }
}
