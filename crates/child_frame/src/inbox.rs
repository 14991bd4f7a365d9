use std::time::Duration;

use compositor_protocol::ChildFrameEnvelope;
use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use log::{debug, trace};

use crate::config::InboxConfig;
use crate::context::CompositingContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PumpStats {
    pub received: usize,
    pub dispatched: usize,
}

/// Compositor-thread end of the child-frame IPC channel. Messages are handed
/// to the context in the order they were sent.
pub struct CompositorInbox {
    receiver: Receiver<ChildFrameEnvelope>,
    config: InboxConfig,
    batch: Vec<ChildFrameEnvelope>,
}

impl CompositorInbox {
    pub fn new(receiver: Receiver<ChildFrameEnvelope>, config: InboxConfig) -> Self {
        Self {
            receiver,
            config,
            batch: Vec::with_capacity(config.batch_size),
        }
    }

    pub fn config(&self) -> InboxConfig {
        self.config
    }

    /// True once every sender is gone and nothing is left to drain.
    pub fn is_closed(&self) -> bool {
        self.receiver.is_empty() && matches!(self.receiver.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Appends up to `max_items` messages to `output`. When nothing is queued,
    /// waits up to `wait_timeout` for the first one.
    pub fn drain_batch_with_wait(
        &self,
        output: &mut Vec<ChildFrameEnvelope>,
        max_items: usize,
        wait_timeout: Duration,
    ) {
        if max_items == 0 {
            return;
        }

        let mut drained_count = self.drain_ready(output, max_items);
        if drained_count > 0 || wait_timeout.is_zero() {
            return;
        }

        match self.receiver.recv_timeout(wait_timeout) {
            Ok(envelope) => {
                output.push(envelope);
                drained_count = 1;
            }
            Err(RecvTimeoutError::Timeout) => return,
            Err(RecvTimeoutError::Disconnected) => {
                debug!("child frame inbox disconnected");
                return;
            }
        }
        self.drain_ready(output, max_items - drained_count);
    }

    /// Drains one batch into `context`.
    pub fn pump(&mut self, context: &mut CompositingContext) -> PumpStats {
        let mut batch = std::mem::take(&mut self.batch);
        batch.clear();
        self.drain_batch_with_wait(&mut batch, self.config.batch_size, self.config.wait);

        let mut stats = PumpStats {
            received: batch.len(),
            dispatched: 0,
        };
        for envelope in batch.drain(..) {
            if context.dispatch(envelope) {
                stats.dispatched += 1;
            }
        }
        if stats.received > 0 {
            trace!(
                "inbox pumped {} messages, {} dispatched",
                stats.received, stats.dispatched
            );
        }
        self.batch = batch;
        stats
    }

    fn drain_ready(&self, output: &mut Vec<ChildFrameEnvelope>, max_items: usize) -> usize {
        let mut drained_count = 0;
        while drained_count < max_items {
            match self.receiver.try_recv() {
                Ok(envelope) => {
                    output.push(envelope);
                    drained_count += 1;
                }
                Err(_) => break,
            }
        }
        drained_count
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use compositor_protocol::{ChildFrameEnvelope, ChildFrameMessage, ChildFrameTarget, Color};
    use layer_tree::LayerTree;

    use super::{CompositorInbox, PumpStats};
    use crate::config::{CompositingConfig, InboxConfig};
    use crate::context::CompositingContext;

    const PROXY: ChildFrameTarget = ChildFrameTarget::FrameProxy { routing_id: 1 };

    fn gone(target: ChildFrameTarget) -> ChildFrameEnvelope {
        ChildFrameEnvelope {
            target,
            message: ChildFrameMessage::ChildFrameProcessGone,
        }
    }

    #[test]
    fn batch_size_bounds_each_pump() {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let mut inbox = CompositorInbox::new(
            receiver,
            InboxConfig {
                batch_size: 2,
                wait: Duration::ZERO,
            },
        );
        let (host_sender, _host_receiver) = crossbeam_channel::unbounded();
        let mut context = CompositingContext::new(
            LayerTree::new(1).into_shared(),
            host_sender,
            CompositingConfig::default(),
        );
        context.create_frame_proxy_helper(1, 10, None);

        for _ in 0..3 {
            sender.send(gone(PROXY)).expect("send");
        }
        sender
            .send(gone(ChildFrameTarget::BrowserPlugin { instance_id: 4 }))
            .expect("send");

        assert_eq!(
            inbox.pump(&mut context),
            PumpStats {
                received: 2,
                dispatched: 2
            }
        );
        assert_eq!(
            inbox.pump(&mut context),
            PumpStats {
                received: 2,
                dispatched: 1
            }
        );
        assert_eq!(inbox.pump(&mut context), PumpStats::default());
    }

    #[test]
    fn messages_keep_submission_order() {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let inbox = CompositorInbox::new(receiver, InboxConfig::default());
        for routing_id in 0..5 {
            sender
                .send(gone(ChildFrameTarget::FrameProxy { routing_id }))
                .expect("send");
        }

        let mut output = Vec::new();
        inbox.drain_batch_with_wait(&mut output, 16, Duration::ZERO);

        let order = output
            .iter()
            .map(|envelope| envelope.target)
            .collect::<Vec<_>>();
        assert_eq!(
            order,
            (0..5)
                .map(|routing_id| ChildFrameTarget::FrameProxy { routing_id })
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn empty_inbox_waits_for_first_message() {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let inbox = CompositorInbox::new(receiver, InboxConfig::default());

        let producer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            sender.send(gone(PROXY)).expect("send");
        });
        let mut output = Vec::new();
        inbox.drain_batch_with_wait(&mut output, 4, Duration::from_secs(5));
        producer.join().expect("producer thread");

        assert_eq!(output.len(), 1);
        assert!(inbox.is_closed());
    }

    #[test]
    fn wait_times_out_without_messages() {
        let (_sender, receiver) = crossbeam_channel::unbounded::<ChildFrameEnvelope>();
        let inbox = CompositorInbox::new(receiver, InboxConfig::default());

        let started = Instant::now();
        let mut output = Vec::new();
        inbox.drain_batch_with_wait(&mut output, 4, Duration::from_millis(5));

        assert!(output.is_empty());
        assert!(started.elapsed() >= Duration::from_millis(5));
        assert!(!inbox.is_closed());
    }

    #[test]
    fn gone_message_paints_placeholder() {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let mut inbox = CompositorInbox::new(receiver, InboxConfig::default());
        let (host_sender, _host_receiver) = crossbeam_channel::unbounded();
        let tree = LayerTree::new(1).into_shared();
        let mut context =
            CompositingContext::new(tree.clone(), host_sender, CompositingConfig::default());
        context.create_frame_proxy_helper(1, 10, None);
        context
            .helper_mut(PROXY)
            .expect("helper")
            .enable_compositing(true);

        sender.send(gone(PROXY)).expect("send");
        inbox.pump(&mut context);

        let background = context
            .helper(PROXY)
            .expect("helper")
            .background_layer()
            .expect("background");
        assert_eq!(
            tree.borrow()
                .layer(background)
                .expect("background")
                .background_color(),
            Color::GONE_GREEN
        );
    }
}
