use child_frame::{CompositingConfig, CompositingContext, CompositorInbox, InboxConfig};
use compositor_protocol::{ChildFrameEnvelope, HostMessage};
use crossbeam_channel::{Receiver, Sender};
use ipc_trace::{TraceEvent, TraceRecord, TraceSequencer};
use layer_tree::LayerTree;
use log::{debug, warn};

#[derive(Debug, Clone, Copy)]
pub struct ReplayOptions {
    pub surface_id_namespace: u32,
    pub inbox: InboxConfig,
    pub compositing: CompositingConfig,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            surface_id_namespace: 1,
            inbox: InboxConfig::default(),
            compositing: CompositingConfig::default(),
        }
    }
}

/// Feeds the non-outbound events of `records` through a fresh compositing
/// context. The result repeats those events and interleaves the host
/// messages the context produced, each right after the event that caused it.
pub fn replay_trace(records: &[TraceRecord], options: ReplayOptions) -> Vec<TraceRecord> {
    let (host_sender, host_receiver) = crossbeam_channel::unbounded();
    let (inbound_sender, inbound_receiver) = crossbeam_channel::unbounded();
    let layer_tree = LayerTree::new(options.surface_id_namespace).into_shared();
    let mut context = CompositingContext::new(layer_tree, host_sender, options.compositing);
    let mut inbox = CompositorInbox::new(inbound_receiver, options.inbox);
    let mut output = ReplayOutput::new(host_receiver);

    for record in records {
        output.catch_up_tick(record.tick);
        match &record.event {
            TraceEvent::Attach {
                target,
                host_routing_id,
            } => {
                output.push(record.event.clone());
                context.attach(*target, *host_routing_id, None);
            }
            TraceEvent::Detach { target } => {
                output.push(record.event.clone());
                if !context.destroy_helper(*target) {
                    warn!("trace detaches {target:?}, which has no helper");
                }
            }
            TraceEvent::Inbound(envelope) => {
                output.push(record.event.clone());
                deliver(&inbound_sender, &mut inbox, &mut context, envelope.clone());
            }
            TraceEvent::Commit => {
                output.push(TraceEvent::Commit);
                context.did_commit_compositor_frame();
            }
            TraceEvent::Outbound(_) => {}
        }
        output.collect_host_messages();
    }

    context.shutdown();
    output.collect_host_messages();
    output.into_records()
}

fn deliver(
    sender: &Sender<ChildFrameEnvelope>,
    inbox: &mut CompositorInbox,
    context: &mut CompositingContext,
    envelope: ChildFrameEnvelope,
) {
    if sender.send(envelope).is_err() {
        warn!("inbox closed before the trace finished");
        return;
    }
    loop {
        let stats = inbox.pump(context);
        if stats.received == 0 {
            break;
        }
        debug!(
            "replayed {} inbound messages ({} dispatched)",
            stats.received, stats.dispatched
        );
    }
}

struct ReplayOutput {
    sequencer: TraceSequencer,
    records: Vec<TraceRecord>,
    host_receiver: Receiver<HostMessage>,
}

impl ReplayOutput {
    fn new(host_receiver: Receiver<HostMessage>) -> Self {
        Self {
            sequencer: TraceSequencer::new(),
            records: Vec::new(),
            host_receiver,
        }
    }

    fn catch_up_tick(&mut self, tick: u64) {
        while self.sequencer.tick() < tick {
            self.sequencer.advance_tick();
        }
    }

    fn push(&mut self, event: TraceEvent) {
        let record = self.sequencer.record(event);
        self.records.push(record);
    }

    fn collect_host_messages(&mut self) {
        while let Ok(message) = self.host_receiver.try_recv() {
            self.push(TraceEvent::Outbound(message));
        }
    }

    fn into_records(self) -> Vec<TraceRecord> {
        self.records
    }
}

#[cfg(test)]
mod tests {
    use compositor_protocol::geometry::rect;
    use compositor_protocol::{
        ChildFrameEnvelope, ChildFrameMessage, ChildFrameTarget, CompositorFrame,
        CompositorFrameMetadata, DelegatedFrameData, HostMessageBody, Mailbox, MailboxHolder,
        OutputSurfaceEpoch, RenderPass, RenderPassId, ResourceFormat, ResourceId, SyncPoint,
        TransferableResource,
    };
    use ipc_trace::{
        TraceEvent, TraceRecord, TraceSequencer, compare_host_messages, outbound_messages,
        validate_trace,
    };

    use super::{ReplayOptions, replay_trace};

    const PROXY: ChildFrameTarget = ChildFrameTarget::FrameProxy { routing_id: 6 };

    fn frame(epoch: OutputSurfaceEpoch, resource_ids: &[u32]) -> TraceEvent {
        let resource_list = resource_ids
            .iter()
            .map(|id| TransferableResource {
                id: ResourceId(*id),
                format: ResourceFormat::Bgra8888,
                size: compositor_protocol::geometry::size(4, 4),
                mailbox_holder: MailboxHolder {
                    mailbox: Mailbox::from_counter(2, *id as u64),
                    texture_target: 0x0DE1,
                    sync_point: SyncPoint::NONE,
                },
                is_software: false,
                is_overlay_candidate: false,
            })
            .collect();
        TraceEvent::Inbound(ChildFrameEnvelope {
            target: PROXY,
            message: ChildFrameMessage::CompositorFrameSwapped {
                frame: CompositorFrame {
                    metadata: CompositorFrameMetadata::default(),
                    delegated_frame_data: Some(Box::new(DelegatedFrameData {
                        device_scale_factor: 1.0,
                        resource_list,
                        render_pass_list: vec![RenderPass {
                            id: RenderPassId {
                                layer_id: 1,
                                index: 0,
                            },
                            output_rect: rect(0, 0, 100, 100),
                            damage_rect: rect(0, 0, 100, 100),
                            quads: Vec::new(),
                        }],
                    })),
                },
                epoch,
                shared_memory: None,
            },
        })
    }

    fn trace(events: Vec<TraceEvent>) -> Vec<TraceRecord> {
        let mut sequencer = TraceSequencer::new();
        events
            .into_iter()
            .map(|event| {
                if matches!(event, TraceEvent::Commit) {
                    sequencer.advance_tick();
                }
                sequencer.record(event)
            })
            .collect()
    }

    #[test]
    fn replay_acknowledges_each_committed_frame_once() {
        let epoch = OutputSurfaceEpoch::new(1, 1, 1);
        let records = trace(vec![
            TraceEvent::Attach {
                target: PROXY,
                host_routing_id: 60,
            },
            frame(epoch, &[]),
            TraceEvent::Commit,
            TraceEvent::Commit,
            TraceEvent::Detach { target: PROXY },
        ]);

        let replayed = replay_trace(&records, ReplayOptions::default());

        let outbound = outbound_messages(&replayed);
        assert_eq!(outbound.len(), 1);
        assert!(outbound[0].is_ack());
        assert_eq!(validate_trace(&replayed), Ok(()));
        assert!(matches!(
            replayed[3].event,
            TraceEvent::Outbound(ref message) if message.is_ack()
        ));
    }

    #[test]
    fn replaying_a_replay_reproduces_host_messages() {
        let first = OutputSurfaceEpoch::new(1, 1, 1);
        let second = OutputSurfaceEpoch::new(1, 2, 1);
        let records = trace(vec![
            TraceEvent::Attach {
                target: PROXY,
                host_routing_id: 60,
            },
            frame(first, &[1, 2]),
            TraceEvent::Commit,
            frame(second, &[1]),
            TraceEvent::Commit,
        ]);

        let replayed = replay_trace(&records, ReplayOptions::default());
        let again = replay_trace(&replayed, ReplayOptions::default());

        assert_eq!(
            compare_host_messages(&outbound_messages(&replayed), &outbound_messages(&again)),
            Ok(())
        );
        let reclaimed = outbound_messages(&replayed)
            .into_iter()
            .find_map(|message| match &message.body {
                HostMessageBody::ReclaimCompositorResources(params) => Some(params.clone()),
                _ => None,
            })
            .expect("resources of the first epoch are reclaimed");
        assert_eq!(reclaimed.epoch, first);
        assert!(reclaimed.ack.resources.iter().all(|resource| resource.lost));
    }
}
