//! JSONL traces of the child-frame IPC boundary.
//!
//! A trace interleaves what reached the embedder's compositor thread (helper
//! lifetime, inbound child-frame messages, commits) with the host messages it
//! produced, so a run can be replayed and its upstream traffic compared.

use std::collections::HashMap;
use std::fmt;
use std::io::{BufRead, Write};

use compositor_protocol::{
    ChildFrameEnvelope, ChildFrameMessage, ChildFrameTarget, HostDestination, HostMessage,
    HostMessageBody, OutputSurfaceEpoch,
};
use serde::{Deserialize, Serialize};

pub const TRACE_SCHEMA_VERSION: u16 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TraceEvent {
    /// A helper was created for `target`, reporting on `host_routing_id`.
    Attach {
        target: ChildFrameTarget,
        host_routing_id: i32,
    },
    Detach {
        target: ChildFrameTarget,
    },
    Inbound(ChildFrameEnvelope),
    /// The embedder's compositor committed a frame.
    Commit,
    Outbound(HostMessage),
}

impl TraceEvent {
    pub fn name(&self) -> &'static str {
        match self {
            TraceEvent::Attach { .. } => "Attach",
            TraceEvent::Detach { .. } => "Detach",
            TraceEvent::Inbound(_) => "Inbound",
            TraceEvent::Commit => "Commit",
            TraceEvent::Outbound(_) => "Outbound",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceRecord {
    pub schema_version: u16,
    pub event_id: u64,
    pub tick: u64,
    pub event: TraceEvent,
}

/// Hands out event ids and ticks for records written in order.
#[derive(Debug, Clone)]
pub struct TraceSequencer {
    next_event_id: u64,
    tick: u64,
}

impl TraceSequencer {
    pub fn new() -> Self {
        Self {
            next_event_id: 1,
            tick: 0,
        }
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn advance_tick(&mut self) {
        self.tick = self.tick.checked_add(1).expect("trace tick overflow");
    }

    pub fn record(&mut self, event: TraceEvent) -> TraceRecord {
        let event_id = self.next_event_id;
        self.next_event_id = event_id.checked_add(1).expect("trace event id overflow");
        TraceRecord {
            schema_version: TRACE_SCHEMA_VERSION,
            event_id,
            tick: self.tick,
            event,
        }
    }
}

impl Default for TraceSequencer {
    fn default() -> Self {
        Self::new()
    }
}

pub fn write_jsonl_record_line(
    writer: &mut dyn Write,
    record: &TraceRecord,
) -> Result<(), std::io::Error> {
    serde_json::to_writer(&mut *writer, record).map_err(|error| {
        std::io::Error::other(format!("serialize trace record as JSON failed: {error}"))
    })?;
    writer.write_all(b"\n")
}

pub fn read_jsonl_records(reader: &mut dyn BufRead) -> Result<Vec<TraceRecord>, std::io::Error> {
    let mut records = Vec::new();
    let mut line_buffer = String::new();
    let mut line_number = 0usize;
    loop {
        line_buffer.clear();
        let bytes = reader.read_line(&mut line_buffer)?;
        if bytes == 0 {
            break;
        }
        line_number = line_number
            .checked_add(1)
            .unwrap_or_else(|| panic!("jsonl line number overflow"));
        if line_buffer.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str::<TraceRecord>(&line_buffer).map_err(|error| {
            std::io::Error::other(format!(
                "parse trace record JSON at line {line_number} failed: {error}"
            ))
        })?;
        records.push(record);
    }
    Ok(records)
}

/// Host messages of `records`, in trace order.
pub fn outbound_messages(records: &[TraceRecord]) -> Vec<&HostMessage> {
    records
        .iter()
        .filter_map(|record| match &record.event {
            TraceEvent::Outbound(message) => Some(message),
            _ => None,
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceValidationError {
    EmptyTrace,
    UnsupportedSchema {
        event_id: u64,
        schema_version: u16,
    },
    EventIdNotStrictlyIncreasing {
        previous: u64,
        current: u64,
    },
    TickDecreased {
        previous: u64,
        current: u64,
    },
    DuplicateAttach {
        target: ChildFrameTarget,
    },
    UnknownTarget {
        event_id: u64,
        target: ChildFrameTarget,
    },
    UnknownDestination {
        event_id: u64,
        destination: HostDestination,
    },
    MixedContent {
        event_id: u64,
        target: ChildFrameTarget,
    },
    EmptyRenderPassList {
        event_id: u64,
        target: ChildFrameTarget,
    },
    AckWithoutFrame {
        event_id: u64,
        target: ChildFrameTarget,
    },
    AckEpochMismatch {
        event_id: u64,
        target: ChildFrameTarget,
        expected: OutputSurfaceEpoch,
        actual: OutputSurfaceEpoch,
    },
}

impl fmt::Display for TraceValidationError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceValidationError::EmptyTrace => write!(formatter, "trace has no records"),
            TraceValidationError::UnsupportedSchema {
                event_id,
                schema_version,
            } => write!(
                formatter,
                "event {event_id} uses schema version {schema_version}, expected {TRACE_SCHEMA_VERSION}"
            ),
            TraceValidationError::EventIdNotStrictlyIncreasing { previous, current } => write!(
                formatter,
                "event id {current} does not follow {previous}"
            ),
            TraceValidationError::TickDecreased { previous, current } => {
                write!(formatter, "tick decreased from {previous} to {current}")
            }
            TraceValidationError::DuplicateAttach { target } => {
                write!(formatter, "{target:?} attached while already attached")
            }
            TraceValidationError::UnknownTarget { event_id, target } => {
                write!(formatter, "event {event_id} addresses unattached {target:?}")
            }
            TraceValidationError::UnknownDestination {
                event_id,
                destination,
            } => write!(
                formatter,
                "event {event_id} sends to {destination:?}, which no attached target uses"
            ),
            TraceValidationError::MixedContent { event_id, target } => write!(
                formatter,
                "event {event_id} mixes delegated frames and surfaces for {target:?}"
            ),
            TraceValidationError::EmptyRenderPassList { event_id, target } => write!(
                formatter,
                "event {event_id} swaps a delegated frame without render passes for {target:?}"
            ),
            TraceValidationError::AckWithoutFrame { event_id, target } => write!(
                formatter,
                "event {event_id} acknowledges a frame {target:?} never swapped"
            ),
            TraceValidationError::AckEpochMismatch {
                event_id,
                target,
                expected,
                actual,
            } => write!(
                formatter,
                "event {event_id} acknowledges {target:?} for {actual:?}, latest frame was {expected:?}"
            ),
        }
    }
}

impl std::error::Error for TraceValidationError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContentKind {
    None,
    Delegated,
    Surface,
}

#[derive(Debug, Clone, Copy)]
struct TargetState {
    attached: bool,
    content: ContentKind,
    latest_epoch: Option<OutputSurfaceEpoch>,
    frame_pending_ack: bool,
}

impl TargetState {
    fn attached() -> Self {
        Self {
            attached: true,
            content: ContentKind::None,
            latest_epoch: None,
            frame_pending_ack: false,
        }
    }
}

pub fn validate_trace(records: &[TraceRecord]) -> Result<(), TraceValidationError> {
    if records.is_empty() {
        return Err(TraceValidationError::EmptyTrace);
    }

    let mut previous_event_id: Option<u64> = None;
    let mut previous_tick: Option<u64> = None;
    let mut targets: HashMap<ChildFrameTarget, TargetState> = HashMap::new();
    // Host messages keep arriving for a detached target while it tears down,
    // so destinations are never forgotten.
    let mut destinations: HashMap<HostDestination, ChildFrameTarget> = HashMap::new();

    for record in records {
        let event_id = record.event_id;
        if record.schema_version != TRACE_SCHEMA_VERSION {
            return Err(TraceValidationError::UnsupportedSchema {
                event_id,
                schema_version: record.schema_version,
            });
        }
        if let Some(previous) = previous_event_id
            && event_id <= previous
        {
            return Err(TraceValidationError::EventIdNotStrictlyIncreasing {
                previous,
                current: event_id,
            });
        }
        previous_event_id = Some(event_id);
        if let Some(previous) = previous_tick
            && record.tick < previous
        {
            return Err(TraceValidationError::TickDecreased {
                previous,
                current: record.tick,
            });
        }
        previous_tick = Some(record.tick);

        match &record.event {
            TraceEvent::Attach {
                target,
                host_routing_id,
            } => {
                if targets.get(target).is_some_and(|state| state.attached) {
                    return Err(TraceValidationError::DuplicateAttach { target: *target });
                }
                targets.insert(*target, TargetState::attached());
                destinations.insert(target.host_destination(*host_routing_id), *target);
            }
            TraceEvent::Detach { target } => {
                let state = attached_state(&mut targets, event_id, *target)?;
                state.attached = false;
            }
            TraceEvent::Inbound(envelope) => {
                let state = attached_state(&mut targets, event_id, envelope.target)?;
                validate_inbound(state, event_id, envelope)?;
            }
            TraceEvent::Commit => {}
            TraceEvent::Outbound(message) => {
                let Some(target) = destinations.get(&message.destination).copied() else {
                    return Err(TraceValidationError::UnknownDestination {
                        event_id,
                        destination: message.destination,
                    });
                };
                if let HostMessageBody::CompositorFrameSwappedAck(params) = &message.body {
                    let Some(state) = targets.get_mut(&target) else {
                        return Err(TraceValidationError::UnknownTarget { event_id, target });
                    };
                    if !state.frame_pending_ack {
                        return Err(TraceValidationError::AckWithoutFrame { event_id, target });
                    }
                    if let Some(expected) = state.latest_epoch
                        && expected != params.producing_epoch
                    {
                        return Err(TraceValidationError::AckEpochMismatch {
                            event_id,
                            target,
                            expected,
                            actual: params.producing_epoch,
                        });
                    }
                    state.frame_pending_ack = false;
                }
            }
        }
    }

    Ok(())
}

fn attached_state(
    targets: &mut HashMap<ChildFrameTarget, TargetState>,
    event_id: u64,
    target: ChildFrameTarget,
) -> Result<&mut TargetState, TraceValidationError> {
    match targets.get_mut(&target) {
        Some(state) if state.attached => Ok(state),
        _ => Err(TraceValidationError::UnknownTarget { event_id, target }),
    }
}

fn validate_inbound(
    state: &mut TargetState,
    event_id: u64,
    envelope: &ChildFrameEnvelope,
) -> Result<(), TraceValidationError> {
    let target = envelope.target;
    match &envelope.message {
        ChildFrameMessage::CompositorFrameSwapped { frame, epoch, .. } => {
            let Some(frame_data) = &frame.delegated_frame_data else {
                return Ok(());
            };
            if frame_data.render_pass_list.is_empty() {
                return Err(TraceValidationError::EmptyRenderPassList { event_id, target });
            }
            if state.content == ContentKind::Surface {
                return Err(TraceValidationError::MixedContent { event_id, target });
            }
            state.content = ContentKind::Delegated;
            state.latest_epoch = Some(*epoch);
            state.frame_pending_ack = true;
        }
        ChildFrameMessage::SetChildFrameSurface { .. } => {
            if state.content == ContentKind::Delegated {
                return Err(TraceValidationError::MixedContent { event_id, target });
            }
            state.content = ContentKind::Surface;
        }
        ChildFrameMessage::ChildFrameProcessGone => {}
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompareError {
    MessageCountMismatch { expected: usize, actual: usize },
    MessageMismatch { index: usize },
}

impl fmt::Display for CompareError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompareError::MessageCountMismatch { expected, actual } => write!(
                formatter,
                "expected {expected} host messages, replay produced {actual}"
            ),
            CompareError::MessageMismatch { index } => {
                write!(formatter, "host message {index} differs from the recording")
            }
        }
    }
}

impl std::error::Error for CompareError {}

pub fn compare_host_messages(
    expected: &[&HostMessage],
    actual: &[&HostMessage],
) -> Result<(), CompareError> {
    if expected.len() != actual.len() {
        return Err(CompareError::MessageCountMismatch {
            expected: expected.len(),
            actual: actual.len(),
        });
    }

    for (index, (left, right)) in expected.iter().zip(actual.iter()).enumerate() {
        if left != right {
            return Err(CompareError::MessageMismatch { index });
        }
    }

    Ok(())
}
