//! Packet assembly and timestamp gating.

use crate::config::CounterSettings;
use crate::constants::{TIME_FIELD, UNITS_SUFFIX};
use crate::driver::counter::CounterState;
use crate::models::{LoopPacket, ParsedRecord, TimestampMode};
use std::collections::BTreeMap;

/// A packet before the timestamp gate
#[derive(Debug, Clone, PartialEq)]
pub struct PacketDraft {
    /// Candidate timestamp; `None` when the document time was unusable
    pub date_time: Option<i64>,
    pub observations: BTreeMap<String, Option<f64>>,
}

impl PacketDraft {
    /// Finish the packet once the gate has accepted `date_time`
    pub fn into_packet(self, date_time: i64) -> LoopPacket {
        LoopPacket::new(date_time, self.observations)
    }
}

/// Turn a converted record into a packet draft.
///
/// Unit helper fields and the time field are dropped from the observations,
/// the counter field is replaced by its delta when configured, and the
/// candidate timestamp is chosen by `mode`. Returns the counter state for the
/// next cycle alongside the draft.
pub fn assemble(
    mut record: ParsedRecord,
    mode: TimestampMode,
    cycle_start: i64,
    counter_settings: &CounterSettings,
    counter: CounterState,
) -> (PacketDraft, CounterState) {
    record.retain(|field, _| !field.ends_with(UNITS_SUFFIX));
    let document_time = record
        .remove(TIME_FIELD)
        .flatten()
        .and_then(|value| value.as_timestamp());

    let mut observations: BTreeMap<String, Option<f64>> = record
        .into_iter()
        .map(|(field, value)| (field, value.and_then(|value| value.as_f64())))
        .collect();

    let mut counter = counter;
    if counter_settings.to_delta
        && let Some(reading) = observations.get_mut(&counter_settings.field)
    {
        let (delta, next) = counter.advance(*reading, counter_settings.reset_policy);
        *reading = delta;
        counter = next;
    }

    let date_time = match mode {
        TimestampMode::WallClock => Some(cycle_start),
        TimestampMode::Document => document_time,
    };

    (
        PacketDraft {
            date_time,
            observations,
        },
        counter,
    )
}

/// Timestamp of the last emitted packet.
///
/// Only candidates strictly later than the watermark pass, so emitted
/// timestamps strictly increase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Watermark(i64);

impl Watermark {
    /// A watermark that admits anything from `start` onwards
    pub fn before(start: i64) -> Self {
        Self(start.saturating_sub(1))
    }

    pub fn value(&self) -> i64 {
        self.0
    }

    pub fn admits(&self, candidate: Option<i64>) -> bool {
        candidate.is_some_and(|ts| ts > self.0)
    }

    /// Record an emitted timestamp
    pub fn advance(&mut self, emitted: i64) {
        self.0 = self.0.max(emitted);
    }
}
