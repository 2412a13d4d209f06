//! The polling loop.
//!
//! Each cycle refreshes the document, extracts raw strings, parses and
//! converts them, applies the counter transform and gates the result on its
//! timestamp. [`LoopDriver`] owns all state that survives between cycles:
//! the counter's previous reading and the timestamp watermark.

pub mod assembler;
pub mod clock;
pub mod counter;
pub mod mapper;
pub mod parser;
pub mod units;

#[cfg(test)]
mod tests;

pub use self::assembler::{PacketDraft, Watermark};
pub use self::clock::{Clock, ManualClock, SystemClock};
pub use self::counter::{CounterResetPolicy, CounterState};
pub use self::units::{ConversionTable, UnitConversion};

use crate::config::DriverSettings;
use crate::constants::DRIVER_NAME;
use crate::document::{DocumentSource, XmlDocument};
use crate::models::{CycleOutcome, LoopPacket, TimestampMode};
use futures::Stream;
use futures::stream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Generator of loop packets from a polled document
pub struct LoopDriver<D = XmlDocument, C = SystemClock> {
    settings: DriverSettings,
    document: D,
    clock: C,
    counter: CounterState,
    watermark: Watermark,
    shutdown: CancellationToken,
    cycles: u64,
}

impl LoopDriver<XmlDocument, SystemClock> {
    /// Poll the file named in `settings` on the system clock
    pub fn new(settings: DriverSettings) -> Self {
        let document = XmlDocument::new(settings.path.clone());
        Self::with_parts(settings, document, SystemClock)
    }
}

impl<D: DocumentSource, C: Clock> LoopDriver<D, C> {
    /// Build a driver over any document source and clock
    pub fn with_parts(settings: DriverSettings, document: D, clock: C) -> Self {
        let watermark = Watermark::before(clock.now().timestamp());

        info!("{} driver starting", DRIVER_NAME);
        info!("data file is {}", settings.path.display());
        info!("polling interval is {:?}", settings.poll_interval);
        info!("timestamp mode is {}", settings.timestamp_mode);
        if settings.timestamp_mode == TimestampMode::Document {
            info!("date_time_format is {}", settings.date_time_format);
            info!("time zone is {}", settings.time_zone);
        }
        if settings.counter.to_delta {
            info!(
                "'{}' is a cumulative counter, decrease policy {}",
                settings.counter.field, settings.counter.reset_policy
            );
        }
        info!("sensor map is {}", settings.sensor_map);

        Self {
            settings,
            document,
            clock,
            counter: CounterState::new(),
            watermark,
            shutdown: CancellationToken::new(),
            cycles: 0,
        }
    }

    /// Stop when `token` is cancelled instead of the driver's own token
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Token that stops [`LoopDriver::next_packet`] when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn settings(&self) -> &DriverSettings {
        &self.settings
    }

    pub fn document(&self) -> &D {
        &self.document
    }

    pub fn counter_state(&self) -> CounterState {
        self.counter
    }

    /// Timestamp of the last emitted packet
    pub fn watermark(&self) -> i64 {
        self.watermark.value()
    }

    /// Number of cycles run so far
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Run one cycle immediately, without sleeping
    pub fn run_cycle(&mut self) -> CycleOutcome {
        let cycle_start = self.clock.now().timestamp();
        self.cycles += 1;

        self.document.refresh();

        let settings = &self.settings;
        let raw = mapper::extract(
            &self.document,
            &settings.sensor_map,
            settings.timestamp_mode,
            &settings.time_zone,
        );
        let parsed = parser::parse(&raw, settings.timestamp_mode, &settings.date_time_format);
        let converted = settings.conversions.convert(&parsed, &settings.sensor_map);
        let (draft, counter) = assembler::assemble(
            converted,
            settings.timestamp_mode,
            cycle_start,
            &settings.counter,
            self.counter,
        );
        self.counter = counter;

        let candidate = draft.date_time;
        match candidate {
            Some(date_time) if self.watermark.admits(candidate) => {
                self.watermark.advance(date_time);
                let packet = draft.into_packet(date_time);
                debug!("emitting packet {:?}", packet);
                CycleOutcome::Emitted(packet)
            }
            candidate => {
                debug!(
                    "ignoring packet: timestamp {:?} not after {}",
                    candidate,
                    self.watermark.value()
                );
                CycleOutcome::Suppressed {
                    candidate,
                    watermark: self.watermark.value(),
                }
            }
        }
    }

    /// Wait for the next accepted packet.
    ///
    /// The first call polls immediately; later calls sleep for the poll
    /// interval before each cycle. Returns `None` once shut down.
    pub async fn next_packet(&mut self) -> Option<LoopPacket> {
        loop {
            if self.shutdown.is_cancelled() {
                return None;
            }
            if self.cycles > 0 {
                tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => return None,
                    _ = self.clock.sleep(self.settings.poll_interval) => {}
                }
            }
            if let CycleOutcome::Emitted(packet) = self.run_cycle() {
                return Some(packet);
            }
        }
    }

    /// Endless stream of packets, ending at shutdown
    pub fn into_stream(self) -> impl Stream<Item = LoopPacket> {
        stream::unfold(self, |mut driver| async move {
            let packet = driver.next_packet().await?;
            Some((packet, driver))
        })
    }
}
