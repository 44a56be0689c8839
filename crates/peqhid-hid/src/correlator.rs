//! Request/response correlation.
//!
//! The device answers requests with unsolicited input reports that carry no
//! sequence numbers, and a single logical read (all filters, say) spans many
//! reports. An [`Exchange`] collects decoded fields from those reports into an
//! [`Accumulator`]; the [`ResponseCorrelator`] drains the inbound queue into
//! the exchange until its completion predicate holds or the deadline passes.
//!
//! The correlator borrows the inbound queue mutably, so at most one exchange
//! can be in flight per device.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use peqhid_core::packet::{self, Direction};
use peqhid_core::{ByteOrder, CommandId, DeviceProfile, Filter, GainCodec};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};

use crate::config::SessionConfig;
use crate::transport::InboundReports;

/// Condition that resolves an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Filter count known and every filter up to it collected
    FiltersCollected,
    /// A preset id has been observed
    SlotObserved,
}

/// Fields collected from device replies.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Accumulator {
    /// Number of filters to collect (device count clamped to the profile)
    pub filter_count: Option<u8>,
    /// Filter count as reported by the device
    pub reported_filter_count: Option<u8>,
    /// Global gain in dB
    pub global_gain_db: Option<f64>,
    /// Normalized current preset (`-1` for out of range)
    pub current_slot: Option<i32>,
    /// Filters keyed by band index
    pub filters: BTreeMap<u8, Filter>,
}

impl Accumulator {
    /// Whether every expected filter has arrived.
    #[must_use]
    pub fn filters_complete(&self) -> bool {
        self.filter_count.is_some_and(|count| self.filters.len() == usize::from(count))
    }

    /// Collected filters in index order.
    #[must_use]
    pub fn filters_in_order(&self) -> Vec<Filter> {
        self.filters.values().cloned().collect()
    }
}

/// Result of awaiting an exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    /// Everything accumulated, complete or not
    pub accumulator: Accumulator,
    /// Whether the completion predicate held before the deadline
    pub completed: bool,
}

/// Working state of one logical operation.
#[derive(Debug)]
pub struct Exchange {
    expected: BTreeSet<CommandId>,
    observed: BTreeSet<CommandId>,
    completion: Completion,
    accumulator: Accumulator,
    profile: DeviceProfile,
    global_gain: GainCodec,
    byte_order: ByteOrder,
}

impl Exchange {
    /// Create an exchange waiting for `expected` replies.
    #[must_use]
    pub fn new(
        expected: impl IntoIterator<Item = CommandId>,
        completion: Completion,
        profile: &DeviceProfile,
        config: &SessionConfig,
    ) -> Self {
        Self {
            expected: expected.into_iter().collect(),
            observed: BTreeSet::new(),
            completion,
            accumulator: Accumulator::default(),
            profile: profile.clone(),
            global_gain: config.global_gain,
            byte_order: config.filter_byte_order,
        }
    }

    /// Fields collected so far.
    #[must_use]
    pub fn accumulator(&self) -> &Accumulator {
        &self.accumulator
    }

    /// Whether a reply for `command` has been applied.
    #[must_use]
    pub fn has_observed(&self, command: CommandId) -> bool {
        self.observed.contains(&command)
    }

    /// Expected replies that have not arrived yet.
    #[must_use]
    pub fn missing(&self) -> Vec<CommandId> {
        self.expected.difference(&self.observed).copied().collect()
    }

    /// Whether the completion predicate holds.
    ///
    /// Only the predicate decides; expected replies that never arrive are
    /// left as `None` in the accumulator.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        match self.completion {
            Completion::FiltersCollected => self.accumulator.filters_complete(),
            Completion::SlotObserved => self.accumulator.current_slot.is_some(),
        }
    }

    /// Decode a raw inbound report and apply it.
    ///
    /// Malformed reports are dropped without touching the accumulator. Only
    /// get-direction frames carry device state.
    pub fn feed(&mut self, raw: &[u8]) {
        match packet::decode(raw) {
            Ok(frame) if frame.direction == Direction::Get => {
                self.on_report(frame.command_id, &frame.payload);
            }
            Ok(frame) => trace!(command_id = frame.command_id, "Ignoring set-direction report"),
            Err(e) => debug!(error = %e, len = raw.len(), "Dropping malformed report"),
        }
    }

    /// Apply one decoded reply. Never blocks, never fails.
    pub fn on_report(&mut self, command_id: u8, payload: &[u8]) {
        let Some(command) = CommandId::from_wire(command_id) else {
            debug!(command_id, "Ignoring unknown command");
            return;
        };

        let applied = match command {
            CommandId::FilterCount => payload.first().map(|&count| self.apply_filter_count(count)),
            CommandId::FilterParams => {
                Filter::from_payload(payload, self.byte_order).map(|filter| self.apply_filter(filter))
            }
            CommandId::GlobalGain => payload.first_chunk::<2>().map(|bytes| {
                let gain = self.global_gain.decode(*bytes);
                debug!(gain_db = gain, "Global gain");
                self.accumulator.global_gain_db = Some(gain);
            }),
            CommandId::PresetSwitch => payload.first().map(|&preset| {
                let slot = self.profile.normalize_slot(preset);
                debug!(preset, slot, "Current preset");
                self.accumulator.current_slot = Some(slot);
            }),
            CommandId::SaveToDevice
            | CommandId::ResetDevice
            | CommandId::ResetAll
            | CommandId::FirmwareVersion
            | CommandId::NameDevice => {
                debug!(?command, "Ignoring reply");
                return;
            }
        };

        if applied.is_some() {
            self.observed.insert(command);
        } else {
            warn!(?command, len = payload.len(), "Reply payload too short");
        }
    }

    fn apply_filter_count(&mut self, reported: u8) {
        let count = reported.min(self.profile.max_filters);
        if count < reported {
            warn!(reported, max_filters = self.profile.max_filters, "Device reports more filters than supported");
        }
        debug!(count, "Filter count");

        self.accumulator.reported_filter_count = Some(reported);
        self.accumulator.filter_count = Some(count);
        self.accumulator.filters.retain(|&index, _| index < count);
    }

    fn apply_filter(&mut self, filter: Filter) {
        let limit = self.accumulator.filter_count.unwrap_or(self.profile.max_filters);
        if filter.index >= limit {
            warn!(index = filter.index, limit, "Filter index out of range");
            return;
        }
        debug!(
            index = filter.index,
            gain_db = filter.gain_db,
            frequency_hz = filter.frequency_hz,
            q = filter.q,
            filter_type = ?filter.filter_type,
            "Filter"
        );
        self.accumulator.filters.insert(filter.index, filter);
    }

    /// Finish the exchange.
    #[must_use]
    pub fn into_outcome(self, completed: bool) -> Outcome {
        Outcome { accumulator: self.accumulator, completed }
    }
}

/// Drains inbound reports into an exchange with a bounded wait.
pub struct ResponseCorrelator<'a> {
    inbound: &'a mut InboundReports,
    poll_interval: Duration,
}

impl<'a> ResponseCorrelator<'a> {
    /// Create a correlator over a device's inbound queue.
    #[must_use]
    pub fn new(inbound: &'a mut InboundReports, poll_interval: Duration) -> Self {
        Self { inbound, poll_interval: poll_interval.max(Duration::from_millis(1)) }
    }

    /// Start an exchange.
    ///
    /// Reports still queued from earlier fire-and-forget requests are
    /// discarded first so they cannot leak into the new accumulator.
    pub fn begin_exchange(
        &mut self,
        expected: impl IntoIterator<Item = CommandId>,
        completion: Completion,
        profile: &DeviceProfile,
        config: &SessionConfig,
    ) -> Exchange {
        let mut stale = 0usize;
        while let Ok(raw) = self.inbound.try_recv() {
            trace!(len = raw.len(), "Discarding stale report");
            stale += 1;
        }
        if stale > 0 {
            debug!(stale, "Drained stale reports before exchange");
        }

        Exchange::new(expected, completion, profile, config)
    }

    /// Feed reports into `exchange` until `done` holds or `deadline` passes.
    ///
    /// `done` is checked on every poll tick. Returns whether it held. If the
    /// inbound stream closes the wait ends immediately.
    pub async fn wait_until<F>(&mut self, exchange: &mut Exchange, deadline: Instant, mut done: F) -> bool
    where
        F: FnMut(&Exchange) -> bool,
    {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let timeout = tokio::time::sleep_until(deadline);
        tokio::pin!(timeout);

        loop {
            tokio::select! {
                report = self.inbound.recv() => {
                    let Some(raw) = report else {
                        warn!("Inbound report stream closed");
                        return done(&*exchange);
                    };
                    exchange.feed(&raw);
                }
                _ = ticker.tick() => {
                    if done(&*exchange) {
                        return true;
                    }
                }
                () = &mut timeout => {
                    return done(&*exchange);
                }
            }
        }
    }

    /// Await the exchange's own completion predicate.
    ///
    /// Resolves with everything accumulated; `completed` is false if the
    /// deadline passed first and the result is partial.
    pub async fn await_exchange(&mut self, mut exchange: Exchange, deadline: Instant) -> Outcome {
        let started = Instant::now();
        let completed = self.wait_until(&mut exchange, deadline, Exchange::is_complete).await;
        let elapsed_ms = started.elapsed().as_millis();
        let missing = exchange.missing();
        if completed {
            debug!(elapsed_ms, ?missing, "Exchange complete");
        } else {
            warn!(elapsed_ms, ?missing, "Exchange timed out before completion");
        }
        exchange.into_outcome(completed)
    }
}
