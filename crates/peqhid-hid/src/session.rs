//! PEQ session: the caller-facing operations on one device.

use peqhid_core::packet::{self, Direction};
use peqhid_core::profile::SLOT_INVALID;
use peqhid_core::{CommandId, DeviceProfile, DeviceRegistry, Filter};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::config::SessionConfig;
use crate::correlator::{Completion, ResponseCorrelator};
use crate::error::HidResult;
use crate::transport::{InboundReports, Transport};

/// Slot query sentinel: the device never answered.
pub const SLOT_NO_ANSWER: i32 = -99;

/// EQ state read from a device.
#[derive(Debug, Clone, Serialize)]
pub struct PullResult {
    /// Filters in index order
    pub filters: Vec<Filter>,
    /// Global gain in dB, if reported
    pub global_gain_db: Option<f64>,
    /// Current preset (`-1` if out of range), if reported
    pub current_slot: Option<i32>,
    /// Profile the result was interpreted against
    pub profile: DeviceProfile,
    /// The wait timed out; some fields may be missing
    pub partial: bool,
}

/// An open PEQ session on one device.
///
/// Operations on the same session are serialized: each holds the inbound
/// queue for its whole duration, so only one exchange is ever active.
pub struct PeqSession<T: Transport> {
    transport: T,
    profile: DeviceProfile,
    config: SessionConfig,
    inbound: Mutex<InboundReports>,
}

impl<T: Transport> PeqSession<T> {
    /// Open the transport and resolve the device profile.
    ///
    /// Unknown models fall back to the registry's default profile.
    ///
    /// # Errors
    /// Returns an error if the transport cannot be opened.
    pub fn connect(
        mut transport: T,
        inbound: InboundReports,
        registry: &DeviceRegistry,
        config: SessionConfig,
    ) -> HidResult<Self> {
        if !transport.is_open() {
            transport.open()?;
        }

        let model = transport.product_name();
        if !registry.is_known(model) {
            info!(model, "Unknown model, using default profile");
        }
        let profile = registry.lookup(model).clone();

        info!(
            model,
            max_filters = profile.max_filters,
            disconnect_on_save = profile.disconnect_on_save,
            "PEQ device connected"
        );

        Ok(Self { transport, profile, config, inbound: Mutex::new(inbound) })
    }

    /// Profile of the connected device.
    #[must_use]
    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    /// The underlying transport.
    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn send(&self, direction: Direction, command: CommandId, payload: &[u8]) -> HidResult<()> {
        let frame = match direction {
            Direction::Set => packet::encode_set(command, payload)?,
            Direction::Get => packet::encode_get(command, payload)?,
        };
        trace!(?direction, ?command, frame = ?frame, "Sending report");
        self.transport.send_report(self.transport.output_report_id(), &frame)
    }

    /// Read filters, global gain and current preset.
    ///
    /// Requests the preset, filter count and global gain, then one
    /// filter-params request per index once the count is known. The pull is
    /// complete once every filter has arrived; a missing gain or preset
    /// reply stays `None`. A timed-out wait still resolves, with whatever
    /// arrived and `partial` set.
    ///
    /// # Errors
    /// Returns an error if a request cannot be sent.
    pub async fn pull_from_device(&self) -> HidResult<PullResult> {
        let mut inbound = self.inbound.lock().await;
        let mut correlator = ResponseCorrelator::new(&mut *inbound, self.config.poll_interval());
        let deadline = Instant::now() + self.config.timeout();

        let mut exchange = correlator.begin_exchange(
            [CommandId::PresetSwitch, CommandId::FilterCount, CommandId::GlobalGain],
            Completion::FiltersCollected,
            &self.profile,
            &self.config,
        );

        self.send(Direction::Get, CommandId::PresetSwitch, &[])?;
        self.send(Direction::Get, CommandId::FilterCount, &[])?;
        self.send(Direction::Get, CommandId::GlobalGain, &[])?;

        let count_known = correlator
            .wait_until(&mut exchange, deadline, |e| e.accumulator().filter_count.is_some())
            .await;

        if count_known {
            let count = exchange.accumulator().filter_count.unwrap_or_default();
            debug!(count, "Requesting filter parameters");
            for index in 0..count {
                self.send(Direction::Get, CommandId::FilterParams, &[index])?;
            }
        } else {
            warn!("Filter count not reported before timeout");
        }

        let outcome = correlator.await_exchange(exchange, deadline).await;
        let acc = outcome.accumulator;
        let result = PullResult {
            filters: acc.filters_in_order(),
            global_gain_db: acc.global_gain_db,
            current_slot: acc.current_slot,
            profile: self.profile.clone(),
            partial: !outcome.completed,
        };

        if result.partial {
            warn!(
                filters = result.filters.len(),
                expected = ?acc.filter_count,
                "Pull returned a partial result"
            );
        } else {
            info!(filters = result.filters.len(), "PEQ pulled from device");
        }
        Ok(result)
    }

    /// Write a filter set and save it to `slot`.
    ///
    /// The device gain is `max_gain_db - preamp_gain_db`; the firmware clips
    /// anything out of range. At most `max_filters` filters are written, in
    /// list order. Returns whether the device is expected to disconnect.
    ///
    /// # Errors
    /// Returns an error if a report cannot be sent.
    pub async fn push_to_device(&self, slot: u8, preamp_gain_db: f64, filters: &[Filter]) -> HidResult<bool> {
        let _guard = self.inbound.lock().await;

        let device_gain = self.profile.max_gain_db - preamp_gain_db;
        self.send(Direction::Set, CommandId::GlobalGain, &self.config.global_gain.encode(device_gain))?;

        let count = u8::try_from(filters.len()).unwrap_or(u8::MAX).min(self.profile.max_filters);
        if usize::from(count) < filters.len() {
            warn!(given = filters.len(), max_filters = self.profile.max_filters, "Dropping filters beyond device limit");
        }
        self.send(Direction::Set, CommandId::FilterCount, &[count])?;

        for (index, filter) in (0..count).zip(filters) {
            let filter = Filter { index, ..filter.clone() };
            self.send(Direction::Set, CommandId::FilterParams, &filter.to_payload(self.config.filter_byte_order))?;
        }

        if !self.profile.is_writable_slot(slot) {
            warn!(slot, model = %self.profile.model, "Saving to a slot not listed as writable");
        }
        self.send(Direction::Set, CommandId::SaveToDevice, &[slot])?;

        info!(slot, filters = count, device_gain_db = device_gain, "PEQ pushed to device");
        Ok(self.profile.disconnect_on_save)
    }

    /// Switch PEQ on at `slot_id`, or off.
    ///
    /// Off is the preset id `max_filters`, which the firmware treats as bypass.
    ///
    /// # Errors
    /// Returns an error if the report cannot be sent.
    pub async fn enable_peq(&self, enable: bool, slot_id: u8) -> HidResult<()> {
        let _guard = self.inbound.lock().await;

        let preset = if enable { slot_id } else { self.profile.bypass_slot() };
        self.send(Direction::Set, CommandId::PresetSwitch, &[preset])?;

        info!(enable, preset, "PEQ preset switched");
        Ok(())
    }

    /// Read the current preset.
    ///
    /// Returns the slot id, `-1` if the device reports a preset outside the
    /// profile's range, or [`SLOT_NO_ANSWER`] if nothing arrived in time.
    ///
    /// # Errors
    /// Returns an error if the request cannot be sent.
    pub async fn current_slot(&self) -> HidResult<i32> {
        let mut inbound = self.inbound.lock().await;
        let mut correlator = ResponseCorrelator::new(&mut *inbound, self.config.poll_interval());
        let deadline = Instant::now() + self.config.timeout();

        let exchange = correlator.begin_exchange(
            [CommandId::PresetSwitch],
            Completion::SlotObserved,
            &self.profile,
            &self.config,
        );
        self.send(Direction::Get, CommandId::PresetSwitch, &[])?;

        let outcome = correlator.await_exchange(exchange, deadline).await;
        let slot = match outcome.accumulator.current_slot {
            Some(slot) if outcome.completed => slot,
            _ => SLOT_NO_ANSWER,
        };
        if slot == SLOT_INVALID {
            debug!("Device reports a preset outside the known slots");
        }
        Ok(slot)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use assert_matches::assert_matches;
    use parking_lot::Mutex as SyncMutex;
    use peqhid_core::packet::{Frame, decode, encode_get};
    use peqhid_core::{ByteOrder, FilterType};
    use tokio::sync::mpsc;

    use super::*;
    use crate::error::HidError;
    use crate::transport::inbound_channel;

    type Responder = Box<dyn Fn(&Frame) -> Vec<Vec<u8>> + Send + Sync>;

    /// In-memory device: records outbound frames and answers them through
    /// the inbound channel.
    struct ScriptedTransport {
        model: String,
        open: bool,
        fail_sends: bool,
        sent: Arc<SyncMutex<Vec<Frame>>>,
        replies: mpsc::Sender<Vec<u8>>,
        responder: Responder,
    }

    impl Transport for ScriptedTransport {
        fn open(&mut self) -> HidResult<()> {
            self.open = true;
            Ok(())
        }

        fn is_open(&self) -> bool {
            self.open
        }

        fn product_name(&self) -> &str {
            &self.model
        }

        fn output_report_id(&self) -> u8 {
            7
        }

        fn send_report(&self, report_id: u8, data: &[u8]) -> HidResult<()> {
            assert_eq!(report_id, 7);
            if self.fail_sends {
                return Err(HidError::Transport("write failed".to_string()));
            }
            let frame = decode(data).unwrap();
            for reply in (self.responder)(&frame) {
                let _ = self.replies.try_send(reply);
            }
            self.sent.lock().push(frame);
            Ok(())
        }
    }

    struct Harness {
        session: PeqSession<ScriptedTransport>,
        sent: Arc<SyncMutex<Vec<Frame>>>,
    }

    impl Harness {
        fn new(model: &str, responder: Responder) -> Self {
            let (replies, inbound) = inbound_channel();
            let sent = Arc::new(SyncMutex::new(Vec::new()));
            let transport = ScriptedTransport {
                model: model.to_string(),
                open: false,
                fail_sends: false,
                sent: Arc::clone(&sent),
                replies,
                responder,
            };
            let session =
                PeqSession::connect(transport, inbound, &DeviceRegistry::builtin(), SessionConfig::default())
                    .unwrap();
            Self { session, sent }
        }

        fn sent(&self, direction: Direction, command: CommandId) -> Vec<Frame> {
            self.sent
                .lock()
                .iter()
                .filter(|f| f.direction == direction && f.command() == Some(command))
                .cloned()
                .collect()
        }
    }

    fn reply(command: CommandId, payload: &[u8]) -> Vec<u8> {
        let mut report = encode_get(command, payload).unwrap();
        report.resize(64, 0);
        report
    }

    fn device_filter(index: u8) -> Filter {
        Filter::new(index, FilterType::Peak, 100 * (u16::from(index) + 1), -1.5, 1.41)
    }

    /// A device with `count` filters that answers params only for `answered`.
    fn device(count: u8, answered: &'static [u8], preset: u8) -> Responder {
        Box::new(move |frame: &Frame| {
            if frame.direction != Direction::Get {
                return Vec::new();
            }
            match frame.command() {
                Some(CommandId::PresetSwitch) => vec![reply(CommandId::PresetSwitch, &[preset])],
                Some(CommandId::FilterCount) => vec![reply(CommandId::FilterCount, &[count])],
                Some(CommandId::GlobalGain) => vec![reply(CommandId::GlobalGain, &[0xFF, 0xE2])],
                Some(CommandId::FilterParams) => {
                    let index = frame.payload[0];
                    if answered.contains(&index) {
                        let payload = device_filter(index).to_payload(ByteOrder::BigEndian);
                        vec![reply(CommandId::FilterParams, &payload)]
                    } else {
                        Vec::new()
                    }
                }
                _ => Vec::new(),
            }
        })
    }

    fn silent() -> Responder {
        Box::new(|_: &Frame| Vec::new())
    }

    fn filters(n: u16) -> Vec<Filter> {
        (0..n).map(|i| Filter::new(0, FilterType::HighShelfQ, 1000 + i, 2.0, 0.7)).collect()
    }

    #[test]
    fn test_connect_opens_and_resolves_profile() {
        let harness = Harness::new("FIIO KA17", silent());

        assert!(harness.session.transport().is_open());
        assert_eq!(harness.session.profile().max_filters, 10);
    }

    #[test]
    fn test_connect_unknown_model_uses_default() {
        let harness = Harness::new("Mystery DAC", silent());
        assert_eq!(harness.session.profile().model, "default");
        assert_eq!(harness.session.profile().max_filters, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pull_complete() {
        let harness = Harness::new("FIIO KA17", device(3, &[0, 1, 2], 8));

        let result = harness.session.pull_from_device().await.unwrap();

        assert!(!result.partial);
        assert_eq!(result.filters, vec![device_filter(0), device_filter(1), device_filter(2)]);
        assert_eq!(result.global_gain_db, Some(-3.0));
        assert_eq!(result.current_slot, Some(8));
        assert_eq!(result.profile.model, "FIIO KA17");

        let requests = harness.sent(Direction::Get, CommandId::FilterParams);
        let indices: Vec<u8> = requests.iter().map(|f| f.payload[0]).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pull_partial_on_timeout() {
        let harness = Harness::new("FIIO KA17", device(3, &[0, 2], 1));

        let started = Instant::now();
        let result = harness.session.pull_from_device().await.unwrap();

        assert!(result.partial);
        assert_eq!(result.filters.len(), 2);
        assert_eq!(result.filters[1].index, 2);
        assert!(started.elapsed() >= Duration::from_millis(10_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pull_completes_when_gain_never_answers() {
        let answers = device(2, &[0, 1], 8);
        let harness = Harness::new(
            "FIIO KA17",
            Box::new(move |frame: &Frame| {
                if frame.command() == Some(CommandId::GlobalGain) {
                    return Vec::new();
                }
                answers(frame)
            }),
        );

        let started = Instant::now();
        let result = harness.session.pull_from_device().await.unwrap();

        assert!(!result.partial);
        assert_eq!(result.filters, vec![device_filter(0), device_filter(1)]);
        assert_eq!(result.global_gain_db, None);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pull_without_count_sends_no_param_requests() {
        let harness = Harness::new("FIIO KA17", silent());

        let result = harness.session.pull_from_device().await.unwrap();

        assert!(result.partial);
        assert!(result.filters.is_empty());
        assert_eq!(result.global_gain_db, None);
        assert!(harness.sent(Direction::Get, CommandId::FilterParams).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pull_with_zero_filters_completes() {
        let harness = Harness::new("JadeAudio JA11", device(0, &[], 0));

        let result = harness.session.pull_from_device().await.unwrap();

        assert!(!result.partial);
        assert!(result.filters.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_clamps_to_max_filters() {
        let harness = Harness::new("FIIO KA17", silent());

        let disconnect = harness.session.push_to_device(2, 3.0, &filters(15)).await.unwrap();

        assert!(!disconnect);

        let gain = harness.sent(Direction::Set, CommandId::GlobalGain);
        assert_eq!(gain.len(), 1);
        // 12 - 3 = 9 dB in tenths
        assert_eq!(gain[0].payload, vec![0x00, 0x5A]);

        let count = harness.sent(Direction::Set, CommandId::FilterCount);
        assert_eq!(count[0].payload, vec![10]);

        let params = harness.sent(Direction::Set, CommandId::FilterParams);
        assert_eq!(params.len(), 10);
        let indices: Vec<u8> = params.iter().map(|f| f.payload[0]).collect();
        assert_eq!(indices, (0..10).collect::<Vec<u8>>());
        assert_eq!(params[9].payload[3..5], [0x03, 0xF1]);

        let save = harness.sent(Direction::Set, CommandId::SaveToDevice);
        assert_eq!(save[0].payload, vec![2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_frame_order_and_disconnect_flag() {
        let harness = Harness::new("JadeAudio JA11", silent());

        let disconnect = harness.session.push_to_device(3, -2.0, &filters(2)).await.unwrap();

        assert!(disconnect);
        let commands: Vec<Option<CommandId>> = harness.sent.lock().iter().map(Frame::command).collect();
        assert_eq!(
            commands,
            vec![
                Some(CommandId::GlobalGain),
                Some(CommandId::FilterCount),
                Some(CommandId::FilterParams),
                Some(CommandId::FilterParams),
                Some(CommandId::SaveToDevice),
            ]
        );
        // 12 + 2 = 14 dB
        assert_eq!(harness.sent(Direction::Set, CommandId::GlobalGain)[0].payload, vec![0x00, 0x8C]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_enable_and_disable() {
        let harness = Harness::new("JadeAudio JA11", silent());

        harness.session.enable_peq(true, 3).await.unwrap();
        harness.session.enable_peq(false, 3).await.unwrap();

        let switches = harness.sent(Direction::Set, CommandId::PresetSwitch);
        assert_eq!(switches[0].payload, vec![3]);
        assert_eq!(switches[1].payload, vec![5]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_current_slot() {
        let harness = Harness::new("JadeAudio JA11", device(0, &[], 2));
        assert_eq!(harness.session.current_slot().await.unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_current_slot_out_of_range_is_invalid() {
        let harness = Harness::new("JadeAudio JA11", device(0, &[], 99));
        assert_eq!(harness.session.current_slot().await.unwrap(), -1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_current_slot_no_answer() {
        let harness = Harness::new("JadeAudio JA11", silent());

        let started = Instant::now();
        assert_eq!(harness.session.current_slot().await.unwrap(), SLOT_NO_ANSWER);
        assert!(started.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_reports_are_skipped() {
        let responder: Responder = Box::new(|frame: &Frame| {
            if frame.command() != Some(CommandId::PresetSwitch) {
                return Vec::new();
            }
            let mut broken = reply(CommandId::PresetSwitch, &[1]);
            broken[8] = 0x00;
            vec![broken, vec![0x12, 0x34], reply(CommandId::PresetSwitch, &[3])]
        });
        let harness = Harness::new("JadeAudio JA11", responder);

        assert_eq!(harness.session.current_slot().await.unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_acks_do_not_leak_into_next_exchange() {
        // Device echoes every set as a get-direction reply
        let responder: Responder = Box::new(|frame: &Frame| match frame.command() {
            Some(CommandId::PresetSwitch) if frame.direction == Direction::Set => {
                vec![reply(CommandId::PresetSwitch, &frame.payload)]
            }
            _ => Vec::new(),
        });
        let harness = Harness::new("JadeAudio JA11", responder);

        harness.session.enable_peq(true, 1).await.unwrap();

        assert_eq!(harness.session.current_slot().await.unwrap(), SLOT_NO_ANSWER);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_error_propagates() {
        let mut harness = Harness::new("FIIO KA17", silent());
        harness.session.transport.fail_sends = true;

        assert_matches!(harness.session.pull_from_device().await, Err(HidError::Transport(_)));
        assert_matches!(harness.session.push_to_device(7, 0.0, &filters(1)).await, Err(HidError::Transport(_)));
        assert!(harness.sent.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_operations_are_serialized() {
        let harness = Arc::new(Harness::new("FIIO KA17", device(2, &[0, 1], 7)));

        let puller = Arc::clone(&harness);
        let pull = tokio::spawn(async move { puller.session.pull_from_device().await.unwrap() });
        tokio::task::yield_now().await;
        let disconnect = harness.session.push_to_device(8, 0.0, &filters(1)).await.unwrap();
        let pulled = pull.await.unwrap();

        assert!(!disconnect);
        assert!(!pulled.partial);

        // One operation's frames never interleave with the other's
        let sent = harness.sent.lock();
        let switches = sent.windows(2).filter(|pair| pair[0].direction != pair[1].direction).count();
        assert_eq!(switches, 1);
    }
}
