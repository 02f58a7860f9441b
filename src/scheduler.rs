//! Activation scheduler.
//!
//! Once per tick the scheduler decides whether the install is still inside
//! its grace period, whether a verification is due, and which state to
//! report:
//!
//! - **Dormant**: the key artifact is younger than the grace period. Nothing
//!   is checked and nothing is logged.
//! - **Checking**: past the grace period but no verdict yet (first check
//!   still pending, e.g. because hardware enumeration failed).
//! - **Settled**: a verdict is known and one record is logged for the tick.
//!
//! While activated, the server is asked again only every
//! `poll_interval_ticks`. While not activated it is asked every tick, so a
//! newly entered key is picked up within the hour.

use std::time::{Duration, SystemTime};

use tracing::{debug, info, warn};

use crate::channel::Channel;
use crate::config::DaemonConfig;
use crate::errors::ActivationResult;
use crate::events::{ActivationEvent, EventSink};
use crate::hardware::{fingerprint_from, HardwareSource};
use crate::key_store::KeyStore;
use crate::verification::{ActivationState, Verifier};

/// Where the scheduler stands after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Dormant,
    Checking,
    Settled(ActivationState),
}

/// Timing and channel settings for the scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub channel: Channel,
    pub grace_period: Duration,
    pub poll_interval_ticks: u64,
    pub tick_interval: Duration,
    pub documentation_url: String,
}

impl SchedulerSettings {
    pub fn from_config(config: &DaemonConfig) -> ActivationResult<Self> {
        Ok(Self {
            channel: config.channel()?,
            grace_period: config.grace_period(),
            poll_interval_ticks: config.activation.poll_interval_ticks,
            tick_interval: config.tick_interval(),
            documentation_url: config.activation.documentation_url.clone(),
        })
    }
}

/// Drives verification for the lifetime of the process.
pub struct Scheduler<H, V, S> {
    settings: SchedulerSettings,
    key_store: KeyStore,
    hardware: H,
    verifier: V,
    sink: S,
    state: SchedulerState,
    last_result: Option<ActivationState>,
    ticks_since_check: u64,
}

impl<H, V, S> Scheduler<H, V, S>
where
    H: HardwareSource,
    V: Verifier,
    S: EventSink,
{
    pub fn new(
        settings: SchedulerSettings,
        key_store: KeyStore,
        hardware: H,
        verifier: V,
        sink: S,
    ) -> Self {
        Self {
            settings,
            key_store,
            hardware,
            verifier,
            sink,
            state: SchedulerState::Dormant,
            last_result: None,
            ticks_since_check: 0,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn last_result(&self) -> Option<ActivationState> {
        self.last_result
    }

    /// Tick forever, sleeping one tick interval between rounds.
    pub async fn run(&mut self) {
        info!(
            channel = %self.settings.channel,
            grace_period_days = self.settings.grace_period.as_secs() / 86_400,
            poll_interval_ticks = self.settings.poll_interval_ticks,
            "Activation scheduler started"
        );

        loop {
            self.tick().await;
            tokio::time::sleep(self.settings.tick_interval).await;
        }
    }

    /// Run one tick against the current wall clock.
    pub async fn tick(&mut self) -> SchedulerState {
        self.tick_at(SystemTime::now()).await
    }

    /// Run one tick as if the wall clock read `now`.
    pub async fn tick_at(&mut self, now: SystemTime) -> SchedulerState {
        let age = self.key_store.marker_age_at(now).await;
        if age < self.settings.grace_period {
            debug!(
                remaining_secs = (self.settings.grace_period - age).as_secs(),
                "Inside grace period"
            );
            self.state = SchedulerState::Dormant;
            return self.state;
        }

        if self.state == SchedulerState::Dormant {
            info!("Grace period over, activation checks enabled");
        }
        self.state = SchedulerState::Checking;

        if self.last_result.is_some() {
            self.ticks_since_check = self.ticks_since_check.saturating_add(1);
        }

        if self.check_due() {
            if let Some(result) = self.check().await {
                self.last_result = Some(result);
                self.ticks_since_check = 0;
            }
        } else {
            debug!(
                ticks_since_check = self.ticks_since_check,
                "Reusing previous verdict"
            );
        }

        // The record for this tick is only written once the verdict is final.
        if let Some(result) = self.last_result {
            self.state = SchedulerState::Settled(result);
            self.sink.record(&ActivationEvent::new(
                result,
                self.settings.documentation_url.as_str(),
            ));
        }

        self.state
    }

    fn check_due(&self) -> bool {
        match self.last_result {
            None | Some(ActivationState::NotActivated) => true,
            Some(ActivationState::Activated) => {
                self.ticks_since_check >= self.settings.poll_interval_ticks
            }
        }
    }

    /// One verification round. `None` when the hardware could not be read.
    async fn check(&self) -> Option<ActivationState> {
        let fingerprint = match fingerprint_from(&self.hardware) {
            Ok(fingerprint) => fingerprint,
            Err(e) => {
                warn!("Hardware query failed ({e}), retrying next tick");
                return None;
            }
        };

        let key = self.key_store.read_key().await;
        let result = self
            .verifier
            .verify(&fingerprint, &key, self.settings.channel)
            .await;

        info!(state = %result, channel = %self.settings.channel, "Activation check completed");
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::HardwareQueryError;
    use crate::hardware::tests::StaticHardware;
    use crate::hardware::Fingerprint;
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;
    use tempfile::TempDir;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);
    const HOUR: Duration = Duration::from_secs(60 * 60);

    #[derive(Default)]
    struct ScriptedVerifier {
        answers: RefCell<VecDeque<ActivationState>>,
        calls: Cell<usize>,
        seen: RefCell<Vec<(String, String, Channel)>>,
    }

    impl ScriptedVerifier {
        fn answering(answers: &[ActivationState]) -> Self {
            Self {
                answers: RefCell::new(answers.iter().copied().collect()),
                ..Default::default()
            }
        }
    }

    impl Verifier for &ScriptedVerifier {
        async fn verify(
            &self,
            fingerprint: &Fingerprint,
            key: &str,
            channel: Channel,
        ) -> ActivationState {
            self.calls.set(self.calls.get() + 1);
            self.seen
                .borrow_mut()
                .push((fingerprint.to_string(), key.to_string(), channel));
            self.answers
                .borrow_mut()
                .pop_front()
                .unwrap_or(ActivationState::Activated)
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        events: RefCell<Vec<ActivationEvent>>,
    }

    impl EventSink for RecordingSink {
        fn record(&self, event: &ActivationEvent) {
            self.events.borrow_mut().push(event.clone());
        }
    }

    struct BrokenHardware;

    impl HardwareSource for BrokenHardware {
        fn mac_addresses(&self) -> Result<Vec<String>, HardwareQueryError> {
            Err(HardwareQueryError::Unsupported)
        }

        fn cpu_descriptors(&self) -> Result<Vec<String>, HardwareQueryError> {
            Err(HardwareQueryError::Unsupported)
        }
    }

    /// Hardware that can be made to fail between ticks.
    #[derive(Default)]
    struct SwitchableHardware {
        failing: Cell<bool>,
    }

    impl HardwareSource for &SwitchableHardware {
        fn mac_addresses(&self) -> Result<Vec<String>, HardwareQueryError> {
            if self.failing.get() {
                return Err(HardwareQueryError::Empty);
            }
            Ok(vec!["52:54:00:12:34:56".to_string()])
        }

        fn cpu_descriptors(&self) -> Result<Vec<String>, HardwareQueryError> {
            Ok(vec!["vendor_id\t: GenuineIntel".to_string()])
        }
    }

    fn settings(channel: Channel) -> SchedulerSettings {
        SchedulerSettings {
            channel,
            grace_period: 30 * DAY,
            poll_interval_ticks: 336,
            tick_interval: HOUR,
            documentation_url: "https://docs.example/activation".to_string(),
        }
    }

    fn hardware() -> StaticHardware {
        StaticHardware::new(&["52:54:00:12:34:56"], &["vendor_id\t: GenuineIntel"])
    }

    /// Key store whose marker was written at the returned instant.
    fn installed_store(dir: &TempDir, key: &str) -> (KeyStore, SystemTime) {
        let store = KeyStore::new(dir.path(), "product.key");
        std::fs::write(store.artifact_path(), key).unwrap();
        let secs = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap()
            .as_secs();
        let installed = SystemTime::UNIX_EPOCH + Duration::from_secs(secs) - 60 * DAY;
        std::fs::File::options()
            .write(true)
            .open(store.artifact_path())
            .unwrap()
            .set_modified(installed)
            .unwrap();
        (store, installed)
    }

    #[tokio::test]
    async fn stays_dormant_inside_grace_period() {
        let dir = TempDir::new().unwrap();
        let (store, installed) = installed_store(&dir, "");
        let verifier = ScriptedVerifier::default();
        let sink = RecordingSink::default();
        let mut scheduler =
            Scheduler::new(settings(Channel::Oem), store, hardware(), &verifier, &sink);

        let state = scheduler.tick_at(installed + 29 * DAY).await;

        assert_eq!(state, SchedulerState::Dormant);
        assert_eq!(verifier.calls.get(), 0);
        assert!(sink.events.borrow().is_empty());
    }

    #[tokio::test]
    async fn leaves_dormant_after_grace_period() {
        let dir = TempDir::new().unwrap();
        let (store, installed) = installed_store(&dir, "");
        let verifier = ScriptedVerifier::default();
        let sink = RecordingSink::default();
        let mut scheduler =
            Scheduler::new(settings(Channel::Oem), store, hardware(), &verifier, &sink);

        let state = scheduler.tick_at(installed + 31 * DAY).await;

        assert_eq!(state, SchedulerState::Settled(ActivationState::Activated));
        assert_eq!(verifier.calls.get(), 1);
        assert_eq!(
            *sink.events.borrow(),
            vec![ActivationEvent::new(
                ActivationState::Activated,
                "https://docs.example/activation"
            )]
        );
    }

    #[tokio::test]
    async fn activated_state_is_reused_until_poll_interval() {
        let dir = TempDir::new().unwrap();
        let (store, installed) = installed_store(&dir, "");
        let verifier = ScriptedVerifier::default();
        let sink = RecordingSink::default();
        let mut scheduler =
            Scheduler::new(settings(Channel::Oem), store, hardware(), &verifier, &sink);

        let start = installed + 31 * DAY;
        for hour in 0..336u32 {
            scheduler.tick_at(start + hour * HOUR).await;
        }
        assert_eq!(verifier.calls.get(), 1);

        scheduler.tick_at(start + 336 * HOUR).await;
        assert_eq!(verifier.calls.get(), 2);

        // One record per settled tick, checked or not.
        assert_eq!(sink.events.borrow().len(), 337);
    }

    #[tokio::test]
    async fn not_activated_is_rechecked_every_tick() {
        let dir = TempDir::new().unwrap();
        let (store, installed) = installed_store(&dir, "");
        let verifier = ScriptedVerifier::answering(&[
            ActivationState::NotActivated,
            ActivationState::NotActivated,
            ActivationState::Activated,
        ]);
        let sink = RecordingSink::default();
        let mut scheduler =
            Scheduler::new(settings(Channel::Retail), store, hardware(), &verifier, &sink);

        let start = installed + 31 * DAY;
        let states = [
            scheduler.tick_at(start).await,
            scheduler.tick_at(start + HOUR).await,
            scheduler.tick_at(start + 2 * HOUR).await,
            scheduler.tick_at(start + 3 * HOUR).await,
        ];

        assert_eq!(
            states,
            [
                SchedulerState::Settled(ActivationState::NotActivated),
                SchedulerState::Settled(ActivationState::NotActivated),
                SchedulerState::Settled(ActivationState::Activated),
                SchedulerState::Settled(ActivationState::Activated),
            ]
        );
        // The fourth tick took the fast path.
        assert_eq!(verifier.calls.get(), 3);
    }

    #[tokio::test]
    async fn check_passes_key_fingerprint_and_channel() {
        let dir = TempDir::new().unwrap();
        let (store, installed) = installed_store(&dir, "KEY-1234\nignored\n");
        let verifier = ScriptedVerifier::default();
        let sink = RecordingSink::default();
        let expected_fp = fingerprint_from(&hardware()).unwrap().to_string();
        let mut scheduler =
            Scheduler::new(settings(Channel::Volume), store, hardware(), &verifier, &sink);

        scheduler.tick_at(installed + 31 * DAY).await;

        let seen = verifier.seen.borrow();
        assert_eq!(
            seen[0],
            (expected_fp, "KEY-1234".to_string(), Channel::Volume)
        );
    }

    #[tokio::test]
    async fn hardware_failure_skips_the_check_without_a_record() {
        let dir = TempDir::new().unwrap();
        let (store, installed) = installed_store(&dir, "");
        let verifier = ScriptedVerifier::default();
        let sink = RecordingSink::default();
        let mut scheduler =
            Scheduler::new(settings(Channel::Oem), store, BrokenHardware, &verifier, &sink);

        let state = scheduler.tick_at(installed + 31 * DAY).await;

        assert_eq!(state, SchedulerState::Checking);
        assert_eq!(scheduler.last_result(), None);
        assert_eq!(verifier.calls.get(), 0);
        assert!(sink.events.borrow().is_empty());
    }

    #[tokio::test]
    async fn hardware_failure_keeps_the_prior_verdict_and_retries() {
        let dir = TempDir::new().unwrap();
        let (store, installed) = installed_store(&dir, "");
        let verifier = ScriptedVerifier::answering(&[
            ActivationState::NotActivated,
            ActivationState::NotActivated,
        ]);
        let sink = RecordingSink::default();
        let hw = SwitchableHardware::default();
        let mut scheduler = Scheduler::new(settings(Channel::Oem), store, &hw, &verifier, &sink);

        let start = installed + 31 * DAY;
        assert_eq!(
            scheduler.tick_at(start).await,
            SchedulerState::Settled(ActivationState::NotActivated)
        );
        assert_eq!(verifier.calls.get(), 1);
        assert_eq!(sink.events.borrow().len(), 1);

        hw.failing.set(true);
        let state = scheduler.tick_at(start + HOUR).await;

        assert_eq!(state, SchedulerState::Settled(ActivationState::NotActivated));
        assert_eq!(verifier.calls.get(), 1);
        {
            let events = sink.events.borrow();
            assert_eq!(events.len(), 2);
            assert_eq!(events[1].state, ActivationState::NotActivated);
        }

        hw.failing.set(false);
        let state = scheduler.tick_at(start + 2 * HOUR).await;

        assert_eq!(state, SchedulerState::Settled(ActivationState::NotActivated));
        assert_eq!(verifier.calls.get(), 2);
        assert_eq!(sink.events.borrow().len(), 3);
    }

    #[tokio::test]
    async fn missing_marker_counts_as_expired_grace_period() {
        let dir = TempDir::new().unwrap();
        let store = KeyStore::new(dir.path().join("absent"), "product.key");
        let verifier = ScriptedVerifier::default();
        let sink = RecordingSink::default();
        let mut scheduler =
            Scheduler::new(settings(Channel::Oem), store, hardware(), &verifier, &sink);

        let state = scheduler.tick().await;

        assert_eq!(state, SchedulerState::Settled(ActivationState::Activated));
        assert_eq!(verifier.calls.get(), 1);
    }

    #[test]
    fn settings_follow_config() {
        let config = DaemonConfig::default();
        let settings = SchedulerSettings::from_config(&config).unwrap();

        assert_eq!(settings.channel, Channel::Oem);
        assert_eq!(settings.grace_period, 30 * DAY);
        assert_eq!(settings.poll_interval_ticks, 336);
        assert_eq!(settings.tick_interval, HOUR);
    }
}
