//! # Poll Coordinator
//!
//! The coordinator is the caller side of the core. Once per poll it fetches
//! tank records from a [`TankSource`] under a single timeout, turns them into
//! fresh [`TankSnapshot`]s and feeds the per-tank consumption meters.
//!
//! ## Failure Policy
//! A poll is all or nothing. When the fetch or any record fails, no snapshot
//! from that poll is kept: the previous successful set stays available and is
//! reported as stale. Each failure is logged exactly once, by kind, naming the
//! account. Nothing is retried here; the next scheduled poll is the retry.

use crate::config::Config;
use crate::consumption::ConsumptionMeter;
use crate::snapshot::build_snapshots;
use crate::source::TankSource;
use crate::state::SavedState;
use crate::{SensitError, TankSnapshot, UsageSettings};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::time::Duration;

pub struct Coordinator<S: TankSource> {
    source: S,
    settings: UsageSettings,
    timeout: Duration,
    update_interval: Duration,
    energy_density: f64,
    snapshots: Option<Vec<TankSnapshot>>,
    updated: Option<DateTime<Utc>>,
    stale: bool,
    meters: BTreeMap<String, ConsumptionMeter>,
}

impl<S: TankSource> Coordinator<S> {
    pub fn new(source: S, config: &Config) -> Self {
        tracing::debug!(
            interval_hours = config.polling.update_interval_hours,
            "Update interval set"
        );
        Coordinator {
            source,
            settings: config.usage,
            timeout: config.api_timeout(),
            update_interval: config.update_interval(),
            energy_density: config.energy.oil_energy_density,
            snapshots: None,
            updated: None,
            stale: false,
            meters: BTreeMap::new(),
        }
    }

    /// Validate settings, check credentials and resume saved state.
    ///
    /// `Auth` and `Configuration` errors are permanent: the user has to fix
    /// something. `Timeout` and `Unhandled` mean the service is not ready yet.
    pub async fn setup(source: S, config: &Config, saved: SavedState) -> Result<Self, SensitError> {
        config.validate()?;

        let mut coordinator = Self::new(source, config);
        coordinator.check_credentials().await?;
        coordinator.restore(saved);
        Ok(coordinator)
    }

    pub async fn check_credentials(&self) -> Result<(), SensitError> {
        let result = match tokio::time::timeout(self.timeout, self.source.login()).await {
            Ok(result) => result,
            Err(_) => Err(SensitError::Timeout(self.timeout)),
        };
        if let Err(e) = &result {
            self.log_failure("logging in as", e);
        }
        result
    }

    /// Check credentials until they pass or fail for good.
    ///
    /// Errors the user has to fix are returned at once; the others are retried
    /// every `retry_after`.
    pub async fn wait_until_ready(&self, retry_after: Duration) -> Result<(), SensitError> {
        loop {
            match self.check_credentials().await {
                Err(e) if e.is_not_ready() => {
                    tracing::warn!(
                        retry_secs = retry_after.as_secs(),
                        "Service not ready ({}), retrying",
                        e.kind()
                    );
                    tokio::time::sleep(retry_after).await;
                }
                result => return result,
            }
        }
    }

    /// Resume consumption totals and last good snapshots from a previous run.
    ///
    /// Restored snapshots are stale until the next successful poll.
    pub fn restore(&mut self, saved: SavedState) {
        for (serial, total) in &saved.consumption_kwh {
            self.meters.insert(
                serial.clone(),
                ConsumptionMeter::restore(self.energy_density, &total.to_string()),
            );
        }
        if !saved.snapshots.is_empty() {
            self.snapshots = Some(saved.snapshots);
            self.updated = saved.updated;
            self.stale = true;
        }
    }

    /// Run one poll at `now`.
    ///
    /// On success the fresh snapshots replace the previous ones and every
    /// tank's meter advances by the time since the last successful poll.
    pub async fn refresh(&mut self, now: DateTime<Utc>) -> Result<&[TankSnapshot], SensitError> {
        let snapshots = match self.poll(now).await {
            Ok(snapshots) => snapshots,
            Err(e) => {
                self.log_failure("fetching data for", &e);
                self.stale = self.snapshots.is_some();
                return Err(e);
            }
        };

        let density = self.energy_density;
        let elapsed = self.elapsed_since_update(now);
        for snapshot in &snapshots {
            self.meters
                .entry(snapshot.serial_number.clone())
                .or_insert_with(|| ConsumptionMeter::new(density))
                .record(snapshot, elapsed);
        }

        tracing::info!(tanks = snapshots.len(), "Tank data updated");
        self.updated = Some(now);
        self.stale = false;
        Ok(self.snapshots.insert(snapshots).as_slice())
    }

    async fn poll(&self, now: DateTime<Utc>) -> Result<Vec<TankSnapshot>, SensitError> {
        tracing::debug!(account = %self.source.account(), "Fetching tank data");
        let records = tokio::time::timeout(self.timeout, self.source.fetch_tanks())
            .await
            .map_err(|_| SensitError::Timeout(self.timeout))??;

        build_snapshots(records, &self.settings, now)
    }

    /// Time to credit to the meters for a poll at `now`.
    ///
    /// Capped at one update interval; a full interval when nothing was polled
    /// before.
    fn elapsed_since_update(&self, now: DateTime<Utc>) -> Duration {
        match self.updated {
            Some(previous) => (now - previous)
                .to_std()
                .unwrap_or(Duration::ZERO)
                .min(self.update_interval),
            None => self.update_interval,
        }
    }

    fn log_failure(&self, action: &str, e: &SensitError) {
        let account = self.source.account();
        match e {
            SensitError::Timeout(_) => tracing::error!("Timeout error {action} {account}"),
            _ => tracing::error!("{} error {action} {account}: {e}", failure_label(e)),
        }
    }

    /// Snapshots of the last successful poll (or restored from disk).
    pub fn snapshots(&self) -> Option<&[TankSnapshot]> {
        self.snapshots.as_deref()
    }

    /// True when the held snapshots did not come from the latest poll.
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn updated(&self) -> Option<DateTime<Utc>> {
        self.updated
    }

    pub fn consumption_kwh(&self, serial_number: &str) -> Option<f64> {
        self.meters.get(serial_number).and_then(|m| m.total_kwh())
    }

    pub fn settings(&self) -> &UsageSettings {
        &self.settings
    }

    pub fn update_interval(&self) -> Duration {
        self.update_interval
    }

    /// Consumption totals in kWh keyed by serial number, started meters only.
    pub fn consumption(&self) -> BTreeMap<String, f64> {
        self.meters
            .iter()
            .filter_map(|(serial, meter)| meter.total_kwh().map(|kwh| (serial.clone(), kwh)))
            .collect()
    }

    /// State to persist so the next run can resume.
    pub fn saved_state(&self) -> SavedState {
        SavedState {
            updated: self.updated,
            snapshots: self.snapshots.clone().unwrap_or_default(),
            consumption_kwh: self.consumption(),
        }
    }
}

/// Log prefix for a failure kind
fn failure_label(e: &SensitError) -> &'static str {
    match e {
        SensitError::Auth(_) => "API",
        SensitError::Timeout(_) => "Timeout",
        SensitError::Data(_) => "Data",
        SensitError::Configuration(_) => "Configuration",
        SensitError::Unhandled(_) => "Unhandled",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RawReading, ReadingDate, TankRecord};
    use chrono::{Duration as ChronoDuration, TimeZone};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned login and fetch results, optionally slowly.
    struct MockSource {
        results: Mutex<VecDeque<Result<Vec<TankRecord>, SensitError>>>,
        /// Answers for the first logins, then `login` forever
        logins: Mutex<VecDeque<Result<(), SensitError>>>,
        login: Result<(), SensitError>,
        login_attempts: Mutex<usize>,
        delay: std::time::Duration,
    }

    impl MockSource {
        fn new(results: Vec<Result<Vec<TankRecord>, SensitError>>) -> Self {
            MockSource {
                results: Mutex::new(results.into()),
                logins: Mutex::new(VecDeque::new()),
                login: Ok(()),
                login_attempts: Mutex::new(0),
                delay: std::time::Duration::ZERO,
            }
        }
    }

    impl TankSource for MockSource {
        fn account(&self) -> &str {
            "test@example.com"
        }

        async fn login(&self) -> Result<(), SensitError> {
            tokio::time::sleep(self.delay).await;
            *self.login_attempts.lock().unwrap() += 1;
            let next = self.logins.lock().unwrap().pop_front();
            next.unwrap_or_else(|| self.login.clone())
        }

        async fn fetch_tanks(&self) -> Result<Vec<TankRecord>, SensitError> {
            tokio::time::sleep(self.delay).await;
            let next = self.results.lock().unwrap().pop_front();
            next.unwrap_or_else(|| Err(SensitError::Unhandled("no more results".to_string())))
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 20, 0, 30, 0).unwrap()
    }

    fn tank(serial: &str) -> TankRecord {
        TankRecord {
            level: 1000.0,
            serial_number: serial.to_string(),
            model: "Acme Tank".to_string(),
            name: "Tanky McTankFace".to_string(),
            capacity: 2000.0,
            last_read: ReadingDate::Aware(now().into()),
            history: (0..4)
                .map(|i| RawReading {
                    reading_date: ReadingDate::Aware((now() - ChronoDuration::days(3 - i)).into()),
                    level_litres: 1300.0 - 100.0 * i as f64,
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_successful_poll_updates_snapshots_and_meters() {
        let source = MockSource::new(vec![Ok(vec![tank("1"), tank("2")])]);
        let mut coordinator = Coordinator::setup(source, &Config::default(), SavedState::default())
            .await
            .unwrap();

        let snapshots = coordinator.refresh(now()).await.unwrap();
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[0].usage_rate, 100.0);
        assert_eq!(snapshots[0].name, "Tanky McTankFace #1");
        assert!(!coordinator.is_stale());

        // 100 l/day for 8 hours at 9.8 kWh/l
        let kwh = coordinator.consumption_kwh("1").unwrap();
        assert!((kwh - 100.0 / 3.0 * 9.8).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_failed_poll_keeps_last_good_snapshots() {
        let source = MockSource::new(vec![
            Ok(vec![tank("1")]),
            Err(SensitError::Unhandled("boom".to_string())),
        ]);
        let mut coordinator = Coordinator::new(source, &Config::default());

        coordinator.refresh(now()).await.unwrap();
        let kwh_before = coordinator.consumption_kwh("1");

        let err = coordinator.refresh(now() + ChronoDuration::hours(8)).await.unwrap_err();
        assert_eq!(err.kind(), "unhandled");
        assert!(coordinator.is_stale());
        assert_eq!(coordinator.snapshots().unwrap().len(), 1);
        assert_eq!(coordinator.updated(), Some(now()));
        assert_eq!(coordinator.consumption_kwh("1"), kwh_before);
    }

    #[tokio::test]
    async fn test_malformed_record_rejects_whole_poll() {
        let mut bad = tank("2");
        bad.history.reverse();
        let source = MockSource::new(vec![Ok(vec![tank("1"), bad])]);
        let mut coordinator = Coordinator::new(source, &Config::default());

        let err = coordinator.refresh(now()).await.unwrap_err();
        assert_eq!(err.kind(), "data");
        assert!(coordinator.snapshots().is_none());
        assert!(!coordinator.is_stale());
        assert_eq!(coordinator.consumption_kwh("1"), None);
    }

    #[tokio::test]
    async fn test_slow_fetch_times_out() {
        let mut source = MockSource::new(vec![Ok(vec![tank("1")])]);
        source.delay = std::time::Duration::from_millis(500);

        let mut config = Config::default();
        config.polling.api_timeout_secs = 1;
        let mut coordinator = Coordinator::new(source, &config);
        coordinator.timeout = std::time::Duration::from_millis(20);

        let err = coordinator.refresh(now()).await.unwrap_err();
        assert!(matches!(err, SensitError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_setup_rejects_bad_credentials() {
        let mut source = MockSource::new(vec![]);
        source.login = Err(SensitError::Auth("bad password".to_string()));

        let result = Coordinator::setup(source, &Config::default(), SavedState::default()).await;
        assert!(matches!(result, Err(SensitError::Auth(_))));
    }

    #[tokio::test]
    async fn test_setup_rejects_invalid_config() {
        let mut config = Config::default();
        config.usage.window_days = 0;
        let result = Coordinator::setup(MockSource::new(vec![]), &config, SavedState::default()).await;
        assert!(matches!(result, Err(SensitError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_restored_state_resumes_meter_and_is_stale() {
        let mut first = Coordinator::new(MockSource::new(vec![Ok(vec![tank("1")])]), &Config::default());
        first.refresh(now()).await.unwrap();
        let mut saved = first.saved_state();
        saved.consumption_kwh.insert("1".to_string(), 1234.5);

        let source = MockSource::new(vec![Ok(vec![tank("1")])]);
        let mut second = Coordinator::setup(source, &Config::default(), saved).await.unwrap();
        assert!(second.is_stale());
        assert_eq!(second.snapshots().unwrap().len(), 1);
        assert_eq!(second.consumption_kwh("1"), Some(1234.5));

        second.refresh(now() + ChronoDuration::hours(8)).await.unwrap();
        assert!(!second.is_stale());
        let kwh = second.consumption_kwh("1").unwrap();
        assert!((kwh - (1234.5 + 100.0 / 3.0 * 9.8)).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_restart_credits_only_time_since_last_poll() {
        let mut first = Coordinator::new(MockSource::new(vec![Ok(vec![tank("1")])]), &Config::default());
        first.refresh(now()).await.unwrap();
        let saved = first.saved_state();
        let before = saved.consumption_kwh["1"];

        let later = now() + ChronoDuration::minutes(1);
        let mut second = Coordinator::new(MockSource::new(vec![Ok(vec![tank("1")])]), &Config::default());
        second.restore(saved);
        second.refresh(later).await.unwrap();

        // 100 l/day for one minute at 9.8 kWh/l
        let added = second.consumption_kwh("1").unwrap() - before;
        assert!(
            (added - 100.0 / 1440.0 * 9.8).abs() < 1e-6,
            "One minute after restart credited {added} kWh"
        );
    }

    #[tokio::test]
    async fn test_long_gap_is_capped_at_one_interval() {
        let source = MockSource::new(vec![Ok(vec![tank("1")]), Ok(vec![tank("1")])]);
        let mut coordinator = Coordinator::new(source, &Config::default());

        coordinator.refresh(now()).await.unwrap();
        let before = coordinator.consumption_kwh("1").unwrap();
        coordinator.refresh(now() + ChronoDuration::days(3)).await.unwrap();

        let added = coordinator.consumption_kwh("1").unwrap() - before;
        assert!((added - 100.0 / 3.0 * 9.8).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_clock_going_backwards_adds_nothing() {
        let source = MockSource::new(vec![Ok(vec![tank("1")]), Ok(vec![tank("1")])]);
        let mut coordinator = Coordinator::new(source, &Config::default());

        coordinator.refresh(now()).await.unwrap();
        let before = coordinator.consumption_kwh("1");
        coordinator.refresh(now() - ChronoDuration::hours(1)).await.unwrap();
        assert_eq!(coordinator.consumption_kwh("1"), before);
    }

    #[tokio::test]
    async fn test_slow_login_is_retried_until_ready() {
        let source = MockSource::new(vec![]);
        *source.logins.lock().unwrap() = VecDeque::from([
            Err(SensitError::Timeout(std::time::Duration::from_secs(30))),
            Err(SensitError::Unhandled("connection refused".to_string())),
        ]);
        let coordinator = Coordinator::new(source, &Config::default());

        coordinator
            .wait_until_ready(std::time::Duration::from_millis(1))
            .await
            .unwrap();
        assert_eq!(*coordinator.source.login_attempts.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_rejected_login_is_not_retried() {
        let mut source = MockSource::new(vec![]);
        source.login = Err(SensitError::Auth("bad password".to_string()));
        let coordinator = Coordinator::new(source, &Config::default());

        let err = coordinator
            .wait_until_ready(std::time::Duration::from_millis(1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "auth");
        assert_eq!(*coordinator.source.login_attempts.lock().unwrap(), 1);
    }

    #[test]
    fn test_failure_labels_follow_error_kind() {
        assert_eq!(failure_label(&SensitError::Auth("401".to_string())), "API");
        assert_eq!(failure_label(&SensitError::Unhandled("dns".to_string())), "Unhandled");
        assert_eq!(failure_label(&SensitError::Data("unsorted".to_string())), "Data");
    }

    #[tokio::test]
    async fn test_consumption_lists_started_meters() {
        let source = MockSource::new(vec![Ok(vec![tank("1"), tank("2")])]);
        let mut coordinator = Coordinator::new(source, &Config::default());
        assert!(coordinator.consumption().is_empty());

        coordinator.refresh(now()).await.unwrap();
        let consumption = coordinator.consumption();
        assert_eq!(consumption.len(), 2);
        assert_eq!(consumption.get("1").copied(), coordinator.consumption_kwh("1"));
    }
}
