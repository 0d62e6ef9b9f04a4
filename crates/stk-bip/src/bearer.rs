//! Bearer coordination.
//!
//! Makes sure the data connection a channel needs is up before its socket
//! is opened. Two paths exist:
//!
//! - **Default bearer** (also used for a packet-switched bearer without an
//!   access point name): enable the default type and look at its state.
//! - **Specific access point**: make sure the carrier's APN list holds the
//!   requested name tagged with the BIP type, then enable that type.
//!   Provisioning that is not visible yet is retried on a fixed interval.
//!
//! The coordinator never sleeps. Delays come back as
//! [`BearerOutcome::RetryAfter`] and the caller schedules
//! [`BearerCoordinator::retry`]; connectivity changes come in through
//! [`BearerCoordinator::on_connectivity`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use stk_bip_models::{BearerDescription, BearerType};
use tracing::{debug, info, warn};

use crate::config::BipConfig;
use crate::error::CommandError;
use crate::telephony::{ApnRecord, ApnType, ConnectivityEvent, DataConnectivity, DataState, EnableResult};

/// Immediate answer to a bearer request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BearerOutcome {
    /// The bearer is up.
    Ready,
    /// Wait for a connectivity event.
    Pending,
    /// Call [`BearerCoordinator::retry`] after this delay.
    RetryAfter(Duration),
    /// The bearer cannot be provided.
    Failed(CommandError),
}

/// Change reported for a channel by [`BearerCoordinator::on_connectivity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BearerNotice {
    /// A pending bearer came up.
    Ready(u8),
    /// A pending bearer failed to come up.
    Failed(u8, CommandError),
    /// An active bearer went away.
    Lost(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestState {
    /// Waiting for the APN to be provisioned.
    Provisioning { attempts: u32 },
    /// Enabled, waiting for CONNECTED.
    Waiting,
    Active,
}

#[derive(Debug, Clone)]
struct BearerRequest {
    apn_type: ApnType,
    access_point: Option<String>,
    state: RequestState,
}

/// Tracks which channel uses which access point type.
pub struct BearerCoordinator {
    connectivity: Arc<dyn DataConnectivity>,
    bip_apn_type: ApnType,
    retry_interval: Duration,
    retry_limit: u32,
    requests: BTreeMap<u8, BearerRequest>,
}

impl BearerCoordinator {
    /// Create a coordinator on top of the host's data connectivity.
    pub fn new(connectivity: Arc<dyn DataConnectivity>, config: &BipConfig) -> Self {
        Self {
            connectivity,
            bip_apn_type: config.bip_apn_type.clone(),
            retry_interval: config.apn_retry_interval,
            retry_limit: config.apn_retry_limit,
            requests: BTreeMap::new(),
        }
    }

    /// Ask for the bearer channel `channel_id` needs.
    pub fn request(&mut self, channel_id: u8, bearer: &BearerDescription, access_point: Option<&str>) -> BearerOutcome {
        let specific = bearer.bearer_type().is_some_and(BearerType::is_packet_switched);
        match access_point {
            Some(name) if specific => {
                debug!(channel_id, apn = name, apn_type = %self.bip_apn_type, "requesting specific bearer");
                self.requests.insert(
                    channel_id,
                    BearerRequest {
                        apn_type: self.bip_apn_type.clone(),
                        access_point: Some(name.to_string()),
                        state: RequestState::Provisioning { attempts: 0 },
                    },
                );
                self.check_specific(channel_id)
            }
            _ => self.request_default(channel_id),
        }
    }

    /// Re-run the provisioning check after a [`BearerOutcome::RetryAfter`].
    ///
    /// Returns `None` if the request was cancelled in the meantime.
    pub fn retry(&mut self, channel_id: u8) -> Option<BearerOutcome> {
        match self.requests.get(&channel_id)?.state {
            RequestState::Provisioning { .. } => Some(self.check_specific(channel_id)),
            _ => None,
        }
    }

    /// Apply a connectivity change to every request on the same type.
    pub fn on_connectivity(&mut self, event: &ConnectivityEvent) -> Vec<BearerNotice> {
        let mut notices = Vec::new();
        for (&channel_id, request) in &mut self.requests {
            if request.apn_type != event.apn_type {
                continue;
            }
            match (request.state, event.state) {
                (RequestState::Waiting, DataState::Connected) => {
                    request.state = RequestState::Active;
                    notices.push(BearerNotice::Ready(channel_id));
                }
                (RequestState::Waiting, DataState::Disconnected) if !event.is_failover => {
                    notices.push(BearerNotice::Failed(channel_id, CommandError::network_unable()));
                }
                (RequestState::Active, DataState::Disconnected) if !event.is_failover => {
                    notices.push(BearerNotice::Lost(channel_id));
                }
                _ => {}
            }
        }

        for notice in &notices {
            match *notice {
                BearerNotice::Failed(channel_id, _) | BearerNotice::Lost(channel_id) => {
                    self.release(channel_id);
                }
                BearerNotice::Ready(_) => {}
            }
        }
        if !notices.is_empty() {
            info!(apn_type = %event.apn_type, state = %event.state, count = notices.len(), "connectivity change applied");
        }
        notices
    }

    /// Forget channel `channel_id`, disabling its access point type if no
    /// other channel still uses it.
    pub fn release(&mut self, channel_id: u8) {
        let Some(request) = self.requests.remove(&channel_id) else {
            return;
        };
        let enabled = !matches!(request.state, RequestState::Provisioning { .. });
        let still_used = self.requests.values().any(|other| other.apn_type == request.apn_type);
        if enabled && !still_used && !request.apn_type.is_default() {
            info!(channel_id, apn_type = %request.apn_type, "last channel on bearer released; disabling");
            self.connectivity.disable_apn_type(&request.apn_type);
        }
    }

    /// Drop every request that has not completed yet, returning their channels.
    pub fn cancel_pending(&mut self) -> Vec<u8> {
        let pending: Vec<u8> = self
            .requests
            .iter()
            .filter(|(_, request)| request.state != RequestState::Active)
            .map(|(&channel_id, _)| channel_id)
            .collect();
        for &channel_id in &pending {
            self.release(channel_id);
        }
        pending
    }

    /// Release every request.
    pub fn release_all(&mut self) {
        let channels: Vec<u8> = self.requests.keys().copied().collect();
        for channel_id in channels {
            self.release(channel_id);
        }
    }

    // ─── Default bearer ─────────────────────────────────────────────

    fn request_default(&mut self, channel_id: u8) -> BearerOutcome {
        let apn_type = ApnType::default_type();
        let enabled = self.connectivity.enable_apn_type(&apn_type);
        let state = self.connectivity.apn_state(&apn_type);
        debug!(channel_id, %enabled, %state, "requesting default bearer");

        let state = match state {
            DataState::Connected => RequestState::Active,
            DataState::Connecting => RequestState::Waiting,
            DataState::Suspended => return BearerOutcome::Failed(CommandError::busy_on_call()),
            DataState::Disconnected => return BearerOutcome::Failed(CommandError::beyond_capability()),
        };
        self.requests.insert(
            channel_id,
            BearerRequest {
                apn_type,
                access_point: None,
                state,
            },
        );
        if state == RequestState::Active {
            BearerOutcome::Ready
        } else {
            BearerOutcome::Pending
        }
    }

    // ─── Specific access point ──────────────────────────────────────

    fn check_specific(&mut self, channel_id: u8) -> BearerOutcome {
        let Some(request) = self.requests.get(&channel_id).cloned() else {
            return BearerOutcome::Failed(CommandError::beyond_capability());
        };

        if !self.connectivity.is_data_allowed() {
            warn!(channel_id, "mobile data not allowed");
            self.requests.remove(&channel_id);
            return BearerOutcome::Failed(CommandError::beyond_capability());
        }
        if self.connectivity.is_voice_call_active() {
            warn!(channel_id, "voice call active");
            self.requests.remove(&channel_id);
            return BearerOutcome::Failed(CommandError::busy_on_call());
        }

        if let Some(name) = &request.access_point {
            if !self.provisioned(name, &request.apn_type) {
                self.provision(name, &request.apn_type);
                if !self.provisioned(name, &request.apn_type) {
                    return self.schedule_retry(channel_id);
                }
            }
        }

        match self.connectivity.enable_apn_type(&request.apn_type) {
            EnableResult::AlreadyActive => {
                self.set_state(channel_id, RequestState::Active);
                BearerOutcome::Ready
            }
            EnableResult::RequestStarted => {
                self.set_state(channel_id, RequestState::Waiting);
                BearerOutcome::Pending
            }
            EnableResult::TypeNotAvailable => self.schedule_retry(channel_id),
            EnableResult::RequestFailed => {
                warn!(channel_id, apn_type = %request.apn_type, "enable request refused");
                self.requests.remove(&channel_id);
                BearerOutcome::Failed(CommandError::beyond_capability())
            }
        }
    }

    fn provisioned(&self, name: &str, apn_type: &ApnType) -> bool {
        self.connectivity
            .apn_records()
            .iter()
            .any(|record| record.name.eq_ignore_ascii_case(name) && record.serves(apn_type))
    }

    fn provision(&self, name: &str, apn_type: &ApnType) {
        let existing = self
            .connectivity
            .apn_records()
            .into_iter()
            .find(|record| record.name.eq_ignore_ascii_case(name));
        let record = match existing {
            Some(mut record) => {
                record.types.push(apn_type.clone());
                record
            }
            None => ApnRecord {
                name: name.to_string(),
                types: vec![apn_type.clone()],
            },
        };
        info!(apn = %record.name, %apn_type, "provisioning access point");
        self.connectivity.insert_apn(record);
    }

    fn schedule_retry(&mut self, channel_id: u8) -> BearerOutcome {
        let Some(request) = self.requests.get_mut(&channel_id) else {
            return BearerOutcome::Failed(CommandError::beyond_capability());
        };
        let attempts = match request.state {
            RequestState::Provisioning { attempts } => attempts + 1,
            _ => 1,
        };
        if attempts > self.retry_limit {
            warn!(channel_id, attempts, "access point not ready; giving up");
            self.release(channel_id);
            return BearerOutcome::Failed(CommandError::beyond_capability());
        }
        request.state = RequestState::Provisioning { attempts };
        debug!(channel_id, attempts, "access point not ready; retrying");
        BearerOutcome::RetryAfter(self.retry_interval)
    }

    fn set_state(&mut self, channel_id: u8, state: RequestState) {
        if let Some(request) = self.requests.get_mut(&channel_id) {
            request.state = state;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use stk_bip_models::ResultCode;

    use super::*;

    #[derive(Default)]
    struct FakeConnectivity {
        default_state: Mutex<Option<DataState>>,
        enable_result: Mutex<Option<EnableResult>>,
        records: Mutex<Vec<ApnRecord>>,
        hide_inserts: Mutex<bool>,
        voice_call: Mutex<bool>,
        disabled: Mutex<Vec<ApnType>>,
    }

    impl DataConnectivity for FakeConnectivity {
        fn enable_apn_type(&self, _apn_type: &ApnType) -> EnableResult {
            self.enable_result.lock().unwrap().unwrap_or(EnableResult::AlreadyActive)
        }
        fn disable_apn_type(&self, apn_type: &ApnType) {
            self.disabled.lock().unwrap().push(apn_type.clone());
        }
        fn apn_state(&self, _apn_type: &ApnType) -> DataState {
            self.default_state.lock().unwrap().unwrap_or(DataState::Connected)
        }
        fn is_data_allowed(&self) -> bool {
            true
        }
        fn is_voice_call_active(&self) -> bool {
            *self.voice_call.lock().unwrap()
        }
        fn apn_records(&self) -> Vec<ApnRecord> {
            self.records.lock().unwrap().clone()
        }
        fn insert_apn(&self, record: ApnRecord) {
            if *self.hide_inserts.lock().unwrap() {
                return;
            }
            let mut records = self.records.lock().unwrap();
            records.retain(|r| r.name != record.name);
            records.push(record);
        }
    }

    fn coordinator(fake: &Arc<FakeConnectivity>) -> BearerCoordinator {
        BearerCoordinator::new(fake.clone(), &BipConfig::default())
    }

    fn gprs() -> BearerDescription {
        BearerDescription {
            type_code: 0x02,
            parameters: vec![0x03, 0x04, 0x03, 0x04, 0x1F, 0x02],
        }
    }

    #[test]
    fn default_bearer_states() {
        let fake = Arc::new(FakeConnectivity::default());
        let mut bearers = coordinator(&fake);
        assert_eq!(bearers.request(1, &BearerDescription::default_bearer(), None), BearerOutcome::Ready);

        *fake.default_state.lock().unwrap() = Some(DataState::Connecting);
        assert_eq!(bearers.request(2, &BearerDescription::default_bearer(), None), BearerOutcome::Pending);

        *fake.default_state.lock().unwrap() = Some(DataState::Suspended);
        let BearerOutcome::Failed(err) = bearers.request(3, &BearerDescription::default_bearer(), None) else {
            panic!("expected busy");
        };
        assert_eq!(err, CommandError::busy_on_call());

        *fake.default_state.lock().unwrap() = Some(DataState::Disconnected);
        assert_eq!(
            bearers.request(4, &BearerDescription::default_bearer(), None),
            BearerOutcome::Failed(CommandError::beyond_capability())
        );
        assert!(!bearers.requests.contains_key(&4));
    }

    #[test]
    fn packet_bearer_without_name_uses_default() {
        let fake = Arc::new(FakeConnectivity::default());
        let mut bearers = coordinator(&fake);
        assert_eq!(bearers.request(1, &gprs(), None), BearerOutcome::Ready);
        assert!(fake.records.lock().unwrap().is_empty());
    }

    #[test]
    fn missing_access_point_is_inserted() {
        let fake = Arc::new(FakeConnectivity::default());
        let mut bearers = coordinator(&fake);
        assert_eq!(bearers.request(1, &gprs(), Some("bip.example")), BearerOutcome::Ready);
        let records = fake.records.lock().unwrap().clone();
        assert_eq!(records.len(), 1);
        assert!(records[0].serves(&"bip".into()));
    }

    #[test]
    fn existing_access_point_gains_bip_type() {
        let fake = Arc::new(FakeConnectivity::default());
        fake.records.lock().unwrap().push(ApnRecord {
            name: "BIP.example".into(),
            types: vec![ApnType::default_type()],
        });
        let mut bearers = coordinator(&fake);
        assert_eq!(bearers.request(1, &gprs(), Some("bip.example")), BearerOutcome::Ready);
        let records = fake.records.lock().unwrap().clone();
        assert_eq!(records[0].types, vec![ApnType::default_type(), "bip".into()]);
    }

    #[test]
    fn invisible_insert_retries_then_fails() {
        let fake = Arc::new(FakeConnectivity::default());
        *fake.hide_inserts.lock().unwrap() = true;
        let mut bearers = coordinator(&fake);
        let interval = BipConfig::default().apn_retry_interval;

        assert_eq!(bearers.request(1, &gprs(), Some("bip.example")), BearerOutcome::RetryAfter(interval));
        for _ in 1..4 {
            assert_eq!(bearers.retry(1), Some(BearerOutcome::RetryAfter(interval)));
        }
        assert_eq!(bearers.retry(1), Some(BearerOutcome::Failed(CommandError::beyond_capability())));
        assert_eq!(bearers.retry(1), None);
    }

    #[test]
    fn retry_after_cancel_is_ignored() {
        let fake = Arc::new(FakeConnectivity::default());
        *fake.enable_result.lock().unwrap() = Some(EnableResult::TypeNotAvailable);
        let mut bearers = coordinator(&fake);
        assert!(matches!(
            bearers.request(5, &gprs(), Some("bip.example")),
            BearerOutcome::RetryAfter(_)
        ));
        assert_eq!(bearers.cancel_pending(), vec![5]);
        assert_eq!(bearers.retry(5), None);
        assert!(fake.disabled.lock().unwrap().is_empty());
    }

    #[test]
    fn voice_call_is_busy() {
        let fake = Arc::new(FakeConnectivity::default());
        *fake.voice_call.lock().unwrap() = true;
        let mut bearers = coordinator(&fake);
        let BearerOutcome::Failed(err) = bearers.request(1, &gprs(), Some("bip.example")) else {
            panic!("expected failure");
        };
        assert_eq!(err.result, ResultCode::TerminalUnableToProcess);
    }

    #[test]
    fn pending_request_completes_on_connected() {
        let fake = Arc::new(FakeConnectivity::default());
        *fake.enable_result.lock().unwrap() = Some(EnableResult::RequestStarted);
        let mut bearers = coordinator(&fake);
        assert_eq!(bearers.request(2, &gprs(), Some("bip.example")), BearerOutcome::Pending);

        let unrelated = ConnectivityEvent {
            apn_type: "mms".into(),
            state: DataState::Connected,
            is_failover: false,
        };
        assert!(bearers.on_connectivity(&unrelated).is_empty());

        let up = ConnectivityEvent {
            apn_type: "bip".into(),
            state: DataState::Connected,
            is_failover: false,
        };
        assert_eq!(bearers.on_connectivity(&up), vec![BearerNotice::Ready(2)]);
    }

    #[test]
    fn disconnect_fails_pending_and_drops_active() {
        let fake = Arc::new(FakeConnectivity::default());
        let mut bearers = coordinator(&fake);
        assert_eq!(bearers.request(1, &gprs(), Some("bip.example")), BearerOutcome::Ready);
        *fake.enable_result.lock().unwrap() = Some(EnableResult::RequestStarted);
        assert_eq!(bearers.request(2, &gprs(), Some("bip.example")), BearerOutcome::Pending);

        let failover = ConnectivityEvent {
            apn_type: "bip".into(),
            state: DataState::Disconnected,
            is_failover: true,
        };
        assert!(bearers.on_connectivity(&failover).is_empty());

        let down = ConnectivityEvent {
            is_failover: false,
            ..failover
        };
        assert_eq!(
            bearers.on_connectivity(&down),
            vec![
                BearerNotice::Lost(1),
                BearerNotice::Failed(2, CommandError::network_unable())
            ]
        );
        assert_eq!(fake.disabled.lock().unwrap().as_slice(), &[ApnType::new("bip")]);
    }

    #[test]
    fn bip_type_disabled_only_after_last_release() {
        let fake = Arc::new(FakeConnectivity::default());
        let mut bearers = coordinator(&fake);
        bearers.request(1, &gprs(), Some("bip.example"));
        bearers.request(2, &gprs(), Some("bip.example"));
        bearers.release(1);
        assert!(fake.disabled.lock().unwrap().is_empty());
        bearers.release(2);
        assert_eq!(fake.disabled.lock().unwrap().len(), 1);

        bearers.request(3, &BearerDescription::default_bearer(), None);
        bearers.release(3);
        assert_eq!(fake.disabled.lock().unwrap().len(), 1);
    }
}
