//! Snapshot of the whole controller in one round of concurrent calls.
//!
//! Identity, every thermostat status call and the optional script / action /
//! schedule listings run on their own scoped threads, each with its own
//! timeout. Failures only degrade the part of the snapshot they belong to.

use chrono::Utc;
use log::{debug, info};
use serde_json::{Value, json};
use std::thread::{self, ScopedJoinHandle};
use std::time::Instant;

use crate::config::Config;
use crate::error::{ErrorKind, RpcError};
use crate::guard::GuardedClient;
use crate::models::device::{AggregatedDeviceData, ThermostatState};
use crate::services::normalize;

const DEVICE_INFO: &str = "Shelly.GetDeviceInfo";
const SYSTEM_STATUS: &str = "Sys.GetStatus";
const COMPONENTS: &str = "Shelly.GetComponents";
const THERMOSTAT_STATUS: &str = "BluTrv.GetStatus";
const SCRIPT_LIST: &str = "Script.List";
const ACTION_LIST: &str = "Webhook.List";
const SCHEDULE_LIST: &str = "Schedule.List";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateOptions {
    /// Explicit thermostat ids; `None` asks the controller for its components.
    pub device_ids: Option<Vec<u32>>,
    pub include_scripts: bool,
    pub include_actions: bool,
    pub include_schedules: bool,
}

impl Default for AggregateOptions {
    fn default() -> Self {
        AggregateOptions {
            device_ids: None,
            include_scripts: true,
            include_actions: true,
            include_schedules: true,
        }
    }
}

impl From<&Config> for AggregateOptions {
    fn from(cfg: &Config) -> Self {
        AggregateOptions {
            device_ids: cfg.device_ids.clone(),
            include_scripts: cfg.include_scripts,
            include_actions: cfg.include_actions,
            include_schedules: cfg.include_schedules,
        }
    }
}

/// The single user-facing authentication message of a round. The first
/// failure in call order wins, so the text is stable between rounds.
#[derive(Debug, Default)]
struct AuthSlot(Option<String>);

impl AuthSlot {
    /// Classify a finished call. Returns the value on success; on failure logs
    /// it, records authentication problems and hands the error back for the
    /// caller's degradation policy.
    fn settle(&mut self, outcome: Result<Value, RpcError>) -> Result<Value, RpcError> {
        outcome.inspect_err(|e| {
            e.log();
            if e.kind() == ErrorKind::Authentication && self.0.is_none() {
                self.0 = Some(e.auth_message());
            }
        })
    }
}

type Call<'scope> = ScopedJoinHandle<'scope, Result<Value, RpcError>>;

fn join(handle: Call<'_>, method: &str) -> Result<Value, RpcError> {
    handle.join().unwrap_or_else(|_| {
        Err(RpcError::Transport {
            method: method.to_string(),
            status: None,
            message: "worker thread panicked".to_string(),
        })
    })
}

fn join_optional(handle: Option<Call<'_>>, method: &str) -> Option<Result<Value, RpcError>> {
    handle.map(|h| join(h, method))
}

pub fn fetch_aggregated_status(client: &GuardedClient, opts: &AggregateOptions) -> AggregatedDeviceData {
    let started = Instant::now();

    let (info, system, discovery, devices, scripts, actions, schedules) = thread::scope(|s| {
        let info = s.spawn(|| client.call(DEVICE_INFO, json!({})));
        let system = s.spawn(|| client.call(SYSTEM_STATUS, json!({})));
        let scripts = opts.include_scripts.then(|| s.spawn(|| client.call(SCRIPT_LIST, json!({}))));
        let actions = opts.include_actions.then(|| s.spawn(|| client.call(ACTION_LIST, json!({}))));
        let schedules = opts.include_schedules.then(|| s.spawn(|| client.call(SCHEDULE_LIST, json!({}))));

        // Thermostat calls need the ids first; the calls above are already in flight.
        let (ids, discovery) = match &opts.device_ids {
            Some(ids) => (ids.clone(), None),
            None => {
                let outcome = client.call(COMPONENTS, json!({"dynamic_only": true}));
                let ids = outcome.as_ref().map(normalize::thermostat_ids).unwrap_or_default();
                (ids, Some(outcome))
            }
        };

        let device_calls: Vec<(u32, Call<'_>)> = ids
            .into_iter()
            .map(|id| (id, s.spawn(move || client.call(THERMOSTAT_STATUS, json!({"id": id})))))
            .collect();

        let devices: Vec<(u32, Result<Value, RpcError>)> = device_calls
            .into_iter()
            .map(|(id, h)| (id, join(h, THERMOSTAT_STATUS)))
            .collect();

        (
            join(info, DEVICE_INFO),
            join(system, SYSTEM_STATUS),
            discovery,
            devices,
            join_optional(scripts, SCRIPT_LIST),
            join_optional(actions, ACTION_LIST),
            join_optional(schedules, SCHEDULE_LIST),
        )
    });

    let mut auth = AuthSlot::default();
    let host = client.host().to_string();

    let info = auth.settle(info).ok();
    let system = auth.settle(system).ok();
    let controller = info.map(|info| normalize::identity(&host, &info, system.as_ref()));

    if let Some(outcome) = discovery {
        // Never fatal: no components simply means no thermostats.
        let _ = auth.settle(outcome);
    }

    let mut thermostats = Vec::with_capacity(devices.len());
    for (id, outcome) in devices {
        match auth.settle(outcome) {
            Ok(raw) => thermostats.push(normalize::thermostat(id, raw)),
            Err(e) if matches!(e.kind(), ErrorKind::Authentication | ErrorKind::UnsupportedMethod) => {}
            Err(_) => thermostats.push(ThermostatState::unavailable(id)),
        }
    }

    let mut list = |outcome: Option<Result<Value, RpcError>>| outcome.and_then(|o| auth.settle(o).ok());
    let scripts = list(scripts).map(|v| normalize::scripts(&v)).unwrap_or_default();
    let actions = list(actions).map(|v| normalize::actions(&v)).unwrap_or_default();
    let schedules = list(schedules).map(|v| normalize::schedules(&v)).unwrap_or_default();

    if let Some(msg) = &auth.0 {
        debug!("Aggregation finished with authentication error: {}", msg);
    }
    info!(
        "Aggregated controller {} in {}ms (thermostats={}, scripts={}, actions={}, schedules={})",
        host,
        started.elapsed().as_millis(),
        thermostats.len(),
        scripts.len(),
        actions.len(),
        schedules.len()
    );

    AggregatedDeviceData {
        controller,
        thermostats,
        scripts,
        actions,
        schedules,
        controller_url: host,
        auth_error: auth.0,
        fetched_at: Utc::now(),
    }
}
