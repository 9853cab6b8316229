//! Canonical, firmware-independent records built by the aggregator.
//!
//! Every record keeps the untouched source object in `raw` for debugging.
//! Records are built once per aggregation round and never mutated.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

pub const STATUS_ONLINE: &str = "online";
pub const STATUS_OFFLINE: &str = "offline";
pub const STATUS_UNAVAILABLE: &str = "unavailable";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceIdentity {
    pub name: Option<String>,
    pub model: Option<String>,
    pub firmware_id: Option<String>,
    pub mac: Option<String>,
    pub uptime_seconds: Option<u64>,
    /// Controller base URL the identity was read from.
    pub host: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThermostatState {
    pub id: u32,
    pub name: String,
    pub group: Option<String>,
    /// One of `online`, `offline`, `unavailable`.
    pub status: String,
    pub online: bool,
    pub target_c: Option<f64>,
    pub current_c: Option<f64>,
    pub battery: Option<f64>,
    pub valve_position: Option<f64>,
    pub humidity: Option<f64>,
    pub mode: Option<String>,
    pub last_updated_ts: Option<i64>,
    pub raw: Value,
}

impl ThermostatState {
    /// Stand-in for a device whose status call failed.
    pub fn unavailable(id: u32) -> Self {
        ThermostatState {
            id,
            name: default_thermostat_name(id),
            group: None,
            status: STATUS_UNAVAILABLE.to_string(),
            online: false,
            target_c: None,
            current_c: None,
            battery: None,
            valve_position: None,
            humidity: None,
            mode: None,
            last_updated_ts: None,
            raw: Value::Null,
        }
    }
}

pub fn default_thermostat_name(id: u32) -> String {
    format!("Thermostat {}", id)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptState {
    pub id: i64,
    pub name: String,
    pub enabled: bool,
    pub running: bool,
    pub last_run_ts: Option<i64>,
    pub raw: Value,
}

/// A controller-side action (webhook) bound to a device event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionState {
    pub id: i64,
    pub name: String,
    pub event: Option<String>,
    pub enabled: bool,
    pub urls: Vec<String>,
    pub raw: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleState {
    pub id: i64,
    pub name: String,
    pub enabled: bool,
    /// Cron-like expression as reported by the controller.
    pub timespec: Option<String>,
    /// Methods invoked when the schedule fires.
    pub calls: Vec<String>,
    pub next_run_ts: Option<i64>,
    pub raw: Value,
}

/// One snapshot of the controller. The four lists are always present; an
/// empty list means "none found or not supported".
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedDeviceData {
    pub controller: Option<DeviceIdentity>,
    pub thermostats: Vec<ThermostatState>,
    pub scripts: Vec<ScriptState>,
    pub actions: Vec<ActionState>,
    pub schedules: Vec<ScheduleState>,
    pub controller_url: String,
    pub auth_error: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_snapshot_serializes_every_list() {
        let data = AggregatedDeviceData {
            controller: None,
            thermostats: Vec::new(),
            scripts: Vec::new(),
            actions: Vec::new(),
            schedules: Vec::new(),
            controller_url: "http://192.168.33.1".into(),
            auth_error: Some("denied".into()),
            fetched_at: DateTime::from_timestamp(1_710_000_000, 0).unwrap(),
        };
        let v = serde_json::to_value(&data).unwrap();
        for key in ["thermostats", "scripts", "actions", "schedules"] {
            assert_eq!(v[key], json!([]), "{key}");
        }
        assert_eq!(v["controller"], Value::Null);
        assert_eq!(v["authError"], json!("denied"));
        assert_eq!(v["controllerUrl"], json!("http://192.168.33.1"));
    }

    #[test]
    fn placeholder_is_marked_unavailable() {
        let t = ThermostatState::unavailable(201);
        assert_eq!(t.status, STATUS_UNAVAILABLE);
        assert_eq!(t.name, "Thermostat 201");
        assert!(!t.online);
    }
}
