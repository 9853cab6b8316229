//! Field normalization for controller payloads.
//!
//! Firmware versions disagree on field names (`target_C` vs `targetC` vs a
//! nested `trv:0` object). Each canonical field is described by an ordered
//! table of (JSON pointer, parser) candidates; the first candidate that is
//! present and parses wins. Supporting a new variant means adding a row.

use serde_json::Value;

use crate::models::device::{
    ActionState, DeviceIdentity, STATUS_OFFLINE, STATUS_ONLINE, ScheduleState, ScriptState, ThermostatState,
    default_thermostat_name,
};

pub struct Candidate<T> {
    pointer: &'static str,
    parse: fn(&Value) -> Option<T>,
}

impl<T> Candidate<T> {
    pub const fn new(pointer: &'static str, parse: fn(&Value) -> Option<T>) -> Self {
        Candidate { pointer, parse }
    }
}

/// Evaluate `table` against `raw` in order.
pub fn first_present<T>(raw: &Value, table: &[Candidate<T>]) -> Option<T> {
    table
        .iter()
        .find_map(|c| raw.pointer(c.pointer).and_then(|v| (c.parse)(v)))
}

// =====================
// Parsers
// =====================

fn number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn integer(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn flag(v: &Value) -> Option<bool> {
    match v {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|i| i != 0),
        Value::String(s) => match s.trim() {
            "true" | "1" | "on" => Some(true),
            "false" | "0" | "off" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Unix seconds; zero means "never" on this controller.
fn timestamp(v: &Value) -> Option<i64> {
    integer(v).filter(|ts| *ts > 0)
}

fn string_list(v: &Value) -> Option<Vec<String>> {
    match v {
        Value::Array(items) => Some(items.iter().filter_map(text).collect()),
        Value::String(s) if !s.is_empty() => Some(vec![s.clone()]),
        _ => None,
    }
}

fn call_methods(v: &Value) -> Option<Vec<String>> {
    let items = v.as_array()?;
    Some(
        items
            .iter()
            .filter_map(|call| call.get("method").and_then(text).or_else(|| text(call)))
            .collect(),
    )
}

fn array(v: &Value) -> Option<Vec<Value>> {
    v.as_array().cloned()
}

// =====================
// Candidate tables
// =====================

const TARGET_C: &[Candidate<f64>] = &[
    Candidate::new("/target_C", number),
    Candidate::new("/targetC", number),
    Candidate::new("/target_temperature", number),
    Candidate::new("/target", number),
    Candidate::new("/setpoint", number),
    Candidate::new("/occupied_heating_setpoint", number),
    Candidate::new("/trv:0/target_C", number),
    Candidate::new("/status/target_C", number),
];

const CURRENT_C: &[Candidate<f64>] = &[
    Candidate::new("/current_C", number),
    Candidate::new("/currentC", number),
    Candidate::new("/current_temperature", number),
    Candidate::new("/temperature", number),
    Candidate::new("/tC", number),
    Candidate::new("/local_temperature", number),
    Candidate::new("/trv:0/current_C", number),
    Candidate::new("/temperature:0/tC", number),
    Candidate::new("/status/current_C", number),
];

const BATTERY: &[Candidate<f64>] = &[
    Candidate::new("/battery", number),
    Candidate::new("/battery_percent", number),
    Candidate::new("/batt", number),
    Candidate::new("/battery/percent", number),
    Candidate::new("/devicepower:0/battery/percent", number),
];

const VALVE_POSITION: &[Candidate<f64>] = &[
    Candidate::new("/pos", number),
    Candidate::new("/valve_position", number),
    Candidate::new("/valve", number),
    Candidate::new("/pi_heating_demand", number),
    Candidate::new("/trv:0/pos", number),
];

const HUMIDITY: &[Candidate<f64>] = &[
    Candidate::new("/humidity", number),
    Candidate::new("/rh", number),
    Candidate::new("/humidity:0/rh", number),
];

const MODE: &[Candidate<String>] = &[
    Candidate::new("/mode", text),
    Candidate::new("/hvac_mode", text),
    Candidate::new("/trv:0/mode", text),
];

const ONLINE: &[Candidate<bool>] = &[
    Candidate::new("/connected", flag),
    Candidate::new("/online", flag),
    Candidate::new("/available", flag),
];

const LAST_UPDATED: &[Candidate<i64>] = &[
    Candidate::new("/last_updated_ts", timestamp),
    Candidate::new("/ts", timestamp),
    Candidate::new("/last_seen", timestamp),
];

const NAME: &[Candidate<String>] = &[
    Candidate::new("/name", text),
    Candidate::new("/config/name", text),
    Candidate::new("/label", text),
];

const GROUP: &[Candidate<String>] = &[
    Candidate::new("/group", text),
    Candidate::new("/room", text),
    Candidate::new("/config/group", text),
];

const ID: &[Candidate<i64>] = &[Candidate::new("/id", integer)];

const ENABLED: &[Candidate<bool>] = &[Candidate::new("/enable", flag), Candidate::new("/enabled", flag)];

const RUNNING: &[Candidate<bool>] = &[
    Candidate::new("/running", flag),
    Candidate::new("/status/running", flag),
];

const LAST_RUN: &[Candidate<i64>] = &[
    Candidate::new("/last_run", timestamp),
    Candidate::new("/last_run_ts", timestamp),
    Candidate::new("/lastRun", timestamp),
];

const NEXT_RUN: &[Candidate<i64>] = &[
    Candidate::new("/next_run", timestamp),
    Candidate::new("/next_run_ts", timestamp),
    Candidate::new("/nextRun", timestamp),
];

const EVENT: &[Candidate<String>] = &[Candidate::new("/event", text), Candidate::new("/trigger", text)];

const URLS: &[Candidate<Vec<String>>] = &[Candidate::new("/urls", string_list), Candidate::new("/url", string_list)];

const TIMESPEC: &[Candidate<String>] = &[Candidate::new("/timespec", text), Candidate::new("/cron", text)];

const CALLS: &[Candidate<Vec<String>>] = &[Candidate::new("/calls", call_methods), Candidate::new("/methods", string_list)];

const SCRIPT_ITEMS: &[Candidate<Vec<Value>>] = &[Candidate::new("/scripts", array), Candidate::new("", array)];

const ACTION_ITEMS: &[Candidate<Vec<Value>>] = &[
    Candidate::new("/hooks", array),
    Candidate::new("/webhooks", array),
    Candidate::new("/actions", array),
    Candidate::new("", array),
];

const SCHEDULE_ITEMS: &[Candidate<Vec<Value>>] = &[
    Candidate::new("/jobs", array),
    Candidate::new("/schedules", array),
    Candidate::new("", array),
];

const IDENTITY_NAME: &[Candidate<String>] = &[Candidate::new("/name", text), Candidate::new("/id", text)];

const MODEL: &[Candidate<String>] = &[Candidate::new("/model", text), Candidate::new("/app", text)];

const FIRMWARE: &[Candidate<String>] = &[
    Candidate::new("/fw_id", text),
    Candidate::new("/firmware", text),
    Candidate::new("/ver", text),
];

const MAC: &[Candidate<String>] = &[Candidate::new("/mac", text), Candidate::new("/mac_address", text)];

const UPTIME: &[Candidate<i64>] = &[Candidate::new("/uptime", integer), Candidate::new("/uptime_s", integer)];

const COMPONENTS: &[Candidate<Vec<Value>>] = &[Candidate::new("/components", array), Candidate::new("", array)];

// =====================
// Record builders
// =====================

pub fn thermostat(id: u32, raw: Value) -> ThermostatState {
    let online = first_present(&raw, ONLINE).unwrap_or(true);
    ThermostatState {
        id,
        name: first_present(&raw, NAME).unwrap_or_else(|| default_thermostat_name(id)),
        group: first_present(&raw, GROUP),
        status: if online { STATUS_ONLINE } else { STATUS_OFFLINE }.to_string(),
        online,
        target_c: first_present(&raw, TARGET_C),
        current_c: first_present(&raw, CURRENT_C),
        battery: first_present(&raw, BATTERY),
        valve_position: first_present(&raw, VALVE_POSITION),
        humidity: first_present(&raw, HUMIDITY),
        mode: first_present(&raw, MODE),
        last_updated_ts: first_present(&raw, LAST_UPDATED),
        raw,
    }
}

pub fn script(raw: Value) -> ScriptState {
    let id = first_present(&raw, ID).unwrap_or_default();
    ScriptState {
        id,
        name: first_present(&raw, NAME).unwrap_or_else(|| format!("Script {}", id)),
        enabled: first_present(&raw, ENABLED).unwrap_or(false),
        running: first_present(&raw, RUNNING).unwrap_or(false),
        last_run_ts: first_present(&raw, LAST_RUN),
        raw,
    }
}

pub fn action(raw: Value) -> ActionState {
    let id = first_present(&raw, ID).unwrap_or_default();
    let event = first_present(&raw, EVENT);
    ActionState {
        id,
        name: first_present(&raw, NAME)
            .or_else(|| event.clone())
            .unwrap_or_else(|| format!("Action {}", id)),
        event,
        enabled: first_present(&raw, ENABLED).unwrap_or(false),
        urls: first_present(&raw, URLS).unwrap_or_default(),
        raw,
    }
}

pub fn schedule(raw: Value) -> ScheduleState {
    let id = first_present(&raw, ID).unwrap_or_default();
    ScheduleState {
        id,
        name: first_present(&raw, NAME).unwrap_or_else(|| format!("Schedule {}", id)),
        enabled: first_present(&raw, ENABLED).unwrap_or(false),
        timespec: first_present(&raw, TIMESPEC),
        calls: first_present(&raw, CALLS).unwrap_or_default(),
        next_run_ts: first_present(&raw, NEXT_RUN),
        raw,
    }
}

pub fn scripts(result: &Value) -> Vec<ScriptState> {
    first_present(result, SCRIPT_ITEMS)
        .unwrap_or_default()
        .into_iter()
        .map(script)
        .collect()
}

pub fn actions(result: &Value) -> Vec<ActionState> {
    first_present(result, ACTION_ITEMS)
        .unwrap_or_default()
        .into_iter()
        .map(action)
        .collect()
}

pub fn schedules(result: &Value) -> Vec<ScheduleState> {
    first_present(result, SCHEDULE_ITEMS)
        .unwrap_or_default()
        .into_iter()
        .map(schedule)
        .collect()
}

/// Merge the device-info reply with the optional system status (for uptime).
pub fn identity(host: &str, info: &Value, system: Option<&Value>) -> DeviceIdentity {
    let uptime = system
        .and_then(|s| first_present(s, UPTIME))
        .or_else(|| first_present(info, UPTIME))
        .and_then(|u| u64::try_from(u).ok());
    DeviceIdentity {
        name: first_present(info, IDENTITY_NAME),
        model: first_present(info, MODEL),
        firmware_id: first_present(info, FIRMWARE),
        mac: first_present(info, MAC),
        uptime_seconds: uptime,
        host: host.to_string(),
    }
}

/// Thermostat ids from a component listing (`blutrv:<id>` keys), sorted.
pub fn thermostat_ids(components: &Value) -> Vec<u32> {
    let mut ids: Vec<u32> = match components.pointer("/components") {
        Some(Value::Object(map)) => map.keys().filter_map(|k| parse_component_key(k)).collect(),
        _ => first_present(components, COMPONENTS)
            .unwrap_or_default()
            .iter()
            .filter_map(|c| c.get("key").and_then(Value::as_str).and_then(parse_component_key))
            .collect(),
    };
    ids.sort_unstable();
    ids.dedup();
    ids
}

fn parse_component_key(key: &str) -> Option<u32> {
    let (kind, id) = key.split_once(':')?;
    if kind.eq_ignore_ascii_case("blutrv") {
        id.parse().ok()
    } else {
        None
    }
}
