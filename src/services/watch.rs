use log::{info, warn};
use std::thread;
use std::time::{Duration, Instant};

use crate::guard::GuardedClient;
use crate::models::device::{AggregatedDeviceData, STATUS_ONLINE};
use crate::services::aggregate::{AggregateOptions, fetch_aggregated_status};

/// Take a fresh snapshot every `interval` and hand it to `sink`. Each
/// snapshot replaces the previous one; nothing is cached between rounds.
/// Returns when `sink` fails.
pub fn run_loop<F>(client: &GuardedClient, opts: &AggregateOptions, interval: Duration, mut sink: F) -> Result<(), String>
where
    F: FnMut(&AggregatedDeviceData) -> Result<(), String>,
{
    let mut last_auth_error: Option<String> = None;
    loop {
        let tick_start = Instant::now();

        let snapshot = fetch_aggregated_status(client, opts);
        if snapshot.auth_error != last_auth_error {
            match &snapshot.auth_error {
                Some(msg) => warn!("{}", msg),
                None => info!("Controller accepted credentials again"),
            }
            last_auth_error = snapshot.auth_error.clone();
        }
        info!("{}", summarize(&snapshot));
        sink(&snapshot)?;

        // Maintain steady cadence
        let elapsed = tick_start.elapsed();
        if elapsed < interval {
            thread::sleep(interval - elapsed);
        }
    }
}

pub fn summarize(data: &AggregatedDeviceData) -> String {
    let online = data.thermostats.iter().filter(|t| t.status == STATUS_ONLINE).count();
    let name = data
        .controller
        .as_ref()
        .and_then(|c| c.name.as_deref())
        .unwrap_or("unknown controller");
    format!(
        "{} ({}): thermostats {}/{} online, {} script(s), {} action(s), {} schedule(s)",
        name,
        data.controller_url,
        online,
        data.thermostats.len(),
        data.scripts.len(),
        data.actions.len(),
        data.schedules.len()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::RpcClient;
    use crate::client::testing::{FakeTransport, reply, result};
    use crate::config::ConnectionOptions;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn stops_when_sink_fails() {
        let transport = Arc::new(FakeTransport::new(|call| match call.method() {
            "Shelly.GetDeviceInfo" => result(call, json!({"name": "Hallway gateway"})),
            "BluTrv.GetStatus" => result(call, json!({"target_C": 21})),
            _ => reply(500, json!({})),
        }));
        let client = GuardedClient::new(RpcClient::with_transport(ConnectionOptions::new(None), transport.clone()));
        let opts = AggregateOptions {
            device_ids: Some(vec![200]),
            ..AggregateOptions::default()
        };

        let mut summaries = Vec::new();
        let outcome = run_loop(&client, &opts, Duration::from_millis(1), |snapshot| {
            summaries.push(summarize(snapshot));
            if summaries.len() == 2 { Err("done".to_string()) } else { Ok(()) }
        });

        assert_eq!(outcome, Err("done".to_string()));
        assert_eq!(summaries.len(), 2);
        assert_eq!(
            summaries[0],
            "Hallway gateway (http://192.168.33.1): thermostats 1/1 online, 0 script(s), 0 action(s), 0 schedule(s)"
        );
    }
}
