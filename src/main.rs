pub mod models {
    pub mod device;
    pub mod rpc;
}

pub mod client;
pub mod config;
pub mod digest;
pub mod error;
pub mod guard;
pub mod services {
    pub mod aggregate;
    pub mod layout;
    pub mod normalize;
    pub mod proxy;
    pub mod watch;
}

use crate::client::RpcClient;
use crate::config::Config;
use crate::guard::GuardedClient;
use crate::services::aggregate::{AggregateOptions, fetch_aggregated_status};
use crate::services::{proxy, watch};
use log::{error, info};
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq)]
enum Command {
    /// One aggregated snapshot, printed as JSON.
    Status,
    /// A snapshot every WATCH_INTERVAL_SECS, one JSON line each.
    Watch,
    /// A single allow-listed RPC.
    Call { method: String, params: Value },
    Methods,
    EnsurePanels { dashboard_id: String },
}

#[derive(Debug)]
struct Cli {
    env_file: Option<PathBuf>,
    command: Command,
}

fn parse_cli<I>(args: I) -> Result<Cli, String>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter();
    let mut env_file: Option<PathBuf> = None;
    let mut positional = Vec::new();

    while let Some(arg) = args.next() {
        let path = if arg == "--env-file" {
            Some(args.next().ok_or_else(|| "`--env-file` requires a path argument".to_string())?)
        } else {
            arg.strip_prefix("--env-file=").map(str::to_string)
        };
        match path {
            Some(p) if p.is_empty() => return Err("`--env-file` requires a path argument".to_string()),
            Some(_) if env_file.is_some() => return Err("`--env-file` provided more than once".to_string()),
            Some(p) => env_file = Some(PathBuf::from(p)),
            None if arg.starts_with("--") => return Err(format!("unrecognised argument: {}", arg)),
            None => positional.push(arg),
        }
    }

    let mut positional = positional.into_iter();
    let command = match positional.next().as_deref() {
        None | Some("status") => Command::Status,
        Some("watch") => Command::Watch,
        Some("methods") => Command::Methods,
        Some("call") => {
            let method = positional.next().ok_or_else(|| "`call` requires a method name".to_string())?;
            let params = match positional.next() {
                Some(raw) => serde_json::from_str(&raw).map_err(|e| format!("params must be JSON: {}", e))?,
                None => Value::Object(Default::default()),
            };
            Command::Call { method, params }
        }
        Some("ensure-panels") => Command::EnsurePanels {
            dashboard_id: positional
                .next()
                .ok_or_else(|| "`ensure-panels` requires a dashboard id".to_string())?,
        },
        Some(other) => return Err(format!("unknown command: {}", other)),
    };
    if let Some(extra) = positional.next() {
        return Err(format!("unexpected argument: {}", extra));
    }

    Ok(Cli { env_file, command })
}

fn print_json<T: Serialize>(value: &T) -> Result<(), String> {
    let text = serde_json::to_string_pretty(value).map_err(|e| format!("encoding output failed: {}", e))?;
    println!("{}", text);
    Ok(())
}

fn run(command: Command) -> Result<(), String> {
    let cfg = Config::from_env()?;
    info!(
        "Config loaded (host={}, auth={}, timeout={}s, devices={}, scripts={}, actions={}, schedules={})",
        cfg.connection.host,
        if cfg.connection.credentials().is_some() { "password" } else { "none" },
        cfg.connection.timeout.as_secs(),
        cfg.device_ids
            .as_ref()
            .map(|ids| format!("{:?}", ids))
            .unwrap_or_else(|| "discover".to_string()),
        cfg.include_scripts,
        cfg.include_actions,
        cfg.include_schedules
    );

    let client = GuardedClient::new(RpcClient::new(cfg.connection.clone()));
    let opts = AggregateOptions::from(&cfg);

    match command {
        Command::Status => {
            let snapshot = fetch_aggregated_status(&client, &opts);
            print_json(&snapshot)
        }
        Command::Watch => {
            info!("Starting watch loop: interval={}s", cfg.watch_interval.as_secs());
            watch::run_loop(&client, &opts, cfg.watch_interval, |snapshot| {
                let line = serde_json::to_string(snapshot).map_err(|e| format!("encoding snapshot failed: {}", e))?;
                println!("{}", line);
                Ok(())
            })
        }
        Command::Call { method, params } => {
            let body = serde_json::json!({ "method": method, "params": params });
            let out = proxy::handle_rpc(&client, body);
            print_json(&out)?;
            if out.get("error").is_some() {
                return Err(format!("{} failed", method));
            }
            Ok(())
        }
        Command::Methods => print_json(&proxy::list_methods()),
        Command::EnsurePanels { dashboard_id } => {
            let out = proxy::ensure_dashboard(&cfg.layout_dir, &dashboard_id);
            print_json(&out)?;
            match out.get("error") {
                Some(_) => Err(format!("ensuring panels on {} failed", dashboard_id)),
                None => Ok(()),
            }
        }
    }
}

fn main() {
    let cli = match parse_cli(std::env::args().skip(1)) {
        Ok(cli) => cli,
        Err(err) => {
            eprintln!("fatal: {}", err);
            eprintln!("usage: gateway-rpc [--env-file PATH] [status | watch | methods | call METHOD [PARAMS] | ensure-panels DASHBOARD]");
            std::process::exit(2);
        }
    };

    // Load .env before logging so RUST_LOG from the file is respected.
    let env_path = cli.env_file.clone().or_else(|| {
        let default_path = PathBuf::from(".env");
        default_path.is_file().then_some(default_path)
    });
    if let Some(path) = &env_path
        && let Err(err) = config::load_env_file(path)
    {
        eprintln!("fatal: {}", err);
        std::process::exit(1);
    }

    let default_filter = env_logger::Env::default().default_filter_or("info");
    env_logger::Builder::from_env(default_filter)
        .format_timestamp_secs()
        .init();

    if let Some(path) = &env_path {
        let origin = if cli.env_file.is_some() { "CLI-specified" } else { "default" };
        info!("Environment loaded from {} .env file: {}", origin, path.display());
    }
    info!(
        "gateway-rpc {} (git {}) starting",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME_GIT_HASH")
    );

    if let Err(e) = run(cli.command) {
        error!("fatal: {}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(args: &[&str]) -> Result<Cli, String> {
        parse_cli(args.iter().map(|s| s.to_string()))
    }

    #[test]
    fn default_command_is_status() {
        let cli = parse(&[]).unwrap();
        assert_eq!(cli.command, Command::Status);
        assert_eq!(cli.env_file, None);
    }

    #[test]
    fn parses_call_with_params_and_env_file() {
        let cli = parse(&["--env-file=/tmp/gw.env", "call", "Script.Start", r#"{"id":1}"#]).unwrap();
        assert_eq!(cli.env_file, Some(PathBuf::from("/tmp/gw.env")));
        assert_eq!(
            cli.command,
            Command::Call {
                method: "Script.Start".into(),
                params: json!({"id": 1})
            }
        );

        let cli = parse(&["ensure-panels", "main", "--env-file", "x.env"]).unwrap();
        assert_eq!(
            cli.command,
            Command::EnsurePanels {
                dashboard_id: "main".into()
            }
        );
    }

    #[test]
    fn rejects_bad_arguments() {
        assert!(parse(&["--env-file"]).is_err());
        assert!(parse(&["--env-file=a", "--env-file=b"]).is_err());
        assert!(parse(&["--verbose"]).is_err());
        assert!(parse(&["call"]).is_err());
        assert!(parse(&["call", "Sys.GetStatus", "{not json"]).is_err());
        assert!(parse(&["frobnicate"]).is_err());
        assert!(parse(&["methods", "extra"]).is_err());
    }
}
