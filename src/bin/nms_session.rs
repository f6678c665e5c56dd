//!
//! nms-session
//! -----------
//! Operator tool for the platform session client: log in (reusing a persisted token when one
//! exists), check or drop a session, issue one REST request, or run one text command.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::Method;
use tracing::info;

use netmgmt_session::command::ExecuteOptions;
use netmgmt_session::dispatch::RequestOptions;
use netmgmt_session::identity::{bootstrap_admin, Principal, TerminalPrompt};
use netmgmt_session::storage::{KeyValueStore, KvStore, Persistence};
use netmgmt_session::transport::HttpConnector;
use netmgmt_session::{logging, Client, ClientConfig, SessionManager};

fn print_usage(program: &str) {
    eprintln!(
        "Usage:\n  {program} [flags] login\n  {program} [flags] check\n  {program} [flags] logout\n  {program} [flags] request <METHOD> <path> [--json <body>] [--safe] [--ignore <status>]\n  {program} [flags] exec <command> [--terminal] [--in <file>] [--out <path>] [--timeout <secs>]\n\nFlags:\n  --config <file>     JSON config (default: $NMS_CONFIG, then built-in defaults)\n  --url <base>        Platform base URL (overrides config)\n  --user <u>          Username; without it administrator credentials are resolved\n                      from the credentials file, props file, NMS_USERNAME/NMS_PASSWORD or a prompt\n  --password <p>      Password for --user\n  -h, --help          Show this help"
    );
}

fn take_value(args: &[String], i: usize, flag: &str, program: &str) -> String {
    if i + 1 >= args.len() {
        eprintln!("{} requires a value", flag);
        print_usage(program);
        std::process::exit(2);
    }
    args[i + 1].clone()
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init("info");

    let mut args: Vec<String> = env::args().collect();
    let program = args.remove(0);

    let mut config_path: Option<String> = None;
    let mut base_url: Option<String> = None;
    let mut user: Option<String> = None;
    let mut password: Option<String> = None;
    let mut json_body: Option<String> = None;
    let mut safe = false;
    let mut ignore: Vec<u16> = Vec::new();
    let mut terminal = false;
    let mut input_file: Option<PathBuf> = None;
    let mut output_file: Option<PathBuf> = None;
    let mut timeout: Option<u64> = None;
    let mut positional: Vec<String> = Vec::new();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => { config_path = Some(take_value(&args, i, "--config", &program)); i += 2; continue; }
            "--url" => { base_url = Some(take_value(&args, i, "--url", &program)); i += 2; continue; }
            "--user" => { user = Some(take_value(&args, i, "--user", &program)); i += 2; continue; }
            "--password" => { password = Some(take_value(&args, i, "--password", &program)); i += 2; continue; }
            "--json" => { json_body = Some(take_value(&args, i, "--json", &program)); i += 2; continue; }
            "--ignore" => {
                let v = take_value(&args, i, "--ignore", &program);
                ignore.push(v.parse().with_context(|| format!("invalid status '{}'", v))?);
                i += 2; continue;
            }
            "--in" => { input_file = Some(take_value(&args, i, "--in", &program).into()); i += 2; continue; }
            "--out" => { output_file = Some(take_value(&args, i, "--out", &program).into()); i += 2; continue; }
            "--timeout" => {
                let v = take_value(&args, i, "--timeout", &program);
                timeout = Some(v.parse().with_context(|| format!("invalid timeout '{}'", v))?);
                i += 2; continue;
            }
            "--safe" => { safe = true; i += 1; continue; }
            "--terminal" => { terminal = true; i += 1; continue; }
            "-h" | "--help" => { print_usage(&program); return Ok(()); }
            other => { positional.push(other.to_string()); i += 1; }
        }
    }
    if positional.is_empty() {
        print_usage(&program);
        std::process::exit(2);
    }

    let mut cfg = match &config_path {
        Some(p) => ClientConfig::from_file(p)?,
        None => ClientConfig::load()?,
    };
    if let Some(u) = base_url { cfg.base_url = u; }
    info!(target: "netmgmt", "nms-session starting: base_url='{}', deployment={:?}", cfg.base_url, cfg.deployment);

    let store: Arc<dyn KeyValueStore> = match &cfg.store_dir {
        Some(dir) => Arc::new(KvStore::open(dir, "sessions").with_context(|| format!("opening store {}", dir.display()))?),
        None => Arc::new(KvStore::in_memory("sessions")),
    };
    let manager = Arc::new(SessionManager::new(cfg.clone(), Arc::new(HttpConnector::new(cfg.clone())), Persistence::new(store)));

    let principal = match (user, password) {
        (Some(u), Some(p)) => Principal::new(u).with_password(p, true),
        (Some(u), None) => Principal::new(u),
        (None, _) => bootstrap_admin(&manager, &TerminalPrompt).await?,
    };
    let client = Client::new(manager, principal)?;

    match positional[0].as_str() {
        "login" => {
            let s = client.open_session(false).await?;
            println!("session for {} opened at {}", s.username(), s.opened_at().to_rfc3339());
        }
        "check" => {
            let ok = client.is_session_established().await?;
            println!("{}", if ok { "established" } else { "not established" });
            if !ok { std::process::exit(1); }
        }
        "logout" => {
            client.remove_session().await;
            println!("session removed");
        }
        "request" => {
            let (Some(method), Some(path)) = (positional.get(1), positional.get(2)) else {
                bail!("request needs <METHOD> <path>");
            };
            let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes()).context("invalid HTTP method")?;
            let mut opts = RequestOptions::default().safe(safe);
            opts.ignore_statuses = ignore;
            if let Some(b) = json_body {
                opts = opts.json(serde_json::from_str(&b).context("--json is not valid JSON")?);
            }
            let resp = client.request(method, path, opts).await?;
            println!("{} {}", resp.status, resp.url);
            println!("{}", resp.text());
            if safe {
                for (key, rec) in client.telemetry().snapshot() {
                    println!("telemetry {} {}: passed={} failed={}", key.verb, key.path, rec.passed, rec.failed);
                }
            }
        }
        "exec" => {
            let Some(command) = positional.get(1) else { bail!("exec needs <command>"); };
            let opts = ExecuteOptions {
                on_terminal: terminal,
                timeout: timeout.map(Duration::from_secs),
                input_file,
                output_file,
            };
            let result = client.execute(command, opts).await;
            client.close_channel_and_file(None).await;
            let result = result?;
            println!("{}", result.text());
            for p in &result.downloaded {
                println!("downloaded {}", p.display());
            }
        }
        other => {
            eprintln!("unknown command '{}'", other);
            print_usage(&program);
            std::process::exit(2);
        }
    }
    Ok(())
}
