// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Signgate — trust-no-edge display gate
//
// Entry point. Initialises logging, loads the device config, brings up the
// edge services, and runs one command.

mod services;

use std::collections::BTreeMap;
use std::process::ExitCode;

use secrecy::SecretString;
use serde_json::{Map, json};
use signgate_core::error::{Result, SigngateError};
use signgate_core::{AlertTier, AuthMethod, GateConfig};
use signgate_display::DisplayResult;

use services::config_file::{load_config, persist_config};
use services::data_dir::data_dir;
use services::edge_services::EdgeServices;

const USAGE: &str = "usage: signgate <command>

commands:
  demo              run the display gate end to end on the console
  verify-chain      check the audit log hash chain
  audit-tail [N]    print the last N audit events (default 20)
  rotate-key [ID]   generate a new default signing key
  list-keys         print retained signing keys

environment:
  SIGNGATE_DEVICE_ID      device id (required on first run)
  SIGNGATE_KEY_PASSWORD   key store password (required)
  SIGNGATE_DATA_DIR       data directory override
  RUST_LOG                log filter (default: info)";

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        eprintln!("{USAGE}");
        return ExitCode::FAILURE;
    };
    if command == "-h" || command == "--help" || command == "help" {
        println!("{USAGE}");
        return ExitCode::SUCCESS;
    }

    match run(command, &args[1..]) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "signgate failed");
            eprintln!("signgate: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(command: &str, rest: &[String]) -> Result<ExitCode> {
    if !matches!(
        command,
        "demo" | "verify-chain" | "audit-tail" | "rotate-key" | "list-keys"
    ) {
        eprintln!("unknown command: {command}\n\n{USAGE}");
        return Ok(ExitCode::FAILURE);
    }

    let services = EdgeServices::init(load_or_create_config()?, key_password()?)?;
    tracing::info!(device_id = %services.config().device_id, command, "Signgate starting");

    let code = match command {
        "demo" => demo(&services)?,
        "verify-chain" => {
            let report = services.verify_audit_chain()?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if report.valid {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        "audit-tail" => {
            let count = match rest.first() {
                Some(n) => n
                    .parse()
                    .map_err(|_| SigngateError::Config(format!("invalid count: {n}")))?,
                None => 20,
            };
            for event in services.audit_tail(count)? {
                println!("{}", serde_json::to_string(&event)?);
            }
            ExitCode::SUCCESS
        }
        "rotate-key" => {
            let info = services.rotate_signing_key(rest.first().map(String::as_str))?;
            println!("{}", serde_json::to_string_pretty(&info)?);
            ExitCode::SUCCESS
        }
        _ => {
            for key in services.list_keys()? {
                println!("{}", serde_json::to_string(&key)?);
            }
            ExitCode::SUCCESS
        }
    };

    services.shutdown(&format!("{command} complete"))?;
    Ok(code)
}

/// Load `config.json` from the data directory, or create it from
/// `SIGNGATE_DEVICE_ID` on first run. The env var overrides a stored id.
fn load_or_create_config() -> Result<GateConfig> {
    let dir = data_dir().ok_or_else(|| {
        SigngateError::Config("cannot resolve a data directory; set SIGNGATE_DATA_DIR".into())
    })?;
    let device_id = std::env::var("SIGNGATE_DEVICE_ID")
        .ok()
        .filter(|id| !id.is_empty());

    match (load_config(&dir)?, device_id) {
        (Some(config), None) => Ok(config),
        (Some(mut config), Some(id)) => {
            if config.device_id != id {
                tracing::warn!(stored = %config.device_id, env = %id, "device id overridden");
                config.device_id = id;
                persist_config(&dir, &config)?;
            }
            Ok(config)
        }
        (None, Some(id)) => {
            let config = GateConfig::new(id, dir.clone());
            config.validate()?;
            persist_config(&dir, &config)?;
            Ok(config)
        }
        (None, None) => Err(SigngateError::Config(
            "no config.json found; set SIGNGATE_DEVICE_ID to create one".into(),
        )),
    }
}

fn key_password() -> Result<SecretString> {
    match std::env::var("SIGNGATE_KEY_PASSWORD") {
        Ok(p) if !p.is_empty() => Ok(SecretString::from(p)),
        _ => Err(SigngateError::Config("SIGNGATE_KEY_PASSWORD must be set".into())),
    }
}

fn report(step: &str, result: &DisplayResult) {
    match &result.error {
        None => println!("{step}: {:?}", result.state),
        Some(e) => println!("{step}: {:?} ({})", result.state, e.reason_code()),
    }
}

/// Walk one message through every stage of the gate.
fn demo(services: &EdgeServices) -> Result<ExitCode> {
    let tier = services.process_detection(
        "crowd",
        0.97,
        json!({ "camera": "cam-1", "count": 1200 }),
    )?;

    let text = BTreeMap::from([("en".to_owned(), "Crowd level: 1200 people".to_owned())]);
    let params = Map::from_iter([("count".to_owned(), json!(1200))]);
    let message = services.issue_message("crowd-count", tier, params, text, None, vec![])?;
    report("autonomous message", &services.display_signed_message(&message));
    if let Some(current) = services.current_message() {
        println!("showing: {}", current.message_id);
    }
    // Same message again, as it would arrive over the wire.
    report("replayed message", &services.display_signed_json(&message.to_json()?)?);

    let unapproved = services.display_message(
        "smoke-detected",
        AlertTier::Warning,
        Map::new(),
        BTreeMap::from([("en".to_owned(), "Smoke reported in hall B".to_owned())]),
        None,
        vec![],
    )?;
    report("warning without operator", &unapproved);

    let mut request =
        services.request_authorization(AlertTier::Warning, "smoke", json!({ "zone": "hall-b" }))?;
    request.add_authorization("demo-operator", AuthMethod::Dashboard);
    let approved = services.display_message(
        "smoke-detected",
        AlertTier::Warning,
        Map::new(),
        BTreeMap::from([("en".to_owned(), "Smoke reported in hall B".to_owned())]),
        None,
        request.into_authorizations(),
    )?;
    report("warning with operator", &approved);

    services.clear_display()?;

    let chain = services.verify_audit_chain()?;
    println!("audit chain: {}", serde_json::to_string(&chain)?);
    Ok(if chain.valid {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
