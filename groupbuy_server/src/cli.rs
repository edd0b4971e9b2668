use std::env;

const HELP: &str = include_str!("./cli-help.txt");

/// Settings that are safe to echo back. Secrets are never in this list.
const VISIBLE_SETTINGS: [&str; 12] = [
    "RUST_LOG",
    "GBM_HOST",
    "GBM_PORT",
    "GBM_DATABASE_URL",
    "GBM_DB_MAX_CONNECTIONS",
    "GBM_LOCK_WAIT_MS",
    "GBM_CAMPAIGN_SWEEP_INTERVAL_SECS",
    "GBM_GATEWAY_API_URL",
    "GBM_GATEWAY_STORE_ID",
    "GBM_GATEWAY_PROVIDER",
    "GBM_WEBHOOK_TOLERANCE_SECS",
    "GBM_WEBHOOK_CHECKS",
];

/// The server takes no arguments. Any argument at all prints the help text and the current settings, and the caller
/// should exit.
pub fn handle_command_line_args() -> bool {
    if env::args_os().len() <= 1 {
        return false;
    }
    println!("\n{HELP}\n");
    println!("Current settings (secrets are not shown):");
    for name in VISIBLE_SETTINGS {
        println!("  {name:<35} {}", describe_setting(name));
    }
    true
}

fn describe_setting(name: &str) -> String {
    match env::var_os(name) {
        None => "Not set".to_string(),
        Some(value) => match value.into_string() {
            Ok(s) => s,
            Err(raw) => format!("Invalid value: {}", raw.to_string_lossy()),
        },
    }
}
