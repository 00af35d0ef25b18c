use tokio::process::Command;

/// Environment variables safe to pass through to child processes when the
/// policy does not name an explicit allowlist.
const BASELINE_ENV_VARS: &[&str] = &[
    "PATH",
    "HOME",
    "USER",
    "LANG",
    "LC_ALL",
    "TZ",
    "TERM",
    "RUST_LOG",
    "TMPDIR",
    "XDG_RUNTIME_DIR",
];

/// Compute the child environment: the intersection of the parent environment
/// and `allowed` minus `blocked`. An empty `allowed` list falls back to the
/// conservative baseline so children still get PATH and HOME.
pub fn filtered_env(allowed: &[String], blocked: &[String]) -> Vec<(String, String)> {
    let baseline: Vec<String>;
    let allowed: &[String] = if allowed.is_empty() {
        baseline = BASELINE_ENV_VARS.iter().map(|s| (*s).to_string()).collect();
        &baseline
    } else {
        allowed
    };

    std::env::vars()
        .filter(|(k, _)| allowed.iter().any(|a| a == k))
        .filter(|(k, _)| !blocked.iter().any(|b| b == k))
        .collect()
}

/// Create a `Command` with a scrubbed environment.
///
/// Calls `env_clear()` then copies only the filtered environment variables
/// from the current process. This prevents accidental leakage of API keys,
/// tokens, and other secrets to child processes.
pub fn scrubbed_command(program: &str, allowed: &[String], blocked: &[String]) -> Command {
    let mut cmd = Command::new(program);
    cmd.env_clear();
    for (key, val) in filtered_env(allowed, blocked) {
        cmd.env(key, val);
    }
    cmd
}
