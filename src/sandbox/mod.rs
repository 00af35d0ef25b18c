mod backend;

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::AsyncReadExt;

use crate::config::SandboxPolicyConfig;
use crate::errors::AgentError;
use crate::utils::cancel::CancelToken;
use crate::utils::subprocess::filtered_env;

/// Declarative execution policy. Path entries must be absolute; command
/// lists match on the program basename.
#[derive(Debug, Clone)]
pub struct Policy {
    pub allow_read_paths: Vec<PathBuf>,
    pub allow_write_paths: Vec<PathBuf>,
    pub block_paths: Vec<PathBuf>,
    pub allow_network: bool,
    pub allowed_hosts: Vec<String>,
    pub max_processes: u32,
    pub max_memory_mb: u64,
    pub max_cpu_time: Duration,
    pub allowed_commands: Vec<String>,
    pub blocked_commands: Vec<String>,
    pub allowed_env_vars: Vec<String>,
    pub blocked_env_vars: Vec<String>,
}

impl Policy {
    pub fn from_config(cfg: &SandboxPolicyConfig) -> Self {
        Self {
            allow_read_paths: cfg.allow_read_paths.iter().map(PathBuf::from).collect(),
            allow_write_paths: cfg.allow_write_paths.iter().map(PathBuf::from).collect(),
            block_paths: cfg.block_paths.iter().map(PathBuf::from).collect(),
            allow_network: cfg.allow_network,
            allowed_hosts: cfg.allowed_hosts.clone(),
            max_processes: cfg.max_processes,
            max_memory_mb: cfg.max_memory_mb,
            max_cpu_time: Duration::from_secs(cfg.max_cpu_time_secs),
            allowed_commands: cfg.allowed_commands.clone(),
            blocked_commands: cfg.blocked_commands.clone(),
            allowed_env_vars: cfg.allowed_env_vars.clone(),
            blocked_env_vars: cfg.blocked_env_vars.clone(),
        }
    }

    /// Grant read (and optionally write) access to an additional directory.
    /// Used by the shell tool to admit the workspace and working directory.
    pub fn with_workspace(mut self, dir: &std::path::Path, writable: bool) -> Self {
        self.allow_read_paths.push(dir.to_path_buf());
        if writable {
            self.allow_write_paths.push(dir.to_path_buf());
        }
        self
    }
}

impl Default for Policy {
    /// The conservative default: read-only inspection commands, no network,
    /// 512 MB / 30 s caps, system directories blocked.
    fn default() -> Self {
        Policy::from_config(&SandboxPolicyConfig::default())
    }
}

/// What the active backend can actually enforce on this host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub platform: &'static str,
    pub fs_isolation: bool,
    pub net_isolation: bool,
    pub process_isolation: bool,
    pub memory_limits: bool,
    pub cpu_limits: bool,
    pub command_filtering: bool,
}

/// Outcome of one sandboxed execution. `error` is set for timeouts and
/// cancellation; partial stdout/stderr captured before the kill is kept.
#[derive(Debug)]
pub struct ExecutionResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    pub memory_used: Option<u64>,
    pub error: Option<AgentError>,
}

/// Platform-aware command executor. Stateless between calls; backend
/// selection happens per `execute` via compile-time platform dispatch.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sandbox;

impl Sandbox {
    pub fn new() -> Self {
        Sandbox
    }

    pub fn capabilities(&self) -> Capabilities {
        let isolated = backend::is_available();
        Capabilities {
            platform: std::env::consts::OS,
            fs_isolation: isolated,
            net_isolation: isolated,
            process_isolation: false,
            memory_limits: cfg!(unix),
            cpu_limits: cfg!(unix),
            command_filtering: true,
        }
    }

    pub fn default_policy() -> Policy {
        Policy::default()
    }

    pub fn validate_policy(policy: &Policy) -> Result<(), AgentError> {
        for path in policy
            .allow_read_paths
            .iter()
            .chain(policy.allow_write_paths.iter())
            .chain(policy.block_paths.iter())
        {
            if !path.is_absolute() {
                return Err(AgentError::PolicyViolation(format!(
                    "sandbox path '{}' must be absolute",
                    path.display()
                )));
            }
        }
        if policy.max_cpu_time.is_zero() {
            return Err(AgentError::PolicyViolation(
                "max_cpu_time must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Basename-matched command filter: blocked list wins, then a non-empty
    /// allowed list is authoritative.
    pub fn validate_command(program: &str, policy: &Policy) -> Result<(), AgentError> {
        let trimmed = program.trim();
        if trimmed.is_empty() {
            return Err(AgentError::InvalidArgs("empty command".into()));
        }
        let basename = trimmed.rsplit('/').next().unwrap_or(trimmed);

        if policy.blocked_commands.iter().any(|b| b == basename) {
            return Err(AgentError::PolicyViolation(format!(
                "command '{}' is blocked by policy",
                basename
            )));
        }
        if !policy.allowed_commands.is_empty()
            && !policy.allowed_commands.iter().any(|a| a == basename)
        {
            return Err(AgentError::PolicyViolation(format!(
                "command '{}' is not in the allowed commands list",
                basename
            )));
        }
        Ok(())
    }

    /// Run `program args...` under the platform backend.
    ///
    /// The wall-clock budget is `min(deadline, policy.max_cpu_time)`; on
    /// expiry or cancellation the child is killed and partial output kept.
    pub async fn execute(
        &self,
        cancel: &CancelToken,
        program: &str,
        args: &[String],
        policy: &Policy,
        cwd: Option<&std::path::Path>,
        deadline: Option<Duration>,
    ) -> Result<ExecutionResult, AgentError> {
        Self::validate_policy(policy)?;
        Self::validate_command(program, policy)?;

        let budget = match deadline {
            Some(d) => d.min(policy.max_cpu_time),
            None => policy.max_cpu_time,
        };

        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args)
            .env_clear()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        // Own process group so a kill reaches grandchildren too (a killed
        // `sh` must not leave its children holding the output pipes open).
        #[cfg(unix)]
        cmd.process_group(0);
        for (key, val) in filtered_env(&policy.allowed_env_vars, &policy.blocked_env_vars) {
            cmd.env(key, val);
        }

        backend::apply_isolation(&mut cmd, policy)
            .map_err(|e| AgentError::Sandbox(format!("failed to apply isolation: {}", e)))?;

        let start = Instant::now();
        let mut child = cmd
            .spawn()
            .map_err(|e| AgentError::Sandbox(format!("failed to spawn '{}': {}", program, e)))?;

        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();
        let stdout_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(pipe) = stdout_pipe.as_mut() {
                let _ = pipe.read_to_end(&mut buf).await;
            }
            buf
        });
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(pipe) = stderr_pipe.as_mut() {
                let _ = pipe.read_to_end(&mut buf).await;
            }
            buf
        });

        let mut error = None;
        let exit_code = tokio::select! {
            status = child.wait() => match status {
                Ok(status) => status.code().unwrap_or(-1),
                Err(e) => {
                    error = Some(AgentError::Sandbox(format!("wait failed: {}", e)));
                    -1
                }
            },
            () = tokio::time::sleep(budget) => {
                tracing::warn!("command '{}' exceeded {}s budget, killing", program, budget.as_secs());
                kill_process_group(&mut child);
                let _ = child.wait().await;
                error = Some(AgentError::Timeout(budget));
                -1
            }
            () = cancel.cancelled() => {
                tracing::debug!("command '{}' cancelled, killing", program);
                kill_process_group(&mut child);
                let _ = child.wait().await;
                error = Some(AgentError::Cancelled);
                -1
            }
        };

        // The group kill closes every pipe writer, so the reader tasks end
        // promptly; the grace timeout covers a double-forked straggler that
        // escaped the group.
        let grace = Duration::from_secs(5);
        let stdout = tokio::time::timeout(grace, stdout_task)
            .await
            .map(|r| r.unwrap_or_default())
            .unwrap_or_default();
        let stderr = tokio::time::timeout(grace, stderr_task)
            .await
            .map(|r| r.unwrap_or_default())
            .unwrap_or_default();

        Ok(ExecutionResult {
            exit_code,
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            duration: start.elapsed(),
            memory_used: backend::peak_child_memory(),
            error,
        })
    }
}

/// Kill the child's whole process group (falling back to the child alone).
fn kill_process_group(child: &mut tokio::process::Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // SAFETY: signalling a process group we created; worst case ESRCH.
        unsafe {
            libc::kill(-(pid as i32), libc::SIGKILL);
        }
        return;
    }
    let _ = child.start_kill();
}
