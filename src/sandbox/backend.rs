//! Platform isolation backends.
//!
//! Linux uses Landlock LSM rules installed in `pre_exec`; macOS uses
//! Seatbelt (`sandbox_init`) with a generated SBPL profile; other platforms
//! get command/env filtering and timeouts only. Resource caps are applied
//! via `setrlimit` on all unix targets.

use crate::sandbox::Policy;

/// Check whether OS-level filesystem isolation is available on this host.
#[cfg(target_os = "linux")]
pub fn is_available() -> bool {
    use landlock::{ABI, Access, AccessFs, CompatLevel, Compatible, Ruleset, RulesetAttr};

    // Probe by creating (not installing) a minimal ruleset. HardRequirement
    // makes creation fail on kernels without Landlock instead of silently
    // degrading, and nothing is restricted in this process.
    Ruleset::default()
        .set_compatibility(CompatLevel::HardRequirement)
        .handle_access(AccessFs::from_all(ABI::V1))
        .and_then(landlock::Ruleset::create)
        .is_ok()
}

/// Seatbelt has been available since macOS 10.5; all Rust-supported macOS
/// versions include it.
#[cfg(target_os = "macos")]
pub fn is_available() -> bool {
    true
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub fn is_available() -> bool {
    false
}

/// Apply resource limits (memory, CPU time, process count) in the child.
#[cfg(unix)]
fn apply_rlimits(cmd: &mut tokio::process::Command, policy: &Policy) {
    let memory_bytes = policy.max_memory_mb.saturating_mul(1024 * 1024);
    let cpu_secs = policy.max_cpu_time.as_secs().max(1);
    let max_procs = libc::rlim_t::from(policy.max_processes);

    let rl = |value: libc::rlim_t| libc::rlimit {
        rlim_cur: value,
        rlim_max: value,
    };

    // SAFETY: pre_exec runs between fork() and exec() in the child process.
    // setrlimit is async-signal-safe; no allocation happens here.
    unsafe {
        cmd.pre_exec(move || {
            // SAFETY: plain syscalls on stack-local data.
            unsafe {
                if memory_bytes > 0
                    && libc::setrlimit(libc::RLIMIT_AS, &rl(memory_bytes)) != 0
                {
                    return Err(std::io::Error::last_os_error());
                }
                if libc::setrlimit(libc::RLIMIT_CPU, &rl(cpu_secs)) != 0 {
                    return Err(std::io::Error::last_os_error());
                }
                if max_procs > 0 && libc::setrlimit(libc::RLIMIT_NPROC, &rl(max_procs)) != 0 {
                    return Err(std::io::Error::last_os_error());
                }
            }
            Ok(())
        });
    }
}

/// Peak resident set size of reaped children, in bytes.
#[cfg(unix)]
pub fn peak_child_memory() -> Option<u64> {
    // SAFETY: getrusage with a zeroed out-param is always safe to call.
    unsafe {
        let mut usage: libc::rusage = std::mem::zeroed();
        if libc::getrusage(libc::RUSAGE_CHILDREN, &raw mut usage) != 0 {
            return None;
        }
        // ru_maxrss is kilobytes on Linux, bytes on macOS.
        #[cfg(target_os = "macos")]
        let bytes = usage.ru_maxrss as u64;
        #[cfg(not(target_os = "macos"))]
        let bytes = (usage.ru_maxrss as u64).saturating_mul(1024);
        Some(bytes)
    }
}

#[cfg(not(unix))]
pub fn peak_child_memory() -> Option<u64> {
    None
}

/// System directories every child needs readable for exec and dynamic
/// linking, granted read-only in addition to the policy's own entries.
const BASELINE_READ_PATHS: &[&str] = &["/usr", "/lib", "/lib64", "/bin", "/sbin", "/etc"];

/// Scratch directories granted read-write in addition to the policy's own.
const BASELINE_WRITE_PATHS: &[&str] = &["/tmp", "/var/tmp"];

#[cfg(target_os = "linux")]
pub fn apply_isolation(cmd: &mut tokio::process::Command, policy: &Policy) -> anyhow::Result<()> {
    use landlock::{
        ABI, Access, AccessFs, AccessNet, PathBeneath, PathFd, Ruleset, RulesetAttr,
        RulesetCreatedAttr,
    };

    apply_rlimits(cmd, policy);

    if !is_available() {
        // Kernel without Landlock: filtering and rlimits still apply, and
        // capabilities() reports fs_isolation=false so callers can degrade.
        return Ok(());
    }

    let abi = ABI::V5;

    // Clone data for the pre_exec closure (which is FnMut + 'static)
    let read_only: Vec<String> = BASELINE_READ_PATHS
        .iter()
        .map(|s| (*s).to_string())
        .chain(
            policy
                .allow_read_paths
                .iter()
                .map(|p| p.to_string_lossy().into_owned()),
        )
        .collect();
    let read_write: Vec<String> = BASELINE_WRITE_PATHS
        .iter()
        .map(|s| (*s).to_string())
        .chain(
            policy
                .allow_write_paths
                .iter()
                .map(|p| p.to_string_lossy().into_owned()),
        )
        .collect();
    let block_network = !policy.allow_network;

    // SAFETY: pre_exec runs between fork() and exec() in the child process.
    // We only call Landlock syscalls here — no async, no allocations that
    // could deadlock. The landlock crate's restrict_self() is safe in this
    // context.
    unsafe {
        cmd.pre_exec(move || {
            let read_access = AccessFs::from_read(abi);
            let full_access = AccessFs::from_all(abi);

            let mut ruleset = Ruleset::default()
                .handle_access(full_access)
                .map_err(|e| std::io::Error::other(e.to_string()))?;

            if block_network {
                ruleset = ruleset
                    .handle_access(AccessNet::from_all(abi))
                    .map_err(|e| std::io::Error::other(e.to_string()))?;
            }

            let mut created = ruleset
                .create()
                .map_err(|e| std::io::Error::other(e.to_string()))?;

            for path_str in &read_only {
                let path = std::path::Path::new(path_str);
                if path.exists()
                    && let Ok(fd) = PathFd::new(path)
                {
                    let rule = PathBeneath::new(fd, read_access);
                    created = created
                        .add_rule(rule)
                        .map_err(|e| std::io::Error::other(e.to_string()))?;
                }
            }

            for path_str in &read_write {
                let path = std::path::Path::new(path_str);
                if path.exists()
                    && let Ok(fd) = PathFd::new(path)
                {
                    let rule = PathBeneath::new(fd, full_access);
                    created = created
                        .add_rule(rule)
                        .map_err(|e| std::io::Error::other(e.to_string()))?;
                }
            }

            // No network port rules = all TCP connections blocked
            // (only applies when block_network is true and AccessNet is handled)

            created
                .restrict_self()
                .map_err(|e| std::io::Error::other(e.to_string()))?;

            Ok(())
        });
    }

    Ok(())
}

/// Build a macOS Seatbelt (SBPL) profile string from the policy.
#[cfg(target_os = "macos")]
fn build_seatbelt_profile(policy: &Policy) -> String {
    use std::fmt::Write;

    let mut p = String::with_capacity(1024);
    p.push_str("(version 1)\n(deny default)\n");

    // Process and IPC operations required for child process execution
    p.push_str("(allow process-exec)\n");
    p.push_str("(allow process-fork)\n");
    p.push_str("(allow signal)\n");
    p.push_str("(allow sysctl-read)\n");
    p.push_str("(allow mach-lookup)\n");
    p.push_str("(allow process-info* (target self))\n");

    // Device nodes needed by most processes
    p.push_str("(allow file-read* (subpath \"/dev\"))\n");
    p.push_str("(allow file-write-data (literal \"/dev/null\"))\n");
    p.push_str("(allow file-ioctl (literal \"/dev/null\"))\n");

    // Path traversal: stat() on any path for directory resolution
    // (safe — only exposes file existence/metadata, not contents)
    p.push_str("(allow file-read-metadata)\n");

    // POSIX shared memory needed by dyld for the shared cache
    p.push_str("(allow ipc-posix-shm-read-data)\n");
    p.push_str("(allow ipc-posix-shm-read-metadata)\n");

    // System libraries and frameworks every binary links against
    for sys_path in BASELINE_READ_PATHS.iter().copied().chain([
        "/System",
        "/Library",
        "/private/etc",
        "/private/var/db",
        "/opt/homebrew",
        "/usr/local",
    ]) {
        let _ = writeln!(p, "(allow file-read* (subpath \"{sys_path}\"))");
    }

    for path in &policy.allow_read_paths {
        let escaped = escape_sbpl(&path.to_string_lossy());
        let _ = writeln!(p, "(allow file-read* (subpath \"{escaped}\"))");
    }

    for path in &policy.allow_write_paths {
        let escaped = escape_sbpl(&path.to_string_lossy());
        let _ = writeln!(p, "(allow file-read* file-write* (subpath \"{escaped}\"))");
    }

    // Scratch space, plus the /private targets of the /tmp and /var symlinks
    for rw_path in BASELINE_WRITE_PATHS
        .iter()
        .copied()
        .chain(["/private/tmp", "/private/var/tmp", "/private/var/folders"])
    {
        let _ = writeln!(p, "(allow file-read* file-write* (subpath \"{rw_path}\"))");
    }

    if policy.allow_network {
        p.push_str("(allow network*)\n");
    }

    p
}

#[cfg(target_os = "macos")]
fn escape_sbpl(path: &str) -> String {
    path.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(target_os = "macos")]
pub fn apply_isolation(cmd: &mut tokio::process::Command, policy: &Policy) -> anyhow::Result<()> {
    use std::ffi::{CStr, CString};
    use std::os::raw::{c_char, c_int};

    unsafe extern "C" {
        fn sandbox_init(profile: *const c_char, flags: u64, errorbuf: *mut *mut c_char) -> c_int;
        fn sandbox_free_error(errorbuf: *mut c_char);
    }

    apply_rlimits(cmd, policy);

    let profile = build_seatbelt_profile(policy);
    let profile_cstr =
        CString::new(profile).map_err(|e| anyhow::anyhow!("invalid seatbelt profile: {e}"))?;

    // SAFETY: pre_exec runs between fork() and exec() in the child process.
    // sandbox_init() applies Seatbelt restrictions to the calling (child)
    // process. No async, no allocations that could deadlock in the success
    // path.
    unsafe {
        cmd.pre_exec(move || {
            let mut err: *mut c_char = std::ptr::null_mut();
            // SAFETY: profile_cstr outlives the call; err is an out-param
            // owned by sandbox_init and released via sandbox_free_error.
            let result = unsafe { sandbox_init(profile_cstr.as_ptr(), 0, &raw mut err) };
            if result != 0 {
                let msg = if err.is_null() {
                    "unknown error".to_string()
                } else {
                    // SAFETY: non-null err points at a NUL-terminated string.
                    let s = unsafe { CStr::from_ptr(err).to_string_lossy().into_owned() };
                    unsafe { sandbox_free_error(err) };
                    s
                };
                return Err(std::io::Error::other(format!("sandbox_init failed: {msg}")));
            }
            Ok(())
        });
    }

    Ok(())
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub fn apply_isolation(cmd: &mut tokio::process::Command, policy: &Policy) -> anyhow::Result<()> {
    #[cfg(unix)]
    apply_rlimits(cmd, policy);
    #[cfg(not(unix))]
    let _ = (cmd, policy);
    Ok(())
}
