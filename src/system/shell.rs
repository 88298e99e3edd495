// src/system/shell.rs

use crate::{
    constants::VERSION_PROBE_TIMEOUT_MS,
    models::{Config, ShellDescriptor, ShellType},
};
use std::{
    env, fmt,
    path::{Path, PathBuf},
    process::Stdio,
    sync::{Mutex, PoisonError},
    time::Duration,
};
use thiserror::Error;
use tokio::{process::Command, task::JoinSet};

#[derive(Error, Debug)]
pub enum ShellError {
    #[error("Shell '{0}' is not available on this host.")]
    Unavailable(ShellType),
    #[error("Unknown shell '{0}'. Expected one of: cmd, powershell, pwsh, bash, sh, zsh.")]
    UnknownShell(String),
    #[error("Could not determine a default shell for this operating system.")]
    NoDefaultShell,
}

// --- Dialects (one quoting/invocation strategy per shell family) ---

/// Quoting and invocation rules of one shell family.
///
/// `escape` yields a token that the shell reads back as exactly the original
/// string. `escape_body` and `quote` are its two halves, so callers that build
/// tokens piecewise can escape first and wrap later.
pub trait ShellDialect: Send + Sync + fmt::Debug {
    /// Escapes the characters that would break out of the shell's outer quotes.
    fn escape_body(&self, raw: &str) -> String;

    /// Wraps an already-escaped body in the shell's outer quoting convention.
    fn quote(&self, body: &str) -> String;

    /// Produces a literal-safe token for `raw`.
    fn escape(&self, raw: &str) -> String {
        self.quote(&self.escape_body(raw))
    }

    /// Builds the process invocation that runs `command` through the shell at `program`.
    fn invoke(&self, program: &Path, command: &str) -> Command;
}

/// `bash`, `sh` and `zsh`: single quotes, with embedded quotes closed, escaped and reopened.
#[derive(Debug)]
struct PosixDialect;

impl ShellDialect for PosixDialect {
    fn escape_body(&self, raw: &str) -> String {
        raw.replace('\'', "'\\''")
    }

    fn quote(&self, body: &str) -> String {
        format!("'{body}'")
    }

    fn invoke(&self, program: &Path, command: &str) -> Command {
        let mut cmd = Command::new(program);
        cmd.arg("-c").arg(command);
        cmd
    }
}

/// `cmd.exe`: one double-quoted argument.
///
/// Inside the quotes cmd leaves `& | < > ( ) ^` alone. Embedded quotes are
/// doubled, and `%` steps out of the quotes behind a caret so it is never
/// expanded. Newlines have no cmd spelling and pass through unchanged.
#[derive(Debug)]
struct CmdDialect;

impl ShellDialect for CmdDialect {
    fn escape_body(&self, raw: &str) -> String {
        let mut escaped = String::with_capacity(raw.len() + 8);
        for c in raw.chars() {
            match c {
                '"' => escaped.push_str("\"\""),
                '%' => escaped.push_str("\"^%\""),
                _ => escaped.push(c),
            }
        }
        escaped
    }

    fn quote(&self, body: &str) -> String {
        format!("\"{body}\"")
    }

    fn invoke(&self, program: &Path, command: &str) -> Command {
        let mut cmd = Command::new(program);
        cmd.args(["/D", "/S", "/C"]);
        // `/S` strips exactly one pair of outer quotes and runs the rest verbatim.
        #[cfg(windows)]
        cmd.raw_arg(format!("\"{command}\""));
        #[cfg(not(windows))]
        cmd.arg(command);
        cmd
    }
}

/// `powershell` and `pwsh`: single-quoted literals.
///
/// Backticks are literal inside single quotes; only the quote characters
/// (ASCII and the typographic ones PowerShell also accepts) need doubling.
#[derive(Debug)]
struct PowerShellDialect {
    legacy: bool,
}

const POWERSHELL_QUOTES: &[char] = &['\'', '\u{2018}', '\u{2019}', '\u{201A}', '\u{201B}'];

const POWERSHELL_UTF8_PRELUDE: &str =
    "[Console]::OutputEncoding = [System.Text.Encoding]::UTF8; $OutputEncoding = [System.Text.Encoding]::UTF8;";

impl ShellDialect for PowerShellDialect {
    fn escape_body(&self, raw: &str) -> String {
        let mut escaped = String::with_capacity(raw.len() + 8);
        for c in raw.chars() {
            if POWERSHELL_QUOTES.contains(&c) {
                escaped.push(c);
            }
            escaped.push(c);
        }
        escaped
    }

    fn quote(&self, body: &str) -> String {
        format!("'{body}'")
    }

    fn invoke(&self, program: &Path, command: &str) -> Command {
        let mut cmd = Command::new(program);
        cmd.args(["-NoProfile", "-NonInteractive"]);
        if self.legacy {
            cmd.args(["-ExecutionPolicy", "Bypass"]);
        }
        cmd.arg("-Command")
            .arg(format!("{POWERSHELL_UTF8_PRELUDE} {command}"));
        cmd
    }
}

static POSIX: PosixDialect = PosixDialect;
static CMD: CmdDialect = CmdDialect;
static WINDOWS_POWERSHELL: PowerShellDialect = PowerShellDialect { legacy: true };
static PWSH: PowerShellDialect = PowerShellDialect { legacy: false };

impl ShellType {
    /// The quoting/invocation strategy of this shell.
    pub fn dialect(self) -> &'static dyn ShellDialect {
        match self {
            Self::Bash | Self::Sh | Self::Zsh => &POSIX,
            Self::Cmd => &CMD,
            Self::PowerShell => &WINDOWS_POWERSHELL,
            Self::Pwsh => &PWSH,
        }
    }

    /// Executable names searched in `PATH`.
    fn binary_names(self) -> &'static [&'static str] {
        match self {
            Self::Cmd => &["cmd.exe", "cmd"],
            Self::PowerShell => &["powershell.exe", "powershell"],
            Self::Pwsh => &["pwsh.exe", "pwsh"],
            Self::Bash => &["bash"],
            Self::Sh => &["sh"],
            Self::Zsh => &["zsh"],
        }
    }

    /// Locations checked when the binary is not in `PATH`.
    fn well_known_paths(self) -> Vec<PathBuf> {
        let system_root = env::var_os("SystemRoot").map(PathBuf::from);
        match self {
            Self::Cmd => system_root
                .map(|root| root.join("System32").join("cmd.exe"))
                .into_iter()
                .collect(),
            Self::PowerShell => system_root
                .map(|root| {
                    root.join("System32")
                        .join("WindowsPowerShell")
                        .join("v1.0")
                        .join("powershell.exe")
                })
                .into_iter()
                .collect(),
            Self::Pwsh => [
                "/usr/bin/pwsh",
                "/usr/local/bin/pwsh",
                "/opt/microsoft/powershell/7/pwsh",
                "/opt/homebrew/bin/pwsh",
                r"C:\Program Files\PowerShell\7\pwsh.exe",
            ]
            .iter()
            .map(PathBuf::from)
            .collect(),
            Self::Bash => [
                "/bin/bash",
                "/usr/bin/bash",
                "/usr/local/bin/bash",
                "/opt/homebrew/bin/bash",
                r"C:\Program Files\Git\bin\bash.exe",
            ]
            .iter()
            .map(PathBuf::from)
            .collect(),
            Self::Sh => ["/bin/sh", "/usr/bin/sh"].iter().map(PathBuf::from).collect(),
            Self::Zsh => [
                "/bin/zsh",
                "/usr/bin/zsh",
                "/usr/local/bin/zsh",
                "/opt/homebrew/bin/zsh",
            ]
            .iter()
            .map(PathBuf::from)
            .collect(),
        }
    }

    /// Arguments that make the shell print its version, if it has such a query.
    fn version_args(self) -> Option<&'static [&'static str]> {
        match self {
            Self::Bash | Self::Zsh | Self::Pwsh => Some(&["--version"]),
            Self::PowerShell => Some(&[
                "-NoProfile",
                "-NonInteractive",
                "-Command",
                "$PSVersionTable.PSVersion.ToString()",
            ]),
            Self::Cmd => Some(&["/D", "/C", "ver"]),
            // dash and busybox sh have no version flag.
            Self::Sh => None,
        }
    }
}

/// Escapes `raw` into a literal-safe token for `shell`.
pub fn escape(raw: &str, shell: ShellType) -> String {
    shell.dialect().escape(raw)
}

/// Wraps an already-escaped body in `shell`'s outer quotes.
pub fn quote(body: &str, shell: ShellType) -> String {
    shell.dialect().quote(body)
}

/// Escapes the inside of a token for `shell` without adding the outer quotes.
pub fn escape_body(raw: &str, shell: ShellType) -> String {
    shell.dialect().escape_body(raw)
}

/// Builds the invocation for `command` through the shell described by `descriptor`.
pub fn command_for(descriptor: &ShellDescriptor, command: &str) -> Command {
    let program = descriptor
        .path
        .clone()
        .unwrap_or_else(|| PathBuf::from(descriptor.shell.name()));
    descriptor.shell.dialect().invoke(&program, command)
}

// --- Detection ---

/// The platform's default-shell preference order.
pub fn platform_preference(windows: bool) -> &'static [ShellType] {
    if windows {
        &[ShellType::Pwsh, ShellType::PowerShell, ShellType::Cmd]
    } else {
        &[ShellType::Bash, ShellType::Sh]
    }
}

/// The shell chosen for a call, plus the warning recorded if the preferred one was skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellChoice {
    pub shell: ShellType,
    pub warning: Option<String>,
}

/// Picks the default shell from probed descriptors.
///
/// The preferred shell wins when available. Otherwise the first available
/// shell of the platform order is used and a warning explains the fallback.
pub fn select_default(
    shells: &[ShellDescriptor],
    preferred: Option<ShellType>,
    windows: bool,
) -> Result<ShellChoice, ShellError> {
    let is_available = |shell: ShellType| {
        shells
            .iter()
            .any(|descriptor| descriptor.shell == shell && descriptor.available)
    };

    if let Some(preferred) = preferred {
        if is_available(preferred) {
            return Ok(ShellChoice {
                shell: preferred,
                warning: None,
            });
        }
    }

    let fallback = platform_preference(windows)
        .iter()
        .copied()
        .find(|shell| is_available(*shell))
        .ok_or(ShellError::NoDefaultShell)?;

    let warning = preferred.map(|preferred| {
        format!(
            "Preferred shell '{}' is not available; falling back to '{}'.",
            preferred, fallback
        )
    });
    Ok(ShellChoice {
        shell: fallback,
        warning,
    })
}

/// Finds the binary of `shell` in `PATH` or at its well-known locations.
fn locate(shell: ShellType) -> Option<PathBuf> {
    shell
        .binary_names()
        .iter()
        .find_map(|name| which::which(name).ok())
        .or_else(|| {
            shell
                .well_known_paths()
                .into_iter()
                .find(|path| path.is_file())
        })
        .map(|path| dunce::simplified(&path).to_path_buf())
}

async fn query_version(shell: ShellType, path: &Path) -> Option<String> {
    let args = shell.version_args()?;
    let mut cmd = Command::new(path);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let output = tokio::time::timeout(
        Duration::from_millis(VERSION_PROBE_TIMEOUT_MS),
        cmd.output(),
    )
    .await
    .ok()?
    .ok()?;

    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

async fn probe(shell: ShellType) -> ShellDescriptor {
    let Some(path) = locate(shell) else {
        log::debug!("Shell '{}' not found on this host.", shell);
        return ShellDescriptor::unavailable(shell);
    };
    let version = query_version(shell, &path).await;
    log::debug!(
        "Detected shell '{}' at '{}' (version: {:?})",
        shell,
        path.display(),
        version
    );
    ShellDescriptor {
        shell,
        path: Some(path),
        version,
        available: true,
    }
}

/// Detects installed shells and caches the result for the lifetime of the resolver.
#[derive(Debug, Default)]
pub struct ShellResolver {
    cache: Mutex<Option<Vec<ShellDescriptor>>>,
}

impl ShellResolver {
    /// Creates a resolver with an empty cache; the first query probes the host.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a resolver whose cache is pre-seeded with `descriptors`.
    pub fn with_descriptors(descriptors: Vec<ShellDescriptor>) -> Self {
        Self {
            cache: Mutex::new(Some(descriptors)),
        }
    }

    /// The cached descriptors, if the host was already probed.
    pub fn cached(&self) -> Option<Vec<ShellDescriptor>> {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns the descriptors of all six shell types, probing the host on first use.
    pub async fn detect_shells(&self) -> Vec<ShellDescriptor> {
        if let Some(cached) = self.cached() {
            return cached;
        }
        self.refresh().await
    }

    /// Re-probes the host and replaces the cache.
    pub async fn refresh(&self) -> Vec<ShellDescriptor> {
        let mut probes = JoinSet::new();
        for shell in ShellType::ALL {
            probes.spawn(probe(shell));
        }

        let mut detected = Vec::with_capacity(ShellType::ALL.len());
        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok(descriptor) => detected.push(descriptor),
                Err(e) => log::warn!("Shell probe task failed: {}", e),
            }
        }
        // A failed probe task still reports its shell, as unavailable.
        for shell in ShellType::ALL {
            if !detected.iter().any(|descriptor| descriptor.shell == shell) {
                detected.push(ShellDescriptor::unavailable(shell));
            }
        }
        detected.sort_by_key(|descriptor| descriptor.shell);

        *self.cache.lock().unwrap_or_else(PoisonError::into_inner) = Some(detected.clone());
        detected
    }

    /// Returns the descriptor of `shell` if it is available.
    pub async fn descriptor(&self, shell: ShellType) -> Result<ShellDescriptor, ShellError> {
        self.detect_shells()
            .await
            .into_iter()
            .find(|descriptor| descriptor.shell == shell && descriptor.available)
            .ok_or(ShellError::Unavailable(shell))
    }

    /// Resolves the default shell for `config` on the current host.
    pub async fn default_shell(&self, config: &Config) -> Result<ShellChoice, ShellError> {
        let shells = self.detect_shells().await;
        let choice = select_default(&shells, config.preferred_shell, cfg!(windows))?;
        if let Some(warning) = &choice.warning {
            log::warn!("{}", warning);
        }
        Ok(choice)
    }
}
