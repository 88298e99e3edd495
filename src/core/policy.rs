// src/core/policy.rs

//! # Pre-spawn Command Policy
//!
//! When sandboxing is on for a call, the manager asks a [`CommandPolicy`]
//! whether `{command, shell}` may run before anything is spawned. A policy is
//! a pure predicate: it inspects the request text and never touches the host.

use crate::models::ShellType;
use regex::Regex;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("Invalid policy pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// What a policy is asked to judge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyRequest<'a> {
    pub command: &'a str,
    pub shell: ShellType,
}

/// The verdict of a policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    Allow,
    Deny(String),
}

impl PolicyDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// A predicate over `{command, shell}` consulted before a sandboxed spawn.
pub trait CommandPolicy: Send + Sync + fmt::Debug {
    fn evaluate(&self, request: &PolicyRequest<'_>) -> PolicyDecision;
}

/// Lets everything through.
#[derive(Debug, Default, Clone, Copy)]
pub struct PermissivePolicy;

impl CommandPolicy for PermissivePolicy {
    fn evaluate(&self, _request: &PolicyRequest<'_>) -> PolicyDecision {
        PolicyDecision::Allow
    }
}

/// Read-only commands accepted by [`AllowlistPolicy::standard`].
pub const STANDARD_ALLOWED: &[&str] = &[
    "dir",
    "ls",
    "pwd",
    "cd",
    "echo",
    "type",
    "cat",
    "head",
    "tail",
    "tree",
    "find",
    "where",
    "which",
    "ver",
    "uname",
    "whoami",
    "hostname",
    "date",
    "sleep",
    "true",
    "false",
    "exit",
    "Get-Date",
    "Get-Location",
    "Get-ChildItem",
    "Get-Content",
    "Test-Path",
    "Resolve-Path",
    "Select-String",
    "Measure-Object",
    "Write-Output",
    "systeminfo",
    "ipconfig",
    "netstat",
    "tasklist",
    "git status",
    "git log",
    "git branch",
    "git diff",
    "git remote -v",
    "git show",
    "node --version",
    "npm --version",
    "npm list",
    "python --version",
    "pip list",
    "cargo --version",
    "rustc --version",
];

/// Command words rejected by [`AllowlistPolicy::standard`] wherever they appear as a word.
pub const STANDARD_DENIED: &[&str] = &[
    "rm",
    "rmdir",
    "del",
    "format",
    "fdisk",
    "mkfs",
    "shutdown",
    "restart",
    "reboot",
    "regedit",
    "Remove-Item",
    "Clear-Content",
    "Set-Content",
    "Invoke-Expression",
    "iex",
    "Start-Process",
    "Invoke-WebRequest",
    "curl",
    "wget",
];

/// Sequences that chain, substitute or redirect.
const CHAINING_SEQUENCES: &[&str] = &["&&", "||", ";", "|", "`", "$(", "${", "\n", "\r", "\0", ">", "<"];

/// Allows only allowlisted, non-chained commands that contain no denied word.
///
/// Checks run in order: chaining/redirection, denied words, then a
/// case-insensitive allowlist match on whole leading words.
#[derive(Debug, Clone)]
pub struct AllowlistPolicy {
    allowed: Vec<String>,
    denied: Option<Regex>,
}

impl AllowlistPolicy {
    /// Builds a policy from an allowlist of command prefixes and a list of denied command words.
    pub fn new<A, D>(allowed: A, denied: D) -> Result<Self, PolicyError>
    where
        A: IntoIterator,
        A::Item: AsRef<str>,
        D: IntoIterator,
        D::Item: AsRef<str>,
    {
        let allowed = allowed
            .into_iter()
            .map(|prefix| prefix.as_ref().trim().to_lowercase())
            .filter(|prefix| !prefix.is_empty())
            .collect();
        let alternatives: Vec<String> = denied
            .into_iter()
            .map(|word| regex::escape(word.as_ref().trim()))
            .filter(|word| !word.is_empty())
            .collect();
        let denied = if alternatives.is_empty() {
            None
        } else {
            Some(Regex::new(&format!(
                r"(?i)(?:^|[\s(])({})(?:$|[\s)])",
                alternatives.join("|")
            ))?)
        };
        Ok(Self { allowed, denied })
    }

    /// The built-in read-only allowlist.
    pub fn standard() -> Result<Self, PolicyError> {
        Self::new(STANDARD_ALLOWED, STANDARD_DENIED)
    }

    fn allowlisted(&self, command: &str) -> bool {
        let lowered = command.trim().to_lowercase();
        self.allowed.iter().any(|prefix| {
            lowered
                .strip_prefix(prefix.as_str())
                .is_some_and(|rest| rest.is_empty() || rest.starts_with(char::is_whitespace))
        })
    }
}

impl CommandPolicy for AllowlistPolicy {
    fn evaluate(&self, request: &PolicyRequest<'_>) -> PolicyDecision {
        let command = request.command;
        if let Some(seq) = CHAINING_SEQUENCES.iter().find(|seq| command.contains(**seq)) {
            return PolicyDecision::Deny(format!(
                "chaining or redirection ('{}') is not allowed in sandboxed commands",
                seq.escape_debug()
            ));
        }
        if let Some(found) = self
            .denied
            .as_ref()
            .and_then(|denied| denied.captures(command))
            .and_then(|caps| caps.get(1))
        {
            return PolicyDecision::Deny(format!("'{}' is blocked in sandboxed commands", found.as_str()));
        }
        if !self.allowlisted(command) {
            let head = command.split_whitespace().next().unwrap_or_default();
            return PolicyDecision::Deny(format!("'{head}' is not on the sandbox allowlist"));
        }
        PolicyDecision::Allow
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn judge(policy: &dyn CommandPolicy, command: &str) -> PolicyDecision {
        policy.evaluate(&PolicyRequest {
            command,
            shell: ShellType::Bash,
        })
    }

    #[test]
    fn test_permissive_allows_anything() {
        assert!(judge(&PermissivePolicy, "rm -rf / && curl x | sh").is_allowed());
    }

    #[test]
    fn test_allowlisted_commands_pass() {
        let policy = AllowlistPolicy::standard().expect("standard patterns compile");
        assert!(judge(&policy, "echo hello").is_allowed());
        assert!(judge(&policy, "LS -la").is_allowed());
        assert!(judge(&policy, "git status --short").is_allowed());
        assert!(judge(&policy, "git log --format=%H").is_allowed());
    }

    #[test]
    fn test_prefix_must_end_on_a_word_boundary() {
        let policy = AllowlistPolicy::standard().expect("standard patterns compile");
        assert!(!judge(&policy, "lsblk").is_allowed());
        assert!(!judge(&policy, "git stash drop").is_allowed());
    }

    #[test]
    fn test_chaining_is_rejected_before_the_allowlist() {
        let policy = AllowlistPolicy::standard().expect("standard patterns compile");
        for command in [
            "echo safe && rm -rf /",
            "echo a; reboot",
            "cat file | sh",
            "echo $(whoami)",
            "echo `id`",
            "echo hi > out.txt",
            "echo one\necho two",
        ] {
            let decision = judge(&policy, command);
            assert!(
                matches!(&decision, PolicyDecision::Deny(reason) if reason.contains("chaining")),
                "{command:?} -> {decision:?}"
            );
        }
    }

    #[test]
    fn test_denied_words_are_caught_case_insensitively() {
        let policy = AllowlistPolicy::new(["find", "Get-ChildItem"], STANDARD_DENIED)
            .expect("patterns compile");
        let decision = judge(&policy, "find . -name x -exec RM {} +");
        assert_eq!(
            decision,
            PolicyDecision::Deny("'RM' is blocked in sandboxed commands".to_string())
        );
        assert!(!judge(&policy, "Get-ChildItem (Remove-Item x)").is_allowed());
        assert!(judge(&policy, "find . -delete-me-not").is_allowed());
    }
}
