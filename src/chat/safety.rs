//! Tool-call safety classification
//!
//! Two independent questions are answered here:
//! - is a batch *safe*, i.e. made only of read-only tools that may run
//!   without asking the user;
//! - is a batch *sensitive*, i.e. does it contain a shell command that
//!   deserves an explicit confirmation instead of an auto-execute countdown.

use super::types::ToolCall;
use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

/// Read-only tools that execute without confirmation
pub const SAFE_TOOLS: &[&str] = &[
    "get_terminal_output",
    "get_selected_terminal_output",
    "read_file",
];

/// Tools whose arguments carry a shell command
pub const COMMAND_TOOLS: &[&str] = &["run_in_terminal", "run_in_background"];

/// Start of a simple command, optionally behind privilege or process wrappers
const COMMAND_POSITION: &str = r"(?:^|[;&|(\n`]|\$\()\s*(?:(?:sudo|xargs|nohup|env|exec|time|nice)\s+(?:-\S+\s+)*)*(?:\S*/)?";

/// End of a command word
const WORD_END: &str = r"(?:\s|$|[;&|)`])";

static BENIGN_REDIRECT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:[0-9]*|&)>>?\s*/dev/null\b|[0-9]*>&[0-9]+|<\s*/dev/null\b")
        .expect("redirect regex must compile")
});

static ALWAYS_DANGEROUS: LazyLock<Regex> = LazyLock::new(|| {
    let verbs = r"(?:rm|rmdir|dd|mkfs(?:\.\w+)?|shred|wipefs|fdisk|parted|shutdown|reboot|halt|poweroff|killall|pkill)";
    Regex::new(&format!(
        r"{COMMAND_POSITION}{verbs}{WORD_END}|>\s*/dev/\w|:\(\)\s*\{{"
    ))
    .expect("danger regex must compile")
});

static POTENTIALLY_DANGEROUS: LazyLock<Regex> = LazyLock::new(|| {
    let verbs = r"(?:chmod|chown|chgrp|systemctl|service|kill|mv)";
    Regex::new(&format!(r"{COMMAND_POSITION}{verbs}{WORD_END}"))
        .expect("danger regex must compile")
});

static REMOTE_SCRIPT_PIPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:curl|wget)\b[^|]*\|\s*(?:sudo\s+)?(?:sh|bash|zsh|dash|ksh|fish)\b")
        .expect("pipe regex must compile")
});

/// Why a tool call needs explicit confirmation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SensitiveReason {
    /// Arguments are not JSON or carry no string `command`
    UnreadableArguments,
    AlwaysDangerous,
    PotentiallyDangerous,
    RemoteScriptPipe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "verdict", content = "reason")]
pub enum Sensitivity {
    Benign,
    Sensitive(SensitiveReason),
}

impl Sensitivity {
    pub fn is_sensitive(&self) -> bool {
        matches!(self, Sensitivity::Sensitive(_))
    }
}

pub fn is_safe_tool(name: &str) -> bool {
    SAFE_TOOLS.contains(&name)
}

pub fn is_command_tool(name: &str) -> bool {
    COMMAND_TOOLS.contains(&name)
}

/// A non-empty batch whose every call is read-only
pub fn is_safe_batch(calls: &[ToolCall]) -> bool {
    !calls.is_empty() && calls.iter().all(|call| is_safe_tool(call.name()))
}

/// Remove redirections that only silence or merge output streams
pub fn strip_benign_redirections(command: &str) -> String {
    BENIGN_REDIRECT.replace_all(command, " ").into_owned()
}

/// Match a shell command against the danger patterns
pub fn classify_command(command: &str) -> Sensitivity {
    let cleaned = strip_benign_redirections(command);
    if ALWAYS_DANGEROUS.is_match(&cleaned) {
        Sensitivity::Sensitive(SensitiveReason::AlwaysDangerous)
    } else if POTENTIALLY_DANGEROUS.is_match(&cleaned) {
        Sensitivity::Sensitive(SensitiveReason::PotentiallyDangerous)
    } else if REMOTE_SCRIPT_PIPE.is_match(&cleaned) {
        Sensitivity::Sensitive(SensitiveReason::RemoteScriptPipe)
    } else {
        Sensitivity::Benign
    }
}

/// Only command tools can be sensitive; anything unreadable fails closed
pub fn classify_call(call: &ToolCall) -> Sensitivity {
    if !is_command_tool(call.name()) {
        return Sensitivity::Benign;
    }
    let command = serde_json::from_str::<serde_json::Value>(&call.function.arguments)
        .ok()
        .and_then(|args| args.get("command")?.as_str().map(str::to_owned));
    match command {
        Some(command) => classify_command(&command),
        None => Sensitivity::Sensitive(SensitiveReason::UnreadableArguments),
    }
}

/// First sensitive verdict in the batch, or benign
pub fn classify_batch(calls: &[ToolCall]) -> Sensitivity {
    calls
        .iter()
        .map(classify_call)
        .find(Sensitivity::is_sensitive)
        .unwrap_or(Sensitivity::Benign)
}
