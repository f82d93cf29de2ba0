//! Session arguments: the CLI surface shared by invocation, control block, and queue.

#![allow(missing_docs)]

use std::path::PathBuf;
use std::sync::OnceLock;

use clap::Parser;
use regex::Regex;

use crate::logger::session::LogHandle;

/// Options understood by a maintenance session.
///
/// Only the `--name=value` form is accepted; tokens that do not match an
/// option's shape are dropped by [`SessionArgs::from_tokens`] before parsing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Parser)]
#[command(
    name = "recovery",
    disable_help_flag = true,
    disable_version_flag = true,
    args_override_self = true
)]
pub struct SessionArgs {
    #[arg(long = "update_package", value_name = "PATH")]
    pub update_package: Option<PathBuf>,
    #[arg(long = "wipe_data")]
    pub wipe_data: bool,
    #[arg(long = "wipe_cache")]
    pub wipe_cache: bool,
    #[arg(long = "wipe_ab")]
    pub wipe_ab: bool,
    #[arg(long = "wipe_package_size", default_value_t = 0)]
    pub wipe_package_size: u64,
    #[arg(long = "prompt_and_wipe_data")]
    pub prompt_and_wipe_data: bool,
    #[arg(long = "retry_count", default_value_t = 0)]
    pub retry_count: u32,
    #[arg(long = "sideload")]
    pub sideload: bool,
    /// Implies `--sideload`.
    #[arg(long = "sideload_auto_reboot")]
    pub sideload_auto_reboot: bool,
    #[arg(long = "locale")]
    pub locale: Option<String>,
    #[arg(long = "reason")]
    pub reason: Option<String>,
    #[arg(long = "security")]
    pub security_update: bool,
    #[arg(long = "show_text")]
    pub show_text: bool,
    #[arg(long = "just_exit")]
    pub just_exit: bool,
    #[arg(long = "shutdown_after")]
    pub shutdown_after: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OptionKind {
    Flag,
    Text,
    Count,
    Size,
}

const KNOWN_OPTIONS: &[(&str, OptionKind)] = &[
    ("update_package", OptionKind::Text),
    ("retry_count", OptionKind::Count),
    ("wipe_data", OptionKind::Flag),
    ("wipe_cache", OptionKind::Flag),
    ("wipe_ab", OptionKind::Flag),
    ("wipe_package_size", OptionKind::Size),
    ("prompt_and_wipe_data", OptionKind::Flag),
    ("show_text", OptionKind::Flag),
    ("sideload", OptionKind::Flag),
    ("sideload_auto_reboot", OptionKind::Flag),
    ("just_exit", OptionKind::Flag),
    ("locale", OptionKind::Text),
    ("shutdown_after", OptionKind::Flag),
    ("reason", OptionKind::Text),
    ("security", OptionKind::Flag),
];

impl SessionArgs {
    /// Parse resolved tokens (program name excluded), dropping invalid ones.
    #[must_use]
    pub fn from_tokens(tokens: &[String], log: &LogHandle) -> Self {
        let mut argv = vec!["recovery".to_string()];
        argv.extend(tokens.iter().filter(|token| {
            let accepted = is_well_formed(token);
            if !accepted {
                log.error(format!("Invalid command argument: {token:?}"));
            }
            accepted
        }).cloned());

        let mut parsed = match Self::try_parse_from(&argv) {
            Ok(parsed) => parsed,
            Err(e) => {
                log.error(format!("Invalid command arguments: {}", e.kind()));
                Self::default()
            }
        };
        if parsed.sideload_auto_reboot {
            parsed.sideload = true;
        }
        parsed
    }

    /// Whether any operation was requested.
    #[must_use]
    pub fn has_command(&self) -> bool {
        self.update_package.is_some()
            || self.wipe_data
            || self.prompt_and_wipe_data
            || self.wipe_cache
            || self.wipe_ab
            || self.sideload
    }
}

fn is_well_formed(token: &str) -> bool {
    let Some(body) = token.strip_prefix("--") else {
        return false;
    };
    let (name, value) = match body.split_once('=') {
        Some((name, value)) => (name, Some(value)),
        None => (body, None),
    };
    let Some((_, kind)) = KNOWN_OPTIONS.iter().find(|(known, _)| *known == name) else {
        return false;
    };
    match (kind, value) {
        (OptionKind::Flag, None) => true,
        (OptionKind::Text, Some(value)) => !value.is_empty(),
        // Width matches the field so clap never rejects the whole argv.
        (OptionKind::Count, Some(value)) => value.parse::<u32>().is_ok(),
        (OptionKind::Size, Some(value)) => value.parse::<u64>().is_ok(),
        _ => false,
    }
}

/// Parse a multi-stage marker such as `"2/3"`.
#[must_use]
pub fn parse_stage(stage: &str) -> Option<(u32, u32)> {
    static STAGE: OnceLock<Option<Regex>> = OnceLock::new();
    let regex = STAGE
        .get_or_init(|| Regex::new(r"^\s*(\d+)/(\d+)").ok())
        .as_ref()?;
    let captures = regex.captures(stage)?;
    let current = captures.get(1)?.as_str().parse().ok()?;
    let max = captures.get(2)?.as_str().parse().ok()?;
    Some((current, max))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn parses_full_surface() {
        let log = LogHandle::capture();
        let args = SessionArgs::from_tokens(
            &tokens(&[
                "--update_package=/cache/a.zip",
                "--retry_count=2",
                "--locale=fr-FR",
                "--reason=convert_fbe",
                "--security",
                "--show_text",
                "--shutdown_after",
                "--wipe_package_size=4096",
            ]),
            &log,
        );
        assert_eq!(args.update_package, Some(PathBuf::from("/cache/a.zip")));
        assert_eq!(args.retry_count, 2);
        assert_eq!(args.locale.as_deref(), Some("fr-FR"));
        assert_eq!(args.reason.as_deref(), Some("convert_fbe"));
        assert!(args.security_update);
        assert!(args.show_text);
        assert!(args.shutdown_after);
        assert_eq!(args.wipe_package_size, 4096);
        assert!(log.captured_lines().is_empty());
    }

    #[test]
    fn invalid_tokens_dropped_and_logged() {
        let log = LogHandle::capture();
        let args = SessionArgs::from_tokens(
            &tokens(&[
                "--wipe_cache",
                "--bogus",
                "--retry_count=abc",
                "--wipe_data=yes",
                "--locale",
                "stray",
            ]),
            &log,
        );
        assert!(args.wipe_cache);
        assert!(!args.wipe_data);
        assert_eq!(args.retry_count, 0);
        assert!(args.locale.is_none());
        assert_eq!(log.captured_lines().len(), 5);
    }

    #[test]
    fn overflowing_retry_count_keeps_other_options() {
        let log = LogHandle::capture();
        let args = SessionArgs::from_tokens(
            &tokens(&[
                "--update_package=/cache/a.zip",
                "--retry_count=4294967296",
                "--wipe_package_size=4294967296",
            ]),
            &log,
        );
        assert_eq!(args.update_package, Some(PathBuf::from("/cache/a.zip")));
        assert_eq!(args.retry_count, 0);
        assert_eq!(args.wipe_package_size, 4_294_967_296);
        assert!(log.contains("Invalid command argument: \"--retry_count=4294967296\""));
        assert_eq!(log.captured_lines().len(), 1);
    }

    #[test]
    fn auto_reboot_implies_sideload() {
        let args =
            SessionArgs::from_tokens(&tokens(&["--sideload_auto_reboot"]), &LogHandle::capture());
        assert!(args.sideload);
        assert!(args.sideload_auto_reboot);
        assert!(args.has_command());
    }

    #[test]
    fn repeated_option_last_wins() {
        let args = SessionArgs::from_tokens(
            &tokens(&["--retry_count=1", "--retry_count=3"]),
            &LogHandle::capture(),
        );
        assert_eq!(args.retry_count, 3);
    }

    #[test]
    fn no_command_for_display_only_flags() {
        let args = SessionArgs::from_tokens(
            &tokens(&["--show_text", "--locale=en-GB"]),
            &LogHandle::capture(),
        );
        assert!(!args.has_command());
    }

    #[test]
    fn stage_parsing() {
        assert_eq!(parse_stage("2/3"), Some((2, 3)));
        assert_eq!(parse_stage(" 1/2 trailing"), Some((1, 2)));
        assert_eq!(parse_stage(""), None);
        assert_eq!(parse_stage("x/3"), None);
    }
}
