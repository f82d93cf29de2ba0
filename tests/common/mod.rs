//! Shared fixtures for session scenarios.
//!
//! Each scenario runs complete sessions against a [`Testbed`] rooted in a
//! temp dir. The captured session log is written to a per-case file so a
//! failing assertion can point at it.

#![allow(dead_code)]

use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use recovery_control::session::context::SessionContext;
use recovery_control::session::runner::{SessionEnd, SessionRunner};
use recovery_control::session::testbed::Testbed;
use recovery_control::ui::screen::ScriptedUi;
use tempfile::TempDir;

pub struct Scenario {
    pub case: String,
    pub dir: TempDir,
    pub tb: Testbed,
}

pub struct SessionResult {
    pub end: SessionEnd,
    pub ctx: SessionContext,
    pub log_path: PathBuf,
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

impl Scenario {
    pub fn new(case: &str) -> Self {
        let dir = tempfile::tempdir().expect("create scenario root");
        let tb = Testbed::at(dir.path()).expect("build testbed");
        Self {
            case: case.to_string(),
            dir,
            tb,
        }
    }

    pub fn without_cache(case: &str) -> Self {
        let dir = tempfile::tempdir().expect("create scenario root");
        let tb = Testbed::at_without_cache(dir.path()).expect("build testbed");
        Self {
            case: case.to_string(),
            dir,
            tb,
        }
    }

    /// One unattended session.
    pub fn run(&self, args: &[&str]) -> SessionResult {
        self.run_with(ScriptedUi::default(), args)
    }

    pub fn run_with(&self, ui: ScriptedUi, args: &[&str]) -> SessionResult {
        let argv: Vec<String> = std::iter::once("recovery")
            .chain(args.iter().copied())
            .map(str::to_string)
            .collect();
        let mut ctx = self.tb.context_with(ui);
        let end = SessionRunner::new(&mut ctx).run(&argv);
        let log_path = self.dump_log(&argv);
        SessionResult { end, ctx, log_path }
    }

    /// Write the captured log so far to a per-case file.
    pub fn dump_log(&self, argv: &[String]) -> PathBuf {
        let root = std::env::temp_dir().join("rcv-test-logs");
        fs::create_dir_all(&root).expect("create temp test log dir");
        let path = root.join(format!("{}-{}.log", sanitize(&self.case), now_millis()));

        let mut content = format!("case={}\nargv={argv:?}\n----- log -----\n", self.case);
        for line in self.tb.log.captured_lines() {
            content.push_str(&format!("{:?} {}\n", line.level, line.text));
        }
        fs::write(&path, content).expect("write test log");
        path
    }

    pub fn cache_file(&self, relative: &str) -> PathBuf {
        self.tb.config.paths.cache_root.join(relative)
    }
}
