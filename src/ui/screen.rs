//! Screen/input surface of the maintenance UI.
//!
//! `RecoveryUi` is the seam every decision point talks to. Three
//! implementations ship: `StubUi` for unattended sessions, `ScriptedUi` for
//! tests and dry runs, and `ConsoleUi`, a line-oriented terminal front end.

#![allow(missing_docs)]

use std::collections::VecDeque;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, bounded};

use crate::ui::device::MenuPrimitive;
use crate::ui::device::keys;
use crate::ui::menu::MenuModel;

// ──────────────────── shared types ────────────────────

/// Background image shown behind the log text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Background {
    None,
    InstallingUpdate,
    Erasing,
    NoCommand,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Empty,
    Indeterminate,
}

/// One input event delivered to a menu.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    Key(u32),
    Touch { x: i32, y: i32 },
    /// No input arrived within the UI's timeout.
    Timeout,
}

/// What a touch landed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchTarget {
    Item(usize),
    Primitive(MenuPrimitive),
}

/// Display and input operations used by the session.
pub trait RecoveryUi: Send {
    fn print(&mut self, text: &str);
    fn set_background(&mut self, background: Background);
    fn set_progress(&mut self, progress: Progress);
    fn set_stage(&mut self, current: u32, max: u32);
    fn set_locale(&mut self, locale: &str);
    fn set_security_update(&mut self, security: bool);

    fn show_text(&mut self, visible: bool);
    fn is_text_visible(&self) -> bool;
    fn was_text_ever_visible(&self) -> bool;

    /// Discard keys pressed before the next menu is shown.
    fn flush_keys(&mut self);
    fn start_menu(&mut self, menu: &MenuModel, initial: usize);
    fn select_menu(&mut self, index: Option<usize>);
    fn end_menu(&mut self);
    /// Block for the next event, up to the UI's input timeout.
    fn wait_input_event(&mut self) -> InputEvent;
    fn resolve_touch(&self, x: i32, y: i32) -> TouchTarget;

    /// Display a text file; returns the key that closed the viewer.
    fn show_file(&mut self, path: &Path) -> Option<u32>;
}

// ──────────────────── stub ────────────────────

/// Unattended UI: prints to stderr, never receives input.
#[derive(Debug, Default)]
pub struct StubUi;

impl RecoveryUi for StubUi {
    fn print(&mut self, text: &str) {
        let _ = writeln!(io::stderr(), "{text}");
    }
    fn set_background(&mut self, _background: Background) {}
    fn set_progress(&mut self, _progress: Progress) {}
    fn set_stage(&mut self, _current: u32, _max: u32) {}
    fn set_locale(&mut self, _locale: &str) {}
    fn set_security_update(&mut self, _security: bool) {}
    fn show_text(&mut self, _visible: bool) {}
    fn is_text_visible(&self) -> bool {
        false
    }
    fn was_text_ever_visible(&self) -> bool {
        false
    }
    fn flush_keys(&mut self) {}
    fn start_menu(&mut self, _menu: &MenuModel, _initial: usize) {}
    fn select_menu(&mut self, _index: Option<usize>) {}
    fn end_menu(&mut self) {}
    fn wait_input_event(&mut self) -> InputEvent {
        InputEvent::Timeout
    }
    fn resolve_touch(&self, _x: i32, _y: i32) -> TouchTarget {
        TouchTarget::Primitive(MenuPrimitive::NoAction)
    }
    fn show_file(&mut self, _path: &Path) -> Option<u32> {
        None
    }
}

// ──────────────────── scripted ────────────────────

/// Height of one menu row for touch resolution.
pub const TOUCH_ROW_HEIGHT: i32 = 40;

/// UI driven by a fixed queue of input events, recording everything shown.
///
/// Touches with a negative `y` mean Back; otherwise `y / TOUCH_ROW_HEIGHT`
/// selects a row. Once the script runs out the UI behaves like an unattended
/// screen: input times out and text counts as never shown.
#[derive(Debug, Default)]
pub struct ScriptedUi {
    script: VecDeque<InputEvent>,
    exhausted: bool,
    text_visible: bool,
    text_ever_visible: bool,
    pub printed: Vec<String>,
    pub backgrounds: Vec<Background>,
    /// First header (or `"<untitled>"`) of every menu started.
    pub menus: Vec<String>,
    pub highlights: Vec<Option<usize>>,
    pub files_shown: Vec<PathBuf>,
    pub locale: Option<String>,
    pub stage: Option<(u32, u32)>,
    pub security_update: bool,
    pub keys_flushed: usize,
}

impl ScriptedUi {
    #[must_use]
    pub fn new<I: IntoIterator<Item = InputEvent>>(script: I) -> Self {
        Self {
            script: script.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Script of key presses only.
    #[must_use]
    pub fn keys<I: IntoIterator<Item = u32>>(codes: I) -> Self {
        Self::new(codes.into_iter().map(InputEvent::Key))
    }

    #[must_use]
    pub fn with_text_visible(mut self) -> Self {
        self.show_text(true);
        self
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.script.len()
    }

    #[must_use]
    pub fn printed_contains(&self, needle: &str) -> bool {
        self.printed.iter().any(|line| line.contains(needle))
    }
}

impl RecoveryUi for ScriptedUi {
    fn print(&mut self, text: &str) {
        self.printed.push(text.to_string());
    }
    fn set_background(&mut self, background: Background) {
        self.backgrounds.push(background);
    }
    fn set_progress(&mut self, _progress: Progress) {}
    fn set_stage(&mut self, current: u32, max: u32) {
        self.stage = Some((current, max));
    }
    fn set_locale(&mut self, locale: &str) {
        self.locale = Some(locale.to_string());
    }
    fn set_security_update(&mut self, security: bool) {
        self.security_update = security;
    }
    fn show_text(&mut self, visible: bool) {
        self.text_visible = visible;
        self.text_ever_visible |= visible;
    }
    fn is_text_visible(&self) -> bool {
        self.text_visible && !self.exhausted
    }
    fn was_text_ever_visible(&self) -> bool {
        self.text_ever_visible && !self.exhausted
    }
    fn flush_keys(&mut self) {
        self.keys_flushed += 1;
    }
    fn start_menu(&mut self, menu: &MenuModel, initial: usize) {
        self.menus.push(
            menu.headers
                .first()
                .cloned()
                .unwrap_or_else(|| "<untitled>".to_string()),
        );
        self.highlights.push(Some(initial));
    }
    fn select_menu(&mut self, index: Option<usize>) {
        self.highlights.push(index);
    }
    fn end_menu(&mut self) {}
    fn wait_input_event(&mut self) -> InputEvent {
        match self.script.pop_front() {
            Some(event) => event,
            None => {
                self.exhausted = true;
                InputEvent::Timeout
            }
        }
    }
    fn resolve_touch(&self, _x: i32, y: i32) -> TouchTarget {
        match usize::try_from(y / TOUCH_ROW_HEIGHT) {
            Ok(row) if y >= 0 => TouchTarget::Item(row),
            _ => TouchTarget::Primitive(MenuPrimitive::Back),
        }
    }
    fn show_file(&mut self, path: &Path) -> Option<u32> {
        self.files_shown.push(path.to_path_buf());
        match self.wait_input_event() {
            InputEvent::Key(code) => Some(code),
            _ => None,
        }
    }
}

// ──────────────────── console ────────────────────

/// Terminal front end: menus are printed, commands are read line by line.
///
/// Recognized commands: `up`, `down`, `enter`, `back`, `home`, `refresh`,
/// `pgup`, `pgdn`, and a digit `1`-`9` to pick an item directly.
pub struct ConsoleUi {
    input: Receiver<String>,
    timeout: Duration,
    text_visible: bool,
    text_ever_visible: bool,
    menu: Option<MenuModel>,
}

impl ConsoleUi {
    /// Start the stdin reader thread.
    #[must_use]
    pub fn spawn(timeout: Duration) -> Self {
        let (tx, rx) = bounded(64);
        let spawned = thread::Builder::new()
            .name("rcv-input".to_string())
            .spawn(move || {
                let stdin = io::stdin();
                for line in stdin.lock().lines() {
                    let Ok(line) = line else { break };
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            });
        if let Err(e) = spawned {
            let _ = writeln!(io::stderr(), "[RCV-INPUT] reader thread unavailable: {e}");
        }
        Self {
            input: rx,
            timeout,
            text_visible: true,
            text_ever_visible: true,
            menu: None,
        }
    }

    fn key_for(command: &str) -> Option<u32> {
        let code = match command.trim() {
            "up" | "k" => keys::KEY_UP,
            "down" | "j" => keys::KEY_DOWN,
            "enter" | "" => keys::KEY_ENTER,
            "back" | "b" => keys::KEY_BACK,
            "home" | "h" => keys::KEY_HOME,
            "refresh" | "r" => keys::KEY_REFRESH,
            "pgup" => keys::KEY_PAGEUP,
            "pgdn" => keys::KEY_PAGEDOWN,
            "power" => keys::KEY_POWER,
            digit => {
                let n: u32 = digit.parse().ok()?;
                if !(1..=9).contains(&n) {
                    return None;
                }
                keys::KEY_1 + n - 1
            }
        };
        Some(code)
    }

    fn draw_menu(&self, highlight: Option<usize>) {
        let Some(menu) = &self.menu else { return };
        let mut out = io::stdout().lock();
        for header in &menu.headers {
            let _ = writeln!(out, "{header}");
        }
        for (index, item) in menu.items.iter().enumerate() {
            let marker = if highlight == Some(index) { '>' } else { ' ' };
            let _ = writeln!(out, "{marker} {}. {item}", index + 1);
        }
        let _ = out.flush();
    }
}

impl RecoveryUi for ConsoleUi {
    fn print(&mut self, text: &str) {
        let _ = writeln!(io::stdout(), "{text}");
    }
    fn set_background(&mut self, background: Background) {
        if background == Background::Error {
            let _ = writeln!(io::stdout(), "!! error");
        }
    }
    fn set_progress(&mut self, _progress: Progress) {}
    fn set_stage(&mut self, current: u32, max: u32) {
        let _ = writeln!(io::stdout(), "Stage {current}/{max}");
    }
    fn set_locale(&mut self, _locale: &str) {}
    fn set_security_update(&mut self, _security: bool) {}
    fn show_text(&mut self, visible: bool) {
        self.text_visible = visible;
        self.text_ever_visible |= visible;
    }
    fn is_text_visible(&self) -> bool {
        self.text_visible
    }
    fn was_text_ever_visible(&self) -> bool {
        self.text_ever_visible
    }
    fn flush_keys(&mut self) {
        while self.input.try_recv().is_ok() {}
    }
    fn start_menu(&mut self, menu: &MenuModel, initial: usize) {
        self.menu = Some(menu.clone());
        self.draw_menu(Some(initial));
    }
    fn select_menu(&mut self, index: Option<usize>) {
        self.draw_menu(index);
    }
    fn end_menu(&mut self) {
        self.menu = None;
    }
    fn wait_input_event(&mut self) -> InputEvent {
        loop {
            match self.input.recv_timeout(self.timeout) {
                Ok(line) => {
                    if let Some(code) = Self::key_for(&line) {
                        return InputEvent::Key(code);
                    }
                    let _ = writeln!(io::stdout(), "unknown command: {line:?}");
                }
                Err(RecvTimeoutError::Timeout) => return InputEvent::Timeout,
                // stdin closed: no more input will ever arrive.
                Err(RecvTimeoutError::Disconnected) => {
                    self.text_ever_visible = false;
                    return InputEvent::Timeout;
                }
            }
        }
    }
    fn resolve_touch(&self, _x: i32, _y: i32) -> TouchTarget {
        TouchTarget::Primitive(MenuPrimitive::NoAction)
    }
    fn show_file(&mut self, path: &Path) -> Option<u32> {
        match std::fs::read_to_string(path) {
            Ok(text) => {
                let _ = write!(io::stdout(), "{text}");
            }
            Err(e) => {
                let _ = writeln!(io::stdout(), "Can't open {}: {e}", path.display());
            }
        }
        match self.wait_input_event() {
            InputEvent::Key(code) => Some(code),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_ui_replays_then_goes_unattended() {
        let mut ui = ScriptedUi::keys([keys::KEY_DOWN]).with_text_visible();
        assert!(ui.was_text_ever_visible());
        assert_eq!(ui.wait_input_event(), InputEvent::Key(keys::KEY_DOWN));
        assert_eq!(ui.wait_input_event(), InputEvent::Timeout);
        assert!(!ui.was_text_ever_visible());
        assert!(!ui.is_text_visible());
    }

    #[test]
    fn scripted_touch_resolution() {
        let ui = ScriptedUi::default();
        assert_eq!(ui.resolve_touch(0, 85), TouchTarget::Item(2));
        assert_eq!(
            ui.resolve_touch(0, -1),
            TouchTarget::Primitive(MenuPrimitive::Back)
        );
    }

    #[test]
    fn scripted_records_menus_and_output() {
        let mut ui = ScriptedUi::default();
        ui.start_menu(&MenuModel::new(["Wipe cache?"], [" No", " Yes"]), 0);
        ui.print("Cache wipe complete.");
        assert_eq!(ui.menus, vec!["Wipe cache?".to_string()]);
        assert!(ui.printed_contains("wipe complete"));
    }

    #[test]
    fn console_command_mapping() {
        assert_eq!(ConsoleUi::key_for("down"), Some(keys::KEY_DOWN));
        assert_eq!(ConsoleUi::key_for(""), Some(keys::KEY_ENTER));
        assert_eq!(ConsoleUi::key_for("3"), Some(keys::KEY_1 + 2));
        assert_eq!(ConsoleUi::key_for("0"), None);
        assert_eq!(ConsoleUi::key_for("dance"), None);
    }

    #[test]
    fn stub_never_shows_text() {
        let mut ui = StubUi;
        assert_eq!(ui.wait_input_event(), InputEvent::Timeout);
        assert!(!ui.was_text_ever_visible());
    }
}
