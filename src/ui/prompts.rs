//! Reusable interactive prompts built on the menu dispatcher.

#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};

use crate::logger::session::LogHandle;
use crate::ui::device::Device;
use crate::ui::device::keys::{KEY_HOME, KEY_HOMEPAGE};
use crate::ui::dispatcher::{MenuChoice, get_menu_selection};
use crate::ui::menu::MenuModel;
use crate::ui::screen::RecoveryUi;

/// Two-line confirmation with " No" / " Yes"; only an explicit Yes confirms.
pub fn yes_no(
    ui: &mut dyn RecoveryUi,
    device: &mut dyn Device,
    question: &str,
    warning: &str,
) -> bool {
    let menu = MenuModel::new([question, warning], [" No", " Yes"]).menu_only();
    loop {
        match get_menu_selection(ui, device, &menu, 0) {
            MenuChoice::Refresh => {}
            choice => return choice == MenuChoice::Item(1),
        }
    }
}

// ──────────────────── directory browser ────────────────────

/// Result of browsing for a package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowseOutcome {
    Selected(PathBuf),
    /// Backed out of the starting directory.
    Cancelled,
    /// Home pressed (or nobody watching): abandon the whole flow.
    Home,
}

/// Menu entries for `dir`: `"../"`, sorted `.zip` files, sorted `"name/"` dirs.
pub fn list_directory(dir: &Path) -> std::io::Result<Vec<String>> {
    let mut zips = Vec::new();
    let mut dirs = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            dirs.push(format!("{name}/"));
        } else if file_type.is_file() && name.to_ascii_lowercase().ends_with(".zip") {
            zips.push(name);
        }
    }
    zips.sort();
    dirs.sort();

    let mut entries = Vec::with_capacity(zips.len() + dirs.len() + 1);
    entries.push("../".to_string());
    entries.extend(zips);
    entries.extend(dirs);
    Ok(entries)
}

/// Walk down from `root` until a package is chosen.
///
/// Entry 0 and Back go up one level; leaving `root` cancels.
pub fn browse_directory(
    ui: &mut dyn RecoveryUi,
    device: &mut dyn Device,
    root: &Path,
    log: &LogHandle,
) -> BrowseOutcome {
    let mut stack = vec![root.to_path_buf()];

    while let Some(dir) = stack.last().cloned() {
        let entries = match list_directory(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                log.error(format!("error opening {}: {e}", dir.display()));
                stack.pop();
                continue;
            }
        };
        let dir_label = dir.display().to_string();
        let menu = MenuModel::new(
            ["Choose a package to install:", dir_label.as_str()],
            entries.iter().cloned(),
        )
        .menu_only();

        let mut chosen = 0;
        loop {
            let index = match get_menu_selection(ui, device, &menu, chosen) {
                MenuChoice::Home | MenuChoice::TimedOut => return BrowseOutcome::Home,
                MenuChoice::Back | MenuChoice::Item(0) => {
                    stack.pop();
                    break;
                }
                MenuChoice::Refresh => continue,
                MenuChoice::Item(index) => index,
            };
            let Some(entry) = entries.get(index) else {
                continue;
            };
            chosen = index;
            if let Some(name) = entry.strip_suffix('/') {
                stack.push(dir.join(name));
                break;
            }
            return BrowseOutcome::Selected(dir.join(entry));
        }
    }
    BrowseOutcome::Cancelled
}

// ──────────────────── log viewer ────────────────────

/// Let the user page through `entries` until Back or Home.
pub fn choose_log_file(
    ui: &mut dyn RecoveryUi,
    device: &mut dyn Device,
    entries: &[PathBuf],
) -> MenuChoice {
    if entries.is_empty() {
        return MenuChoice::Back;
    }
    let menu = MenuModel::new(
        ["Select file to view"],
        entries.iter().map(|path| path.display().to_string()),
    )
    .menu_only();

    let mut chosen = 0;
    loop {
        match get_menu_selection(ui, device, &menu, chosen) {
            MenuChoice::Item(index) if index < entries.len() => {
                chosen = index;
                if let Some(KEY_HOME | KEY_HOMEPAGE) = ui.show_file(&entries[index]) {
                    device.go_home();
                    return MenuChoice::Home;
                }
            }
            MenuChoice::Item(_) | MenuChoice::Refresh => {}
            MenuChoice::TimedOut => return MenuChoice::Back,
            choice => return choice,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ui::device::DefaultDevice;
    use crate::ui::device::keys::*;
    use crate::ui::screen::ScriptedUi;

    #[test]
    fn yes_no_requires_explicit_yes() {
        let mut ui = ScriptedUi::keys([KEY_DOWN, KEY_ENTER]).with_text_visible();
        assert!(yes_no(&mut ui, &mut DefaultDevice::new(), "Wipe cache?", ""));

        let mut ui = ScriptedUi::keys([KEY_ENTER]).with_text_visible();
        assert!(!yes_no(&mut ui, &mut DefaultDevice::new(), "Wipe cache?", ""));

        let mut ui = ScriptedUi::keys([KEY_BACK]).with_text_visible();
        assert!(!yes_no(&mut ui, &mut DefaultDevice::new(), "Wipe cache?", ""));
    }

    #[test]
    fn yes_no_ignores_direct_item_codes() {
        let mut ui = ScriptedUi::keys([KEY_1 + 1, KEY_ENTER]).with_text_visible();
        assert!(!yes_no(&mut ui, &mut DefaultDevice::new(), "Wipe cache?", ""));
    }

    fn package_tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.zip"), b"pk").unwrap();
        fs::write(dir.path().join("A.ZIP"), b"pk").unwrap();
        fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/c.zip"), b"pk").unwrap();
        dir
    }

    #[test]
    fn listing_order() {
        let dir = package_tree();
        assert_eq!(
            list_directory(dir.path()).unwrap(),
            vec!["../", "A.ZIP", "b.zip", "sub/"]
        );
    }

    #[test]
    fn browse_selects_nested_package() {
        let dir = package_tree();
        // Into "sub/" (index 3), then "c.zip" (index 1).
        let mut ui = ScriptedUi::keys([KEY_DOWN, KEY_DOWN, KEY_DOWN, KEY_ENTER, KEY_DOWN, KEY_ENTER])
            .with_text_visible();
        let outcome =
            browse_directory(&mut ui, &mut DefaultDevice::new(), dir.path(), &LogHandle::capture());
        assert_eq!(outcome, BrowseOutcome::Selected(dir.path().join("sub/c.zip")));
    }

    #[test]
    fn browse_up_from_subdir_then_cancel() {
        let dir = package_tree();
        let mut ui =
            ScriptedUi::keys([KEY_UP, KEY_ENTER, KEY_ENTER, KEY_BACK]).with_text_visible();
        let outcome =
            browse_directory(&mut ui, &mut DefaultDevice::new(), dir.path(), &LogHandle::capture());
        assert_eq!(outcome, BrowseOutcome::Cancelled);
        assert_eq!(ui.menus.len(), 3);
    }

    #[test]
    fn browse_home_aborts() {
        let dir = package_tree();
        let mut ui = ScriptedUi::keys([KEY_UP, KEY_ENTER, KEY_HOME]).with_text_visible();
        let outcome =
            browse_directory(&mut ui, &mut DefaultDevice::new(), dir.path(), &LogHandle::capture());
        assert_eq!(outcome, BrowseOutcome::Home);
    }

    #[test]
    fn browse_unreadable_root_cancels() {
        let log = LogHandle::capture();
        let mut ui = ScriptedUi::default();
        let outcome = browse_directory(
            &mut ui,
            &mut DefaultDevice::new(),
            Path::new("/nonexistent/storage"),
            &log,
        );
        assert_eq!(outcome, BrowseOutcome::Cancelled);
        assert!(log.contains("error opening"));
    }

    #[test]
    fn log_chooser_shows_files_until_back() {
        let entries = vec![PathBuf::from("/tmp/recovery.log"), PathBuf::from("/cache/last_log")];
        // Open entry 1, close viewer with Enter, then Back.
        let mut ui =
            ScriptedUi::keys([KEY_DOWN, KEY_ENTER, KEY_ENTER, KEY_BACK]).with_text_visible();
        let choice = choose_log_file(&mut ui, &mut DefaultDevice::new(), &entries);
        assert_eq!(choice, MenuChoice::Back);
        assert_eq!(ui.files_shown, vec![entries[1].clone()]);
    }

    #[test]
    fn log_chooser_home_from_viewer() {
        let entries = vec![PathBuf::from("/tmp/recovery.log")];
        let mut device = DefaultDevice::new();
        let mut ui = ScriptedUi::keys([KEY_ENTER, KEY_HOME]).with_text_visible();
        assert_eq!(choose_log_file(&mut ui, &mut device, &entries), MenuChoice::Home);
        assert_eq!(device.home_requests(), 1);
    }
}
