//! Generation rotation for persisted logs: `last_log` → `last_log.1` → … .

#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};

use crate::logger::jsonl::rename_if_present;

/// Path of generation `index` of `base`; generation 0 is `base` itself.
#[must_use]
pub fn generation_path(base: &Path, index: u32) -> PathBuf {
    if index == 0 {
        return base.to_path_buf();
    }
    let mut name = base.as_os_str().to_owned();
    name.push(format!(".{index}"));
    PathBuf::from(name)
}

/// Shift `base` one generation down, keeping at most `keep` rotated copies.
///
/// After the call `base` no longer exists; its previous content is `base.1`.
pub fn shift_generations(base: &Path, keep: u32) {
    if keep == 0 {
        let _ = fs::remove_file(base);
        return;
    }
    let _ = fs::remove_file(generation_path(base, keep));
    for index in (0..keep).rev() {
        rename_if_present(
            &generation_path(base, index),
            &generation_path(base, index + 1),
        );
    }
}

/// Rotate `last_log` and `last_kmsg` so that `keep_log_count` sessions are
/// retained in total (the live file plus `keep_log_count - 1` generations).
pub fn rotate_logs(last_log: &Path, last_kmsg: &Path, keep_log_count: u32) {
    let rotated = keep_log_count.saturating_sub(1);
    shift_generations(last_log, rotated);
    shift_generations(last_kmsg, rotated);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_zero_is_base() {
        let base = Path::new("/cache/recovery/last_log");
        assert_eq!(generation_path(base, 0), base);
        assert_eq!(
            generation_path(base, 3),
            PathBuf::from("/cache/recovery/last_log.3")
        );
    }

    #[test]
    fn shift_moves_every_generation_down() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("last_log");
        fs::write(&base, "current").unwrap();
        fs::write(generation_path(&base, 1), "previous").unwrap();

        shift_generations(&base, 3);

        assert!(!base.exists());
        assert_eq!(fs::read_to_string(generation_path(&base, 1)).unwrap(), "current");
        assert_eq!(fs::read_to_string(generation_path(&base, 2)).unwrap(), "previous");
    }

    #[test]
    fn oldest_generation_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("last_kmsg");
        for index in 0..=2 {
            fs::write(generation_path(&base, index), format!("gen{index}")).unwrap();
        }

        shift_generations(&base, 2);

        assert_eq!(fs::read_to_string(generation_path(&base, 1)).unwrap(), "gen0");
        assert_eq!(fs::read_to_string(generation_path(&base, 2)).unwrap(), "gen1");
        assert!(!generation_path(&base, 3).exists());
    }

    #[test]
    fn rotate_logs_handles_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let last_log = dir.path().join("last_log");
        let last_kmsg = dir.path().join("last_kmsg");
        fs::write(&last_log, "log").unwrap();

        rotate_logs(&last_log, &last_kmsg, 10);

        assert_eq!(fs::read_to_string(generation_path(&last_log, 1)).unwrap(), "log");
        assert!(!generation_path(&last_kmsg, 1).exists());
    }
}
