//! Foundational low-level utilities shared across Parley crates.
//!
//! Provides atomic file-write helpers used when persisting rule sources and
//! feedback config, plus time and task-id helpers used by the coordinator.

pub mod atomic_io;
pub mod task_ids;
pub mod time_utils;

pub use atomic_io::write_text_atomic;
pub use task_ids::next_task_id;
pub use time_utils::current_unix_timestamp_ms;

#[cfg(test)]
mod tests {
    use std::fs::read_to_string;

    use super::*;

    #[test]
    fn unit_current_unix_timestamp_ms_is_millis_and_monotone_enough() {
        let first = current_unix_timestamp_ms();
        let second = current_unix_timestamp_ms();
        // 2020-09-13 in millis; a seconds value would be far below this.
        assert!(first > 1_600_000_000_000);
        assert!(second >= first);
    }

    #[test]
    fn functional_write_text_atomic_writes_content() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let path = tempdir.path().join("rules.json");
        write_text_atomic(&path, "{\"languages\":{}}").expect("write");
        let contents = read_to_string(&path).expect("read");
        assert_eq!(contents, "{\"languages\":{}}");
    }

    #[test]
    fn regression_write_text_atomic_replaces_existing_file_and_leaves_no_temp_files() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let path = tempdir.path().join("nested/config.json");
        write_text_atomic(&path, "first").expect("first write");
        write_text_atomic(&path, "second").expect("second write");
        assert_eq!(read_to_string(&path).expect("read"), "second");

        let leftovers = std::fs::read_dir(path.parent().expect("parent"))
            .expect("read dir")
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().contains(".tmp-"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn regression_write_text_atomic_rejects_directory_destination() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let error = write_text_atomic(tempdir.path(), "x").expect_err("directory must fail");
        assert!(error.to_string().contains("is a directory"));
    }
}
