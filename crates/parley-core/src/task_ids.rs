use std::sync::atomic::{AtomicU64, Ordering};

use crate::time_utils::current_unix_timestamp_ms;

const TASK_ID_PREFIX: &str = "task";

static TASK_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Returns a process-unique opaque task id (`task-<unix_ms>-<counter>`).
pub fn next_task_id() -> String {
    format!(
        "{TASK_ID_PREFIX}-{}-{}",
        current_unix_timestamp_ms(),
        TASK_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::next_task_id;

    #[test]
    fn unit_next_task_id_is_unique_across_threads() {
        let handles = (0..4)
            .map(|_| std::thread::spawn(|| (0..250).map(|_| next_task_id()).collect::<Vec<_>>()))
            .collect::<Vec<_>>();
        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().expect("join") {
                assert!(id.starts_with("task-"));
                assert!(seen.insert(id), "task ids must be unique");
            }
        }
        assert_eq!(seen.len(), 1_000);
    }
}
