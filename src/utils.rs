use crate::config::DEFAULT_LOOPS;

/// One loop per available CPU, falling back to the default loop count.
pub fn available_loops() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(DEFAULT_LOOPS)
}
