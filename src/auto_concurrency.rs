//! Heuristic used by `--concurrency auto` to size the Dispatcher's
//! per-destination worker pool from the part count and total byte size.

pub fn choose_auto_concurrency(total_files: usize, total_size_bytes: u64) -> usize {
    if total_files == 0 {
        return 1;
    }
    if total_files == 1 {
        return 1;
    }

    if total_size_bytes > 100 * 1024 * 1024 && total_files <= 4 {
        return 4;
    }

    if total_files >= 50_000 {
        return 16;
    }

    let mut base = (total_files as f64).sqrt().round() as usize;
    if base < 1 {
        base = 1;
    }

    let avg_size = if total_files > 0 { total_size_bytes / (total_files as u64) } else { 0 };
    if avg_size > 100 * 1024 * 1024 {
        base = ((base as f64) * 0.25).max(1.0) as usize;
    } else if avg_size > 1024 * 1024 {
        base = ((base as f64) * 0.5).max(1.0) as usize;
    }

    base.clamp(1, 16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_files() {
        assert_eq!(choose_auto_concurrency(0, 0), 1);
    }

    #[test]
    fn single_file() {
        assert_eq!(choose_auto_concurrency(1, 10), 1);
    }

    #[test]
    fn many_small_files_scaling() {
        assert_eq!(choose_auto_concurrency(10_000, 10_000 * 1024), 16);
        assert_eq!(choose_auto_concurrency(100, 100 * 512), 10);
    }

    #[test]
    fn avg_size_influence() {
        let small_avg = choose_auto_concurrency(100, 100 * 512);
        let large_avg = choose_auto_concurrency(100, 100 * 2 * 1024 * 1024);
        assert!(large_avg < small_avg, "large_avg = {large_avg}, small_avg = {small_avg}");
    }

    #[test]
    fn very_large_single_files() {
        assert_eq!(choose_auto_concurrency(2, 300 * 1024 * 1024), 4);
    }

    #[test]
    fn saturate_for_50k() {
        assert_eq!(choose_auto_concurrency(50_000, 50_000 * 1024), 16);
    }

    #[test]
    fn many_medium_large_files_are_conservative() {
        let files = 40usize;
        let avg_mb = 200u64;
        let total = (files as u64) * avg_mb * 1024 * 1024;
        let c = choose_auto_concurrency(files, total);
        assert!(c <= 4, "expected <=4 workers for large parts, got {c}");
    }

    #[test]
    fn medium_size_parts_expect_three() {
        let files = 40usize;
        let avg_mb = 50u64;
        let total = (files as u64) * avg_mb * 1024 * 1024;
        assert_eq!(choose_auto_concurrency(files, total), 3);
    }
}
