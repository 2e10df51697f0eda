//! Host memory statistics from `/proc/meminfo`.

use std::path::Path;

const MEMINFO_PATH: &str = "/proc/meminfo";

/// `(available, total)` host memory in bytes, `(0, 0)` where the kernel
/// does not report it.
pub fn host_memory() -> (usize, usize) {
    read_from(Path::new(MEMINFO_PATH)).unwrap_or((0, 0))
}

fn read_from(path: &Path) -> Option<(usize, usize)> {
    parse(&std::fs::read_to_string(path).ok()?)
}

fn parse(content: &str) -> Option<(usize, usize)> {
    let mut total_kb = None;
    let mut available_kb = None;
    for line in content.lines() {
        let mut parts = line.split_whitespace();
        match (parts.next(), parts.next()) {
            (Some("MemTotal:"), Some(v)) => total_kb = v.parse::<usize>().ok(),
            (Some("MemAvailable:"), Some(v)) => available_kb = v.parse::<usize>().ok(),
            _ => {}
        }
        if total_kb.is_some() && available_kb.is_some() {
            break;
        }
    }
    Some((available_kb? * 1024, total_kb? * 1024))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
MemTotal:        3884292 kB
MemFree:          218456 kB
MemAvailable:    2456780 kB
Buffers:          123456 kB
";

    #[test]
    fn test_parse_meminfo() {
        assert_eq!(parse(SAMPLE), Some((2456780 * 1024, 3884292 * 1024)));
    }

    #[test]
    fn test_missing_field() {
        assert_eq!(parse("MemTotal: 100 kB\n"), None);
    }

    #[test]
    fn test_host_memory_is_consistent() {
        let (free, total) = host_memory();
        assert!(free <= total);
    }
}
