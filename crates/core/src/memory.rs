use std::fs;

pub fn resident_memory_mb() -> Option<f64> {
    let status = fs::read_to_string("/proc/self/status").ok()?;
    parse_vm_rss_kb(&status).map(|kb| kb as f64 / 1024.0)
}

fn parse_vm_rss_kb(status: &str) -> Option<u64> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("VmRSS:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|value| value.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::parse_vm_rss_kb;

    #[test]
    fn vm_rss_line_is_parsed() {
        let status = "Name:\tpdf-ingest\nVmPeak:\t  90000 kB\nVmRSS:\t   51200 kB\nThreads:\t1\n";
        assert_eq!(parse_vm_rss_kb(status), Some(51_200));
    }

    #[test]
    fn missing_vm_rss_is_none() {
        assert_eq!(parse_vm_rss_kb("Name:\tx\n"), None);
    }
}
