//! Host memory sampling.

/// Memory in use.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MemoryUsage {
    /// Bytes in use.
    pub used: u64,
    /// Bytes available to the process in total.
    pub total: u64,
    pub percentage: f64,
}

impl MemoryUsage {
    pub fn new(used: u64, total: u64) -> Self {
        let percentage = if total == 0 {
            0.0
        } else {
            used as f64 / total as f64 * 100.0
        };
        Self {
            used,
            total,
            percentage,
        }
    }
}

/// A source of memory usage samples. Hosts that cannot report memory return
/// `None` and memory checks are skipped.
pub trait MemoryProbe: Send {
    fn sample(&self) -> Option<MemoryUsage>;
}

/// Never reports memory.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoMemoryProbe;

impl MemoryProbe for NoMemoryProbe {
    fn sample(&self) -> Option<MemoryUsage> {
        None
    }
}

/// Reports a fixed sample.
#[derive(Clone, Copy, Debug)]
pub struct FixedMemoryProbe(pub MemoryUsage);

impl MemoryProbe for FixedMemoryProbe {
    fn sample(&self) -> Option<MemoryUsage> {
        Some(self.0)
    }
}

/// Whole-system memory read from `/proc/meminfo`.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemMemoryProbe;

impl MemoryProbe for SystemMemoryProbe {
    fn sample(&self) -> Option<MemoryUsage> {
        let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
        parse_meminfo(&meminfo)
    }
}

/// Total installed memory in GiB, if the host reports it.
pub fn system_memory_gb() -> Option<f32> {
    SystemMemoryProbe
        .sample()
        .map(|usage| usage.total as f32 / (1024.0 * 1024.0 * 1024.0))
}

fn parse_meminfo(meminfo: &str) -> Option<MemoryUsage> {
    let field = |name: &str| -> Option<u64> {
        meminfo
            .lines()
            .find_map(|line| line.strip_prefix(name))
            .and_then(|rest| rest.trim_start_matches(':').split_whitespace().next())
            .and_then(|kb| kb.parse::<u64>().ok())
            .map(|kb| kb * 1024)
    };

    let total = field("MemTotal")?;
    let available = field("MemAvailable").or_else(|| field("MemFree"))?;
    Some(MemoryUsage::new(total.saturating_sub(available), total))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_percentage() {
        let usage = MemoryUsage::new(50, 200);
        assert_eq!(usage.percentage, 25.0);
        assert_eq!(MemoryUsage::new(10, 0).percentage, 0.0);
    }

    #[test]
    fn test_parse_meminfo() {
        let meminfo = "MemTotal:       16000 kB\nMemFree:         1000 kB\nMemAvailable:    4000 kB\n";
        let usage = parse_meminfo(meminfo).unwrap();

        assert_eq!(usage.total, 16000 * 1024);
        assert_eq!(usage.used, 12000 * 1024);
        assert_eq!(usage.percentage, 75.0);
    }

    #[test]
    fn test_parse_meminfo_without_available() {
        let meminfo = "MemTotal: 1000 kB\nMemFree: 250 kB\n";
        let usage = parse_meminfo(meminfo).unwrap();
        assert_eq!(usage.percentage, 75.0);
    }

    #[test]
    fn test_parse_garbage() {
        assert!(parse_meminfo("nothing here").is_none());
    }
}
