//! Resource limit resolution
//!
//! Requested limits are clamped against the security profile, never rejected.

use std::fmt;

use crate::config::SecurityProfile;

/// Smallest memory limit handed to a container, in MB
pub const MIN_MEMORY_MB: u64 = 16;

const BYTES_PER_MB: i64 = 1024 * 1024;

/// Container memory limit (memory and swap are both set to this)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MemoryLimit {
    mb: u64,
}

impl MemoryLimit {
    pub fn from_mb(mb: u64) -> Self {
        Self { mb }
    }

    pub fn mb(&self) -> u64 {
        self.mb
    }

    /// Size in bytes, saturating at `i64::MAX`
    pub fn bytes(&self) -> i64 {
        i64::try_from(self.mb)
            .unwrap_or(i64::MAX)
            .saturating_mul(BYTES_PER_MB)
    }
}

impl fmt::Display for MemoryLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}m", self.mb)
    }
}

/// Resolved limits for one container invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunLimits {
    pub timeout_secs: u64,
    pub memory: MemoryLimit,
}

/// Timeout in whole seconds for a requested timeout in milliseconds.
///
/// Absent or non-positive requests get the profile default. Requests under a
/// second are raised to one second so the wait never has a zero budget.
pub fn resolve_timeout(profile: &SecurityProfile, requested_ms: Option<i64>) -> u64 {
    match requested_ms {
        Some(ms) if ms > 0 => ((ms / 1000) as u64).clamp(1, profile.max_timeout_secs.max(1)),
        _ => profile.default_timeout_secs,
    }
}

/// Memory limit for a requested limit in bytes.
///
/// Absent or non-positive requests get the profile default; otherwise the
/// value is clamped to the profile maximum and floored at `MIN_MEMORY_MB`.
pub fn resolve_memory(profile: &SecurityProfile, requested_bytes: Option<i64>) -> MemoryLimit {
    match requested_bytes {
        Some(bytes) if bytes > 0 => {
            let mb = (bytes / BYTES_PER_MB) as u64;
            MemoryLimit::from_mb(mb.min(profile.max_memory_mb).max(MIN_MEMORY_MB))
        }
        _ => MemoryLimit::from_mb(profile.default_memory_mb),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MB: i64 = 1024 * 1024;

    #[test]
    fn test_timeout_defaults() {
        let profile = SecurityProfile::default();

        assert_eq!(resolve_timeout(&profile, None), 10);
        assert_eq!(resolve_timeout(&profile, Some(0)), 10);
        assert_eq!(resolve_timeout(&profile, Some(-5000)), 10);
    }

    #[test]
    fn test_timeout_conversion_and_clamp() {
        let profile = SecurityProfile::default();

        assert_eq!(resolve_timeout(&profile, Some(3000)), 3);
        assert_eq!(resolve_timeout(&profile, Some(3999)), 3);
        assert_eq!(resolve_timeout(&profile, Some(500)), 1);
        assert_eq!(resolve_timeout(&profile, Some(120_000)), 30);
        assert_eq!(resolve_timeout(&profile, Some(i64::MAX)), 30);
    }

    #[test]
    fn test_memory_defaults() {
        let profile = SecurityProfile::default();

        assert_eq!(resolve_memory(&profile, None).mb(), 128);
        assert_eq!(resolve_memory(&profile, Some(-1)).mb(), 128);
        assert_eq!(resolve_memory(&profile, Some(0)).mb(), 128);
    }

    #[test]
    fn test_memory_clamp_and_floor() {
        let profile = SecurityProfile::default();

        assert_eq!(resolve_memory(&profile, Some(64 * MB)).mb(), 64);
        assert_eq!(resolve_memory(&profile, Some(1024 * MB)).mb(), 256);
        assert_eq!(resolve_memory(&profile, Some(1)).mb(), MIN_MEMORY_MB);
        assert_eq!(resolve_memory(&profile, Some(64 * MB)).to_string(), "64m");
        assert_eq!(resolve_memory(&profile, Some(64 * MB)).bytes(), 64 * MB);
    }

    #[test]
    fn test_huge_limit_bytes_saturate() {
        assert_eq!(MemoryLimit::from_mb(u64::MAX).bytes(), i64::MAX);
        assert_eq!(MemoryLimit::from_mb(1 << 50).bytes(), i64::MAX);

        let profile = SecurityProfile {
            max_memory_mb: u64::MAX,
            ..SecurityProfile::default()
        };
        assert!(resolve_memory(&profile, Some(i64::MAX)).bytes() > 0);
    }

    #[test]
    fn test_resolution_is_bounded_and_monotonic() {
        let profile = SecurityProfile::default();
        let ceiling = resolve_memory(&profile, Some(profile.max_memory_mb as i64 * MB));

        let mut previous = MemoryLimit::from_mb(0);
        for bytes in [1, MB, 16 * MB, 100 * MB, 256 * MB, 10_000 * MB, i64::MAX] {
            let resolved = resolve_memory(&profile, Some(bytes));
            assert!(resolved <= ceiling);
            assert!(resolved >= previous);
            assert_eq!(resolve_memory(&profile, Some(bytes)), resolved);
            previous = resolved;
        }

        for ms in [i64::MIN, -1, 0, 1, 999, 1000, 29_999, 31_000, i64::MAX] {
            let secs = resolve_timeout(&profile, Some(ms));
            assert!(secs >= 1 && secs <= profile.max_timeout_secs);
        }
    }
}
