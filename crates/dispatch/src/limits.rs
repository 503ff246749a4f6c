use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::config::EngineKind;

const GIB: u64 = 1024 * 1024 * 1024;
const FALLBACK_MEMORY_GIB: u64 = 4;

const REGEX_PER_GIB: u64 = 2_500;
const GROUPS_PER_GIB: u64 = 250;
const MIN_WARMED_REGEX: u64 = 1_000;
const MAX_WARMED_REGEX: u64 = 100_000;
const MIN_WARMED_GROUPS: u64 = 100;
const MAX_WARMED_GROUPS: u64 = 10_000;
const BACKTRACKING_GROUP_DIVISOR: usize = 20;
const BACKTRACKING_MIN_GROUPS: usize = 5;

static TOTAL_MEMORY_BYTES: OnceLock<Option<u64>> = OnceLock::new();

/// Bounds on matchers compiled eagerly at registration time.
///
/// Registrations past these bounds are still accepted; their matchers compile
/// on first resolution instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
    pub max_warmed_groups: usize,
    pub max_warmed_regex_commands: usize,
}

impl Limits {
    /// Derive limits from total memory and whether the engine is linear-time.
    #[must_use]
    pub fn calibrate(total_memory_bytes: Option<u64>, linear_engine: bool) -> Self {
        let gib = total_memory_bytes
            .map(|bytes| bytes / GIB)
            .filter(|gib| *gib > 0)
            .unwrap_or(FALLBACK_MEMORY_GIB);

        let regex = gib
            .saturating_mul(REGEX_PER_GIB)
            .clamp(MIN_WARMED_REGEX, MAX_WARMED_REGEX);
        let groups = gib
            .saturating_mul(GROUPS_PER_GIB)
            .clamp(MIN_WARMED_GROUPS, MAX_WARMED_GROUPS);
        let regex = usize::try_from(regex).unwrap_or(usize::MAX);
        let groups = usize::try_from(groups).unwrap_or(usize::MAX);

        if linear_engine {
            Self {
                max_warmed_groups: groups,
                max_warmed_regex_commands: regex,
            }
        } else {
            Self {
                max_warmed_groups: (groups / BACKTRACKING_GROUP_DIVISOR)
                    .max(BACKTRACKING_MIN_GROUPS),
                max_warmed_regex_commands: regex / 2,
            }
        }
    }

    /// Calibrate against this machine's memory for the given engine.
    #[must_use]
    pub fn detect(engine: EngineKind) -> Self {
        let limits = Self::calibrate(total_memory_bytes(), engine.is_linear());
        log::info!(
            "dispatch limits calibrated: engine={engine}, warmed_regex={}, warmed_groups={}",
            limits.max_warmed_regex_commands,
            limits.max_warmed_groups
        );
        limits
    }
}

/// Total system memory, read once per process.
pub fn total_memory_bytes() -> Option<u64> {
    *TOTAL_MEMORY_BYTES.get_or_init(total_memory_bytes_linux_best_effort)
}

fn total_memory_bytes_linux_best_effort() -> Option<u64> {
    let contents = std::fs::read_to_string("/proc/meminfo").ok()?;
    parse_mem_total(&contents)
}

fn parse_mem_total(meminfo: &str) -> Option<u64> {
    for line in meminfo.lines() {
        let line = line.trim_start();
        if !line.starts_with("MemTotal:") {
            continue;
        }
        let kb = line
            .split_whitespace()
            .nth(1)
            .and_then(|v| v.parse::<u64>().ok())?;
        return Some(kb.saturating_mul(1024));
    }
    None
}
