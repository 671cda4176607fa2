//! Heap configuration.
//!
//! Every knob has a compiled-in default and an environment override:
//! - `TAGHEAP_CHUNK_SIZE`: minimum arena extension on a free-list miss (bytes).
//! - `TAGHEAP_PLACEMENT`: `threshold` (default), `front`, or `back`.
//! - `TAGHEAP_SPLIT_THRESHOLD`: block size above which `threshold` placement
//!   carves from the front of a free block.
//! - `TAGHEAP_CHECK`: `off` (default), `validate`, or `paranoid`.
//! - `TAGHEAP_LOG`: minimum lifecycle record level (`trace` .. `error`).
//!
//! Unparseable values fall back to the default for that knob.

use crate::arena::DEFAULT_MAX_ARENA_BYTES;
use crate::block::align_up;
use crate::lifecycle::HeapLogLevel;

/// Default minimum arena extension (4 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 1 << 12;

/// Default block-size threshold of [`PlacementPolicy::SizeThreshold`].
pub const DEFAULT_SPLIT_THRESHOLD: usize = 100;

/// Which end of a split free block receives the allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SplitSide {
    /// Allocation at the low addresses, free remainder trailing.
    Front,
    /// Allocation at the high addresses, free remainder leading.
    Back,
}

/// Placement policy applied when a free block is larger than needed.
///
/// `SizeThreshold` keeps large requests at the front so their leftovers trail them,
/// and pushes small requests to the back so small-block churn clusters away from
/// the large-block traffic. The threshold is empirical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlacementPolicy {
    SizeThreshold { threshold: usize },
    AlwaysFront,
    AlwaysBack,
}

impl Default for PlacementPolicy {
    fn default() -> Self {
        Self::SizeThreshold {
            threshold: DEFAULT_SPLIT_THRESHOLD,
        }
    }
}

impl PlacementPolicy {
    /// Side of the free block that a `asize`-byte allocation occupies.
    #[must_use]
    pub const fn side(self, asize: usize) -> SplitSide {
        match self {
            Self::SizeThreshold { threshold } => {
                if asize > threshold {
                    SplitSide::Front
                } else {
                    SplitSide::Back
                }
            }
            Self::AlwaysFront => SplitSide::Front,
            Self::AlwaysBack => SplitSide::Back,
        }
    }

    /// Parse from string (case-insensitive); `None` for unknown names.
    #[must_use]
    pub fn from_name(name: &str, threshold: usize) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "threshold" | "default" | "size" => Some(Self::SizeThreshold { threshold }),
            "front" | "always-front" | "first" => Some(Self::AlwaysFront),
            "back" | "always-back" | "tail" => Some(Self::AlwaysBack),
            _ => None,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::SizeThreshold { .. } => "threshold",
            Self::AlwaysFront => "front",
            Self::AlwaysBack => "back",
        }
    }
}

/// How much consistency checking the heap performs on its own.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckLevel {
    /// No checking. Invalid and double releases are undefined.
    #[default]
    Off,
    /// O(1) validation of pointers passed to release and resize; bad pointers are
    /// reported and the call is ignored.
    Validate,
    /// `Validate` plus a full heap scan after every public operation.
    Paranoid,
}

impl CheckLevel {
    /// Parse from string (case-insensitive).
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "validate" | "pointers" | "on" | "1" => Self::Validate,
            "paranoid" | "full" | "scan" | "2" => Self::Paranoid,
            _ => Self::Off,
        }
    }

    #[must_use]
    pub const fn validates_pointers(self) -> bool {
        !matches!(self, Self::Off)
    }

    #[must_use]
    pub const fn scans_after_each_op(self) -> bool {
        matches!(self, Self::Paranoid)
    }
}

/// Tunables for one heap instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
    /// Minimum arena extension; always a multiple of the alignment.
    pub chunk_size: usize,
    pub placement: PlacementPolicy,
    pub check: CheckLevel,
    /// Records below this level are discarded.
    pub log_level: HeapLogLevel,
    /// Ceiling applied when the heap builds its own `VecArena`.
    pub max_arena_bytes: usize,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            placement: PlacementPolicy::default(),
            check: CheckLevel::default(),
            log_level: HeapLogLevel::Info,
            max_arena_bytes: DEFAULT_MAX_ARENA_BYTES,
        }
    }
}

impl HeapConfig {
    /// Configuration from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Configuration from an arbitrary key lookup (tests pass a map).
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(chunk) = lookup("TAGHEAP_CHUNK_SIZE").and_then(|v| parse_usize(&v)) {
            config = config.with_chunk_size(chunk);
        }
        let threshold = lookup("TAGHEAP_SPLIT_THRESHOLD")
            .and_then(|v| parse_usize(&v))
            .unwrap_or(DEFAULT_SPLIT_THRESHOLD);
        config.placement = lookup("TAGHEAP_PLACEMENT")
            .and_then(|v| PlacementPolicy::from_name(&v, threshold))
            .unwrap_or(PlacementPolicy::SizeThreshold { threshold });
        if let Some(check) = lookup("TAGHEAP_CHECK") {
            config.check = CheckLevel::from_str_loose(&check);
        }
        if let Some(level) = lookup("TAGHEAP_LOG").and_then(|v| HeapLogLevel::from_name(&v)) {
            config.log_level = level;
        }
        config
    }

    /// Set the chunk size, rounded up to the alignment (zero keeps the default).
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        if chunk_size > 0 {
            if let Some(aligned) = align_up(chunk_size) {
                self.chunk_size = aligned;
            }
        }
        self
    }

    #[must_use]
    pub fn with_placement(mut self, placement: PlacementPolicy) -> Self {
        self.placement = placement;
        self
    }

    #[must_use]
    pub fn with_check(mut self, check: CheckLevel) -> Self {
        self.check = check;
        self
    }

    #[must_use]
    pub fn with_log_level(mut self, log_level: HeapLogLevel) -> Self {
        self.log_level = log_level;
        self
    }

    #[must_use]
    pub fn with_max_arena_bytes(mut self, max_arena_bytes: usize) -> Self {
        self.max_arena_bytes = max_arena_bytes;
        self
    }
}

/// Decimal or `0x`-prefixed hex, underscores allowed.
fn parse_usize(raw: &str) -> Option<usize> {
    let cleaned: String = raw.trim().chars().filter(|&c| c != '_').collect();
    match cleaned
        .strip_prefix("0x")
        .or_else(|| cleaned.strip_prefix("0X"))
    {
        Some(hex) => usize::from_str_radix(hex, 16).ok(),
        None => cleaned.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn parse_check_levels() {
        assert_eq!(CheckLevel::from_str_loose("off"), CheckLevel::Off);
        assert_eq!(CheckLevel::from_str_loose("VALIDATE"), CheckLevel::Validate);
        assert_eq!(CheckLevel::from_str_loose("on"), CheckLevel::Validate);
        assert_eq!(CheckLevel::from_str_loose("paranoid"), CheckLevel::Paranoid);
        assert_eq!(CheckLevel::from_str_loose("full"), CheckLevel::Paranoid);
        assert_eq!(CheckLevel::from_str_loose("bogus"), CheckLevel::Off);
    }

    #[test]
    fn default_is_unchecked() {
        assert_eq!(CheckLevel::default(), CheckLevel::Off);
        assert!(!CheckLevel::Off.validates_pointers());
        assert!(CheckLevel::Validate.validates_pointers());
        assert!(!CheckLevel::Validate.scans_after_each_op());
        assert!(CheckLevel::Paranoid.scans_after_each_op());
    }

    #[test]
    fn threshold_policy_splits_on_strictly_greater() {
        let policy = PlacementPolicy::default();
        assert_eq!(policy.side(96), SplitSide::Back);
        assert_eq!(policy.side(100), SplitSide::Back);
        assert_eq!(policy.side(112), SplitSide::Front);
        assert_eq!(PlacementPolicy::AlwaysBack.side(4096), SplitSide::Back);
        assert_eq!(PlacementPolicy::AlwaysFront.side(32), SplitSide::Front);
    }

    #[test]
    fn placement_names_round_trip() {
        for policy in [
            PlacementPolicy::default(),
            PlacementPolicy::AlwaysFront,
            PlacementPolicy::AlwaysBack,
        ] {
            assert_eq!(
                PlacementPolicy::from_name(policy.name(), DEFAULT_SPLIT_THRESHOLD),
                Some(policy)
            );
        }
        assert_eq!(PlacementPolicy::from_name("spiral", 1), None);
    }

    #[test]
    fn env_overrides_apply() {
        let config = HeapConfig::from_lookup(lookup_from(&[
            ("TAGHEAP_CHUNK_SIZE", "0x2000"),
            ("TAGHEAP_SPLIT_THRESHOLD", "256"),
            ("TAGHEAP_CHECK", "paranoid"),
            ("TAGHEAP_LOG", "trace"),
        ]));
        assert_eq!(config.chunk_size, 0x2000);
        assert_eq!(
            config.placement,
            PlacementPolicy::SizeThreshold { threshold: 256 }
        );
        assert_eq!(config.check, CheckLevel::Paranoid);
        assert_eq!(config.log_level, HeapLogLevel::Trace);
    }

    #[test]
    fn bad_env_values_fall_back() {
        let config = HeapConfig::from_lookup(lookup_from(&[
            ("TAGHEAP_CHUNK_SIZE", "lots"),
            ("TAGHEAP_PLACEMENT", "spiral"),
            ("TAGHEAP_LOG", "loud"),
        ]));
        assert_eq!(config, HeapConfig::default());
    }

    #[test]
    fn chunk_size_is_aligned() {
        assert_eq!(HeapConfig::default().with_chunk_size(1000).chunk_size, 1008);
        assert_eq!(
            HeapConfig::default().with_chunk_size(0).chunk_size,
            DEFAULT_CHUNK_SIZE
        );
        assert_eq!(parse_usize("4_096"), Some(4096));
    }
}
