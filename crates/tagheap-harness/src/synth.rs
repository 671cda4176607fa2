//! Deterministic synthetic trace generation.
//!
//! Every profile ends by releasing whatever is still live, so generated traces are
//! balanced. The same `(profile, seed, ops, max_size)` always yields the same trace.

use crate::trace::{Trace, TraceOp};

/// Workload shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Profile {
    /// Random mix of allocate, release and resize.
    Churn,
    /// Waves of growing allocations released together.
    Sawtooth,
    /// A few blocks grown step by step among short-lived small blocks.
    ReallocGrowth,
    /// Alternating small/large blocks, the large ones released and then requested
    /// back slightly bigger so the holes cannot be reused.
    Binary,
}

impl Profile {
    pub const ALL: [Self; 4] = [
        Self::Churn,
        Self::Sawtooth,
        Self::ReallocGrowth,
        Self::Binary,
    ];

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().replace('_', "-").as_str() {
            "churn" | "random" => Some(Self::Churn),
            "sawtooth" => Some(Self::Sawtooth),
            "realloc-growth" | "realloc" => Some(Self::ReallocGrowth),
            "binary" => Some(Self::Binary),
            _ => None,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Churn => "churn",
            Self::Sawtooth => "sawtooth",
            Self::ReallocGrowth => "realloc-growth",
            Self::Binary => "binary",
        }
    }
}

/// xorshift64* generator.
#[derive(Clone, Copy, Debug)]
pub struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        // Zero is a fixed point of the shift sequence.
        Self {
            state: if seed == 0 { 0x9E37_79B9_7F4A_7C15 } else { seed },
        }
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    pub fn gen_range(&mut self, low: usize, high_inclusive: usize) -> usize {
        debug_assert!(low <= high_inclusive);
        let span = high_inclusive - low + 1;
        low + (self.next_u64() as usize % span)
    }
}

struct Builder {
    rng: XorShift64,
    ops: Vec<TraceOp>,
    sizes: Vec<usize>,
    live: Vec<usize>,
    live_bytes: usize,
    peak_bytes: usize,
}

impl Builder {
    fn new(seed: u64) -> Self {
        Self {
            rng: XorShift64::new(seed),
            ops: Vec::new(),
            sizes: Vec::new(),
            live: Vec::new(),
            live_bytes: 0,
            peak_bytes: 0,
        }
    }

    fn alloc(&mut self, size: usize) -> usize {
        let id = self.sizes.len();
        self.sizes.push(size);
        self.live.push(id);
        self.ops.push(TraceOp::Alloc { id, size });
        self.grow_live(size);
        id
    }

    fn realloc(&mut self, id: usize, size: usize) {
        self.live_bytes -= self.sizes[id];
        self.sizes[id] = size;
        self.ops.push(TraceOp::Realloc { id, size });
        self.grow_live(size);
    }

    fn free(&mut self, id: usize) {
        if let Some(pos) = self.live.iter().position(|&live| live == id) {
            self.live.swap_remove(pos);
            self.live_bytes -= self.sizes[id];
            self.ops.push(TraceOp::Free { id });
        }
    }

    fn random_live(&mut self) -> Option<usize> {
        if self.live.is_empty() {
            return None;
        }
        let idx = self.rng.gen_range(0, self.live.len() - 1);
        Some(self.live[idx])
    }

    fn grow_live(&mut self, size: usize) {
        self.live_bytes += size;
        self.peak_bytes = self.peak_bytes.max(self.live_bytes);
    }

    fn finish(mut self) -> Trace {
        let mut remaining = std::mem::take(&mut self.live);
        remaining.sort_unstable();
        for id in remaining {
            self.ops.push(TraceOp::Free { id });
        }
        Trace {
            suggested_heap_size: self.peak_bytes,
            num_ids: self.sizes.len(),
            weight: 1,
            ops: self.ops,
        }
    }
}

/// Generate about `ops` operations (plus the closing releases) with request sizes
/// up to `max_size` bytes. `Binary` deliberately re-requests 16 bytes more than
/// that bound.
#[must_use]
pub fn synthesize(profile: Profile, seed: u64, ops: usize, max_size: usize) -> Trace {
    let max_size = max_size.max(16);
    let mut b = Builder::new(seed);
    match profile {
        Profile::Churn => churn(&mut b, ops, max_size),
        Profile::Sawtooth => sawtooth(&mut b, ops, max_size),
        Profile::ReallocGrowth => realloc_growth(&mut b, ops, max_size),
        Profile::Binary => binary(&mut b, ops, max_size),
    }
    b.finish()
}

fn churn(b: &mut Builder, ops: usize, max_size: usize) {
    while b.ops.len() < ops {
        let roll = b.rng.gen_range(0, 99);
        let size = b.rng.gen_range(1, max_size);
        match b.random_live() {
            Some(id) if roll >= 80 => b.realloc(id, size),
            Some(id) if roll >= 45 => b.free(id),
            _ => {
                b.alloc(size);
            }
        }
    }
}

fn sawtooth(b: &mut Builder, ops: usize, max_size: usize) {
    while b.ops.len() < ops {
        let wave = b.rng.gen_range(8, 32);
        let step = (max_size / wave).max(1);
        let ids: Vec<usize> = (1..=wave).map(|i| b.alloc(i * step)).collect();
        // Keep every fourth block so the teeth slowly ratchet upward.
        for (i, id) in ids.into_iter().enumerate() {
            if i % 4 != 3 {
                b.free(id);
            }
        }
    }
}

fn realloc_growth(b: &mut Builder, ops: usize, max_size: usize) {
    let growers = b.rng.gen_range(1, 4);
    let mut growing: Vec<usize> = (0..growers)
        .map(|_| {
            let size = b.rng.gen_range(1, 64);
            b.alloc(size)
        })
        .collect();
    let mut small: Vec<usize> = Vec::new();

    while b.ops.len() < ops {
        let slot = b.rng.gen_range(0, growing.len() - 1);
        let id = growing[slot];
        let next = b.sizes[id] + b.rng.gen_range(1, (max_size / 8).max(1));
        if next > max_size {
            b.free(id);
            let size = b.rng.gen_range(1, 64);
            growing[slot] = b.alloc(size);
        } else {
            b.realloc(id, next);
        }

        let size = b.rng.gen_range(16, 64);
        small.push(b.alloc(size));
        if small.len() > 8 {
            let victim = small.remove(0);
            b.free(victim);
        }
    }
}

fn binary(b: &mut Builder, ops: usize, max_size: usize) {
    let large_low = (max_size / 2).max(1);
    while b.ops.len() < ops {
        let pairs = b.rng.gen_range(8, 24);
        let mut smalls = Vec::with_capacity(pairs);
        let mut larges = Vec::with_capacity(pairs);
        for _ in 0..pairs {
            let small = b.rng.gen_range(8, 64);
            smalls.push(b.alloc(small));
            let large = b.rng.gen_range(large_low, max_size);
            larges.push(b.alloc(large));
        }
        for id in larges {
            b.free(id);
        }
        let bigger: Vec<usize> = (0..pairs).map(|_| b.alloc(max_size + 16)).collect();
        for id in smalls.into_iter().chain(bigger) {
            b.free(id);
        }
    }
}
