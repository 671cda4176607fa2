use tagheap_core::{ALIGNMENT, Arena, CheckLevel, Heap, HeapConfig, HeapLogLevel, PlacementPolicy, SharedHeap};

#[derive(Clone, Copy, Debug)]
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        // xorshift64*
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    fn gen_range(&mut self, low: usize, high_inclusive: usize) -> usize {
        assert!(low <= high_inclusive);
        let span = high_inclusive - low + 1;
        low + (self.next_u64() as usize % span)
    }
}

#[derive(Clone, Copy, Debug)]
struct Slot {
    ptr: usize,
    len: usize,
    tag: u8,
}

fn stamp(heap: &mut Heap, slot: Slot) {
    let payload = heap.payload_mut(slot.ptr).expect("live block");
    for (i, byte) in payload[..slot.len].iter_mut().enumerate() {
        *byte = slot.tag ^ (i as u8);
    }
}

fn intact(heap: &Heap, slot: Slot, len: usize) -> bool {
    let payload = heap.payload(slot.ptr).expect("live block");
    payload[..len]
        .iter()
        .enumerate()
        .all(|(i, &b)| b == slot.tag ^ (i as u8))
}

fn assert_disjoint(seed: u64, step: usize, slots: &[Option<Slot>]) {
    let mut ranges: Vec<(usize, usize)> = slots
        .iter()
        .flatten()
        .map(|s| (s.ptr, s.ptr + s.len))
        .collect();
    ranges.sort_unstable();
    for pair in ranges.windows(2) {
        assert!(
            pair[0].1 <= pair[1].0,
            "seed={seed} step={step}: {:?} overlaps {:?}",
            pair[0],
            pair[1]
        );
    }
}

fn run_sequence(seed: u64, steps: usize, placement: PlacementPolicy) {
    const SLOTS: usize = 48;
    let mut heap: Heap = Heap::with_config(HeapConfig::default().with_placement(placement));
    heap.init().expect("init");
    let mut rng = XorShift64::new(seed);
    let mut slots: [Option<Slot>; SLOTS] = [None; SLOTS];

    for step in 0..steps {
        let idx = rng.gen_range(0, SLOTS - 1);
        let roll = rng.gen_range(0, 99);
        // Mostly small sizes with an occasional large one.
        let len = if rng.gen_range(0, 9) == 0 {
            rng.gen_range(1024, 16 * 1024)
        } else {
            rng.gen_range(1, 512)
        };

        match slots[idx] {
            None => {
                let ptr = if roll < 15 {
                    heap.calloc(1, len).expect("calloc")
                } else {
                    heap.allocate(len).expect("allocate")
                };
                assert_eq!(ptr % ALIGNMENT, 0, "seed={seed} step={step}");
                assert!(heap.usable_size(ptr).expect("live") >= len);
                if roll < 15 {
                    assert!(heap.payload(ptr).expect("live").iter().all(|&b| b == 0));
                }
                let slot = Slot {
                    ptr,
                    len,
                    tag: (step % 251) as u8,
                };
                stamp(&mut heap, slot);
                slots[idx] = Some(slot);
            }
            Some(slot) if roll < 50 => {
                assert!(intact(&heap, slot, slot.len), "seed={seed} step={step}");
                heap.release(slot.ptr);
                slots[idx] = None;
            }
            Some(slot) => {
                let ptr = heap.resize(slot.ptr, len).expect("resize");
                assert_eq!(ptr % ALIGNMENT, 0);
                let moved = Slot { ptr, ..slot };
                assert!(
                    intact(&heap, moved, slot.len.min(len)),
                    "seed={seed} step={step}: resize lost data"
                );
                let resized = Slot { len, ..moved };
                stamp(&mut heap, resized);
                slots[idx] = Some(resized);
            }
        }

        let violations = heap.check();
        assert!(
            violations.is_empty(),
            "seed={seed} step={step}: {violations:?}"
        );
        assert_disjoint(seed, step, &slots);
    }

    for slot in slots.iter().flatten() {
        assert!(intact(&heap, *slot, slot.len));
        heap.release(slot.ptr);
    }
    let stats = heap.stats();
    assert_eq!(stats.allocated_blocks, 0);
    // Everything coalesces back into a single free block.
    assert_eq!(stats.free_blocks, 1, "seed={seed}");
}

#[test]
fn deterministic_sequences_hold_invariants() {
    const SEEDS: [u64; 4] = [1, 2, 3, 4];
    for seed in SEEDS {
        run_sequence(seed, 1_500, PlacementPolicy::default());
    }
}

#[test]
fn every_placement_policy_holds_invariants() {
    for placement in [
        PlacementPolicy::AlwaysFront,
        PlacementPolicy::AlwaysBack,
        PlacementPolicy::SizeThreshold { threshold: 512 },
    ] {
        run_sequence(0xC0FFEE, 1_000, placement);
    }
}

#[test]
fn sawtooth_storm_reuses_memory() {
    let mut heap: Heap = Heap::default();
    heap.init().expect("init");
    let mut peak_arena = 0;
    for round in 0..20 {
        let ptrs: Vec<usize> = (1..=64)
            .map(|i| heap.allocate(i * 24).expect("allocate"))
            .collect();
        for p in ptrs.into_iter().rev() {
            heap.release(p);
        }
        if round == 0 {
            peak_arena = heap.arena().len();
        }
        assert_eq!(heap.arena().len(), peak_arena, "round={round}");
        assert!(heap.check().is_empty());
    }
}

#[test]
fn bounded_arena_exhausts_cleanly() {
    let config = HeapConfig::default().with_max_arena_bytes(64 * 1024);
    let mut heap: Heap = Heap::with_config(config);
    heap.init().expect("init");
    let mut rng = XorShift64::new(99);
    let mut live = Vec::new();
    let mut failures = 0;
    for _ in 0..500 {
        match heap.allocate(rng.gen_range(256, 4096)) {
            Some(p) => live.push(p),
            None => failures += 1,
        }
        assert!(heap.check().is_empty());
    }
    assert!(failures > 0);
    assert!(heap.arena().len() <= 64 * 1024);
    assert_eq!(heap.counters().failed_allocs, failures);
    for p in live {
        heap.release(p);
    }
    assert_eq!(heap.stats().free_blocks, 1);
}

#[test]
fn paranoid_heap_stays_quiet_on_valid_traffic() {
    let config = HeapConfig::default()
        .with_check(CheckLevel::Paranoid)
        .with_log_level(HeapLogLevel::Warn);
    let mut heap: Heap = Heap::with_config(config);
    heap.init().expect("init");
    let mut rng = XorShift64::new(7);
    let mut live = Vec::new();
    for _ in 0..300 {
        if live.is_empty() || rng.gen_range(0, 2) > 0 {
            live.push(heap.allocate(rng.gen_range(1, 700)).expect("allocate"));
        } else {
            let idx = rng.gen_range(0, live.len() - 1);
            heap.release(live.swap_remove(idx));
        }
    }
    assert!(heap.lifecycle_logs().is_empty(), "{:?}", heap.lifecycle_logs());
}

#[test]
fn shared_heap_matches_single_owner_results() {
    let shared = SharedHeap::with_config(HeapConfig::default()).expect("shared");
    let mut solo: Heap = Heap::default();
    solo.init().expect("init");
    let mut rng = XorShift64::new(42);
    let mut live = Vec::new();
    for _ in 0..200 {
        let size = rng.gen_range(1, 300);
        if live.is_empty() || rng.gen_range(0, 3) > 0 {
            let a = shared.allocate(size);
            let b = solo.allocate(size);
            assert_eq!(a, b);
            live.push(a.expect("allocate"));
        } else {
            let p = live.swap_remove(rng.gen_range(0, live.len() - 1));
            shared.release(p);
            solo.release(p);
        }
    }
    assert_eq!(shared.stats(), solo.stats());
}
