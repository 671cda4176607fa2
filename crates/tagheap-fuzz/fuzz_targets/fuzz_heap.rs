#![no_main]
use libfuzzer_sys::fuzz_target;
use tagheap_core::{ALIGNMENT, CheckLevel, Heap, HeapConfig, PlacementPolicy};

fuzz_target!(|data: &[u8]| {
    if data.len() < 5 {
        return;
    }

    // First byte picks the placement policy and check level.
    let placement = match data[0] % 3 {
        0 => PlacementPolicy::default(),
        1 => PlacementPolicy::AlwaysFront,
        _ => PlacementPolicy::AlwaysBack,
    };
    let check = if data[0] & 0x80 != 0 {
        CheckLevel::Validate
    } else {
        CheckLevel::Off
    };
    let config = HeapConfig::default()
        .with_placement(placement)
        .with_check(check)
        .with_max_arena_bytes(1 << 22);
    let mut heap: Heap = Heap::with_config(config);
    if heap.init().is_err() {
        return;
    }
    let mut live: Vec<(usize, usize)> = Vec::new();

    for chunk in data[1..].chunks_exact(4) {
        let op = chunk[0] % 5;
        let size = u16::from_le_bytes([chunk[1], chunk[2]]) as usize;
        let pick = chunk[3] as usize;

        match op {
            0 => {
                if let Some(ptr) = heap.allocate(size) {
                    live.push((ptr, size));
                }
            }
            1 => {
                if let Some(ptr) = heap.calloc(chunk[3] as usize % 16 + 1, size % 4096) {
                    assert!(heap.payload(ptr).expect("live").iter().all(|&b| b == 0));
                    live.push((ptr, (chunk[3] as usize % 16 + 1) * (size % 4096)));
                }
            }
            2 => {
                if !live.is_empty() {
                    let (ptr, _) = live.swap_remove(pick % live.len());
                    heap.release(ptr);
                }
            }
            3 => {
                if !live.is_empty() {
                    let idx = pick % live.len();
                    match heap.resize(live[idx].0, size) {
                        Some(ptr) => live[idx] = (ptr, size),
                        None if size == 0 => {
                            live.swap_remove(idx);
                        }
                        None => {}
                    }
                }
            }
            _ => {
                // Garbage offsets must be ignored when validation is on.
                if check == CheckLevel::Validate {
                    heap.release(size | 1);
                }
            }
        }

        for &(ptr, size) in &live {
            assert_eq!(ptr % ALIGNMENT, 0);
            assert!(heap.usable_size(ptr).expect("live") >= size);
        }
        let violations = heap.check();
        assert!(violations.is_empty(), "{violations:?}");
    }

    for (ptr, _) in live {
        heap.release(ptr);
    }
    assert_eq!(heap.stats().allocated_blocks, 0);
});
