#![allow(missing_docs)]

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Barrier;
use std::thread;

use colstore::storage::column::Expansion;
use colstore::Result;

const WRITERS: usize = 8;

#[test]
fn first_modifications_adopt_one_array() -> Result<()> {
    for _ in 0..20 {
        let (tree, alloc) = common::rcc_tree(0, &[64, 64])?;
        let barrier = Barrier::new(WRITERS);
        thread::scope(|scope| {
            for writer in 0..WRITERS {
                let tree = &tree;
                let barrier = &barrier;
                scope.spawn(move || {
                    barrier.wait();
                    tree.delete(writer as u64 * 3).unwrap();
                });
            }
        });

        let snap = tree.stats_snapshot();
        assert_eq!(snap.arrays_adopted, 1);
        assert!(snap.arrays_discarded < WRITERS as u64);
        let mut offsets: Vec<u32> = tree
            .root()
            .expansions(0)
            .map(Expansion::run_offset)
            .collect();
        offsets.sort_unstable();
        let expected: Vec<u32> = (0..WRITERS as u32).map(|w| w * 3).collect();
        assert_eq!(offsets, expected);
        // Only adopted structures remain charged.
        assert_eq!(alloc.stats().live_bytes, tree.root().overlay_bytes());
    }
    Ok(())
}

#[test]
fn racing_deletes_of_one_record_share_an_entry() -> Result<()> {
    for _ in 0..20 {
        let (tree, alloc) = common::rcc_tree(500, &[10, 30])?;
        let barrier = Barrier::new(WRITERS);
        thread::scope(|scope| {
            for _ in 0..WRITERS {
                let tree = &tree;
                let barrier = &barrier;
                scope.spawn(move || {
                    barrier.wait();
                    tree.delete(525).unwrap();
                });
            }
        });

        let page = tree.root();
        assert_eq!(page.expansions(1).count(), 1);
        let entry = page.find_expansion(1, 15).expect("entry for record 525");
        assert_eq!(entry.replacements().count(), WRITERS);
        let snap = tree.stats_snapshot();
        assert_eq!(snap.expansions_installed, 1);
        assert_eq!(snap.expansion_appends, WRITERS as u64 - 1);
        assert_eq!(page.write_gen(), WRITERS as u64);
        assert_eq!(alloc.stats().live_bytes, page.overlay_bytes());
        assert_eq!(tree.get(525)?, None);
    }
    Ok(())
}

#[test]
fn uncompressed_writers_on_separate_pages() -> Result<()> {
    let (tree, _) = common::fixed_tree(0, 4, 32)?;
    let barrier = Barrier::new(WRITERS);
    thread::scope(|scope| {
        for writer in 0..WRITERS {
            let tree = &tree;
            let barrier = &barrier;
            scope.spawn(move || {
                barrier.wait();
                for round in 0..16u64 {
                    let recno = (writer as u64 * 16 + round) % 128;
                    tree.delete(recno).unwrap();
                }
            });
        }
    });

    let snap = tree.stats_snapshot();
    assert_eq!(snap.replacements_installed, (WRITERS * 16) as u64);
    assert_eq!(snap.arrays_adopted, 4);
    let published: usize = tree
        .pages()
        .iter()
        .flat_map(|page| (0..page.slot_count()).map(move |slot| page.replacements(slot).count()))
        .sum();
    assert_eq!(published, WRITERS * 16);
    for page in &tree.pages()[1..] {
        assert_eq!(page.pin_count(), 0);
    }
    Ok(())
}

#[test]
fn readers_observe_complete_chains_during_writes() -> Result<()> {
    const ROUNDS: usize = 200;
    let (tree, _) = common::rcc_tree(0, &[100])?;
    let barrier = Barrier::new(3);
    let done = AtomicBool::new(false);

    thread::scope(|scope| {
        let writer = {
            let tree = &tree;
            let barrier = &barrier;
            let done = &done;
            scope.spawn(move || {
                barrier.wait();
                for round in 0..ROUNDS {
                    let recno = (round % 10) as u64 * 7;
                    if round % 2 == 0 {
                        tree.delete(recno).unwrap();
                    } else {
                        tree.update(recno, b"u").unwrap();
                    }
                }
                done.store(true, Ordering::Release);
            })
        };

        for _ in 0..2 {
            let tree = &tree;
            let barrier = &barrier;
            let done = &done;
            scope.spawn(move || {
                barrier.wait();
                let mut seen_entries = 0;
                let mut seen_generations = 0;
                loop {
                    let finished = done.load(Ordering::Acquire);
                    let mut entries = 0;
                    let mut generations = 0;
                    for entry in tree.root().expansions(0) {
                        entries += 1;
                        let chain: Vec<_> = entry.replacements().collect();
                        assert!(!chain.is_empty(), "entry published without a replacement");
                        generations += chain.len();
                    }
                    assert!(entries >= seen_entries, "entry vanished");
                    assert!(generations >= seen_generations, "generation vanished");
                    seen_entries = entries;
                    seen_generations = generations;
                    for recno in (0..100).step_by(7) {
                        let value = tree.get(recno).unwrap();
                        assert!(matches!(
                            value.as_deref(),
                            None | Some(b"a") | Some(b"u")
                        ));
                    }
                    if finished {
                        break;
                    }
                }
                assert_eq!(seen_entries, 10);
                assert_eq!(seen_generations, ROUNDS);
            });
        }

        writer.join().unwrap();
    });

    // Even-indexed records are only ever deleted, odd-indexed only updated.
    for idx in 0..10u64 {
        let expected = (idx % 2 == 1).then(|| b"u".to_vec());
        assert_eq!(tree.get(idx * 7)?, expected);
    }
    Ok(())
}
