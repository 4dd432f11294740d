#![allow(missing_docs)]

mod common;

use colstore::storage::column::{Applied, Expansion, ReplValue};
use colstore::types::PageId;
use colstore::{ErrorKind, Result};

#[test]
fn run_member_delete_expands_then_appends() -> Result<()> {
    // Runs 0..=2 cover 70..=99; run 3 covers 100..=109.
    let (tree, _) = common::rcc_tree(70, &[10, 10, 10, 10, 5])?;
    let page = tree.root();

    assert_eq!(tree.delete(105)?, Applied::Expansion);
    let entries: Vec<&Expansion> = page.expansions(3).collect();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].run_offset(), 5);
    assert_eq!(entries[0].replacements().count(), 1);
    assert!(entries[0].head().unwrap().is_tombstone());

    assert_eq!(tree.delete(105)?, Applied::AppendedToExpansion);
    assert_eq!(page.expansions(3).count(), 1);
    let entry = page.find_expansion(3, 5).unwrap();
    let chain: Vec<_> = entry.replacements().collect();
    assert_eq!(chain.len(), 2);
    assert!(chain.iter().all(|repl| repl.is_tombstone()));

    for other in [0, 1, 2, 4] {
        assert_eq!(page.expansions(other).count(), 0);
    }
    assert_eq!(tree.get(105)?, None);
    assert_eq!(tree.get(104)?, Some(b"d".to_vec()));
    assert_eq!(tree.get(106)?, Some(b"d".to_vec()));
    Ok(())
}

#[test]
fn repeated_deletes_keep_every_generation() -> Result<()> {
    let (tree, _) = common::rcc_tree(1, &[50])?;
    tree.update(20, b"x")?;
    for _ in 0..7 {
        tree.delete(20)?;
    }
    tree.update(20, b"y")?;

    let entry = tree.root().find_expansion(0, 19).unwrap();
    let values: Vec<ReplValue> = entry
        .replacements()
        .map(|repl| repl.value().clone())
        .collect();
    assert_eq!(values.len(), 9);
    assert_eq!(values[0], ReplValue::Data(b"y".to_vec().into_boxed_slice()));
    assert_eq!(values[8], ReplValue::Data(b"x".to_vec().into_boxed_slice()));
    assert!(values[1..8].iter().all(|v| *v == ReplValue::Deleted));
    assert_eq!(tree.get(20)?, Some(b"y".to_vec()));
    Ok(())
}

#[test]
fn distinct_offsets_in_one_run_get_distinct_entries() -> Result<()> {
    let (tree, _) = common::rcc_tree(0, &[8])?;
    for recno in [3, 0, 7, 3] {
        tree.delete(recno)?;
    }
    let mut offsets: Vec<u32> = tree
        .root()
        .expansions(0)
        .map(Expansion::run_offset)
        .collect();
    offsets.sort_unstable();
    assert_eq!(offsets, vec![0, 3, 7]);
    let snap = tree.stats_snapshot();
    assert_eq!(snap.expansions_installed, 3);
    assert_eq!(snap.expansion_appends, 1);
    assert_eq!(snap.arrays_adopted, 1);
    Ok(())
}

#[test]
fn uncompressed_delete_twice_leaves_tombstone() -> Result<()> {
    let (tree, _) = common::fixed_tree(1, 1, 16)?;
    let page = tree.root();
    assert_eq!(tree.delete(5)?, Applied::Replacement);
    assert!(page.replacements(4).next().unwrap().is_tombstone());
    assert_eq!(tree.delete(5)?, Applied::Replacement);
    assert!(page.replacements(4).next().unwrap().is_tombstone());
    assert_eq!(page.replacements(4).count(), 2);
    assert!(page.expansion_array().is_none());
    assert_eq!(tree.stats_snapshot().arrays_adopted, 1);
    assert_eq!(tree.get(5)?, None);
    assert_eq!(tree.get(6)?, Some(b"5".to_vec()));
    Ok(())
}

#[test]
fn update_after_delete_revives_record() -> Result<()> {
    let (tree, _) = common::fixed_tree(1, 1, 4)?;
    tree.delete(2)?;
    tree.update(2, b"z")?;
    assert_eq!(tree.get(2)?, Some(b"z".to_vec()));
    Ok(())
}

#[test]
fn modifications_mark_page_dirty() -> Result<()> {
    let (tree, _) = common::fixed_tree(1, 2, 4)?;
    let leaf = tree.page(PageId(1)).unwrap();
    assert!(!leaf.is_dirty());
    tree.delete(6)?;
    assert!(leaf.is_dirty());
    assert_eq!(leaf.write_gen(), 1);
    assert!(!tree.root().is_dirty());
    Ok(())
}

#[test]
fn pages_are_released_after_every_operation() -> Result<()> {
    let (tree, _) = common::fixed_tree(1, 3, 4)?;
    tree.delete(6)?;
    tree.update(10, b"q")?;
    assert_eq!(tree.get(7)?, Some(b"2".to_vec()));
    assert!(tree.delete(99).is_err());
    for page in &tree.pages()[1..] {
        assert_eq!(page.pin_count(), 0, "page {} left pinned", page.id());
    }
    assert_eq!(tree.root().pin_count(), 1);
    Ok(())
}

#[test]
fn missing_record_reports_not_found() -> Result<()> {
    let (tree, alloc) = common::rcc_tree(100, &[10])?;
    let err = tree.delete(110).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(alloc.stats().allocations, 0);
    assert!(!tree.root().is_dirty());
    Ok(())
}
