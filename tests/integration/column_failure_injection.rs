#![allow(missing_docs)]

mod common;

use colstore::types::PageId;
use colstore::{ColumnOptions, ErrorKind, Result};

#[test]
fn every_failure_point_on_first_expansion_leaves_page_untouched() -> Result<()> {
    // Allocation order: expansion array, entry, replacement.
    for successes in 0..3 {
        let (tree, alloc) = common::rcc_tree(10, &[5, 5])?;
        alloc.fail_after(successes);
        let err = tree.delete(12).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfMemory, "failure point {successes}");

        let page = tree.root();
        assert!(page.expansion_array().is_none());
        assert!(!page.is_dirty());
        assert_eq!(page.write_gen(), 0);
        assert_eq!(alloc.stats().live_bytes, 0);
        assert_eq!(page.pin_count(), 1);
        assert_eq!(tree.stats_snapshot().alloc_failures, 1);
        assert_eq!(tree.get(12)?, Some(b"a".to_vec()));

        tree.delete(12)?;
        assert_eq!(tree.get(12)?, None);
    }
    Ok(())
}

#[test]
fn failed_expansion_with_array_present_keeps_run_chain() -> Result<()> {
    for successes in 0..2 {
        let (tree, alloc) = common::rcc_tree(10, &[5, 5])?;
        tree.delete(11)?;
        let baseline = alloc.stats().live_bytes;

        alloc.fail_after(successes);
        let err = tree.update(13, b"z").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfMemory);

        let page = tree.root();
        assert_eq!(page.expansions(0).count(), 1);
        assert!(page.find_expansion(0, 3).is_none());
        assert_eq!(page.write_gen(), 1);
        assert_eq!(alloc.stats().live_bytes, baseline);
        assert_eq!(tree.get(13)?, Some(b"a".to_vec()));
    }
    Ok(())
}

#[test]
fn failed_append_keeps_existing_generations() -> Result<()> {
    let (tree, alloc) = common::rcc_tree(10, &[5])?;
    tree.delete(14)?;
    tree.update(14, b"k")?;
    let baseline = alloc.stats().live_bytes;

    alloc.fail_after(0);
    assert_eq!(tree.delete(14).unwrap_err().kind(), ErrorKind::OutOfMemory);

    let entry = tree.root().find_expansion(0, 4).unwrap();
    assert_eq!(entry.replacements().count(), 2);
    assert_eq!(entry.head().unwrap().value().data(), Some(&b"k"[..]));
    assert_eq!(alloc.stats().live_bytes, baseline);
    assert_eq!(tree.get(14)?, Some(b"k".to_vec()));
    Ok(())
}

#[test]
fn uncompressed_failure_releases_leaf_pin() -> Result<()> {
    for successes in 0..2 {
        let (tree, alloc) = common::fixed_tree(1, 2, 8)?;
        alloc.fail_after(successes);
        assert_eq!(tree.delete(12).unwrap_err().kind(), ErrorKind::OutOfMemory);

        let leaf = tree.page(PageId(1)).unwrap();
        assert_eq!(leaf.pin_count(), 0);
        assert!(leaf.replacement_array().is_none());
        assert!(!leaf.is_dirty());
        assert_eq!(alloc.stats().live_bytes, 0);
    }
    Ok(())
}

#[test]
fn budget_exhaustion_is_reported_and_recoverable() -> Result<()> {
    let mut builder = colstore::storage::column::ImageBuilder::fixed(0, 1);
    for _ in 0..4 {
        builder.push(b"x")?;
    }
    let options = ColumnOptions::new().value_len(1).overlay_budget_bytes(Some(512));
    let (tree, alloc) = common::open(vec![builder.finish()], options)?;

    let mut applied = 0;
    let err = loop {
        match tree.delete(applied % 4) {
            Ok(_) => applied += 1,
            Err(err) => break err,
        }
        assert!(applied < 1_000, "budget never enforced");
    };
    assert_eq!(err.kind(), ErrorKind::OutOfMemory);
    assert!(applied > 0);

    let page = tree.root();
    let published: usize = (0..4).map(|slot| page.replacements(slot).count()).sum();
    assert_eq!(published as u64, applied);
    assert_eq!(alloc.stats().live_bytes, page.overlay_bytes());
    assert!(alloc.stats().live_bytes <= 512);
    assert_eq!(tree.stats_snapshot().alloc_failures, 1);
    Ok(())
}
