#![allow(missing_docs)]

mod common;

use std::fs;

use colstore::storage::column::{read_column_file, write_column_file, ImageBuilder};
use colstore::{Applied, ColumnOptions, ColumnTree, ErrorKind, Result};

fn rcc_images() -> Result<Vec<Vec<u8>>> {
    let mut first = ImageBuilder::repeat_compressed(1, 1);
    first.push_run(100, b"p")?.push_run(50, b"q")?;
    let mut second = ImageBuilder::repeat_compressed(151, 1);
    second.push_run(10, b"r")?;
    Ok(vec![first.finish(), second.finish()])
}

#[test]
fn opened_file_supports_deletes() -> Result<()> {
    common::init_tracing();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("tree.col");
    write_column_file(&path, &rcc_images()?)?;

    let options = ColumnOptions::new().repeat_compression(true).value_len(1);
    let tree = ColumnTree::open_file(&path, options)?;
    assert_eq!(tree.pages().len(), 2);
    assert_eq!(tree.record_count()?, 160);
    assert_eq!(tree.get(120)?, Some(b"q".to_vec()));

    assert_eq!(tree.delete(120)?, Applied::Expansion);
    assert_eq!(tree.delete(155)?, Applied::Expansion);
    assert_eq!(tree.get(120)?, None);
    assert_eq!(tree.get(155)?, None);
    assert_eq!(tree.get(156)?, Some(b"r".to_vec()));
    assert_eq!(tree.delete(161).unwrap_err().kind(), ErrorKind::NotFound);
    Ok(())
}

#[test]
fn overlay_is_not_written_back() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("tree.col");
    let images = rcc_images()?;
    write_column_file(&path, &images)?;
    let before = fs::read(&path)?;

    let options = ColumnOptions::new().repeat_compression(true).value_len(1);
    {
        let tree = ColumnTree::open_file(&path, options.clone())?;
        tree.delete(3)?;
        tree.update(4, b"z")?;
    }
    assert_eq!(fs::read(&path)?, before);
    assert_eq!(read_column_file(&path, true)?, images);

    let reopened = ColumnTree::open_file(&path, options)?;
    assert_eq!(reopened.get(3)?, Some(b"p".to_vec()));
    assert!(!reopened.root().is_dirty());
    Ok(())
}

#[test]
fn corrupt_image_is_rejected_on_open() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("tree.col");
    write_column_file(&path, &rcc_images()?)?;
    let mut raw = fs::read(&path)?;
    // First image byte after the file header and length prefix: the kind.
    raw[16] = 9;
    fs::write(&path, &raw)?;

    let options = ColumnOptions::new().repeat_compression(true).value_len(1);
    assert!(ColumnTree::open_file(&path, options.clone()).is_err());
    assert!(ColumnTree::open_file(&path, options.verify_checksums(false)).is_err());
    Ok(())
}

#[test]
fn options_file_drives_open() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let opts_path = dir.path().join("column.toml");
    fs::write(
        &opts_path,
        "repeat_compression = true\nvalue_len = 1\noverlay_budget_bytes = 4096\n",
    )?;
    let options = ColumnOptions::load(&opts_path)?;
    assert_eq!(options.overlay_budget_bytes, Some(4096));

    let tree = ColumnTree::open(rcc_images()?, options)?;
    tree.delete(1)?;
    assert_eq!(tree.get(1)?, None);
    Ok(())
}
