//! Rename semantics and divergence handling.
//!
//! Renames are copy-then-delete on the store and must carry open handles,
//! attribute changes and parked content along. Failed write-backs must stay
//! visible per path until an upload succeeds.

mod common;

use common::{Fixture, p};
use harborfs_core::{EntryKind, FileSize, HarborError, OpenFlags};

// =============================================================================
// Rename
// =============================================================================

#[tokio::test]
async fn test_rename_file() {
    let fx = Fixture::new();
    fx.write_file("/a", b"payload").await;
    fx.fs.rename(&p("/a"), &p("/b")).await.unwrap();

    assert!(fx.fs.getattr(&p("/a")).await.unwrap_err().is_not_found());
    assert_eq!(fx.read_file("/b").await.unwrap(), b"payload");
    assert_eq!(fx.remote.keys().await, vec!["b"]);
}

#[tokio::test]
async fn test_rename_replaces_existing_file() {
    let fx = Fixture::seeded(&[("src", "new"), ("dst", "old")]).await;
    fx.fs.rename(&p("/src"), &p("/dst")).await.unwrap();
    assert_eq!(fx.read_file("/dst").await.unwrap(), b"new");
    assert_eq!(fx.remote.keys().await, vec!["dst"]);
}

#[tokio::test]
async fn test_rename_directory_carries_open_handles() {
    let fx = Fixture::seeded(&[("d/x", "old"), ("d/y/z", "deep")]).await;
    let fh = fx.fs.open(&p("/d/x"), OpenFlags::read_write()).await.unwrap();
    fx.fs.write(fh, b"new", 0).await.unwrap();

    fx.fs.rename(&p("/d"), &p("/e")).await.unwrap();
    assert_eq!(fx.remote.keys().await, vec!["e/x", "e/y/z"]);
    assert!(fx.fs.readdir(&p("/d")).await.unwrap_err().is_not_found());

    // Unsaved content follows the handle to its new key
    fx.fs.release(fh).await.unwrap();
    assert_eq!(fx.remote.body("e/x").await.unwrap().as_ref(), b"new");
    assert_eq!(fx.read_file("/e/y/z").await.unwrap(), b"deep");
}

#[tokio::test]
async fn test_rename_empty_directory_keeps_it_listable() {
    let fx = Fixture::new();
    fx.fs.mkdir(&p("/old"), 0o755).await.unwrap();
    fx.fs.rename(&p("/old"), &p("/new")).await.unwrap();
    assert_eq!(fx.names("/new").await, vec![".", ".."]);
    assert_eq!(fx.names("/").await, vec![".", "..", "new"]);
}

#[tokio::test]
async fn test_rename_unsaved_file() {
    let fx = Fixture::new();
    let fh = fx
        .fs
        .create(&p("/draft"), OpenFlags::read_write(), 0o644)
        .await
        .unwrap();
    fx.fs.write(fh, b"text", 0).await.unwrap();
    fx.fs.rename(&p("/draft"), &p("/final")).await.unwrap();
    fx.fs.release(fh).await.unwrap();
    assert_eq!(fx.remote.keys().await, vec!["final"]);
}

#[tokio::test]
async fn test_rename_file_over_symlink() {
    let fx = Fixture::seeded(&[("s", "file body")]).await;
    fx.fs.symlink("elsewhere", &p("/t")).await.unwrap();
    fx.fs.rename(&p("/s"), &p("/t")).await.unwrap();

    let attr = fx.fs.getattr(&p("/t")).await.unwrap();
    assert_eq!(attr.kind, EntryKind::File);
    assert_eq!(fx.remote.keys().await, vec!["t"]);
}

#[tokio::test]
async fn test_rename_symlink() {
    let fx = Fixture::new();
    fx.fs.symlink("target", &p("/l1")).await.unwrap();
    fx.fs.rename(&p("/l1"), &p("/l2")).await.unwrap();
    assert_eq!(fx.fs.readlink(&p("/l2")).await.unwrap(), "target");
    assert_eq!(fx.remote.keys().await, vec!["l2.harborfs-link"]);
}

#[tokio::test]
async fn test_rename_conflicts() {
    let fx = Fixture::seeded(&[("f", "x"), ("full/item", "y"), ("d2/z", "z")]).await;
    fx.fs.mkdir(&p("/empty"), 0o755).await.unwrap();

    let err = fx.fs.rename(&p("/f"), &p("/full")).await.unwrap_err();
    assert_eq!(err.to_errno(), libc::EISDIR);
    let err = fx.fs.rename(&p("/full"), &p("/f")).await.unwrap_err();
    assert_eq!(err.to_errno(), libc::ENOTDIR);
    let err = fx.fs.rename(&p("/d2"), &p("/full")).await.unwrap_err();
    assert_eq!(err.to_errno(), libc::ENOTEMPTY);
    let err = fx.fs.rename(&p("/missing"), &p("/x")).await.unwrap_err();
    assert_eq!(err.to_errno(), libc::ENOENT);

    // An empty destination directory is replaced
    fx.fs.rename(&p("/d2"), &p("/empty")).await.unwrap();
    assert_eq!(fx.names("/empty").await, vec![".", "..", "z"]);
}

#[tokio::test]
async fn test_rename_moves_attribute_changes() {
    let fx = Fixture::seeded(&[("a", "x")]).await;
    fx.fs.chmod(&p("/a"), 0o600).await.unwrap();
    fx.fs.rename(&p("/a"), &p("/b")).await.unwrap();
    assert_eq!(fx.fs.getattr(&p("/b")).await.unwrap().perm, 0o600);
}

// =============================================================================
// Divergence
// =============================================================================

async fn fail_release(fx: &Fixture, path: &str, content: &[u8]) -> HarborError {
    let fh = fx
        .fs
        .create(&p(path), OpenFlags::read_write(), 0o644)
        .await
        .unwrap();
    fx.fs.write(fh, content, 0).await.unwrap();
    fx.remote.fail_puts(true);
    let err = fx.fs.release(fh).await.unwrap_err();
    assert_eq!(fx.fs.open_handles(), 0, "release drops the handle even on failure");
    err
}

#[tokio::test]
async fn test_failed_release_is_inconsistent_and_parked() {
    let fx = Fixture::new();
    let err = fail_release(&fx, "/p", b"data").await;

    assert!(matches!(err, HarborError::Inconsistent { ref path, .. } if *path == p("/p")));
    assert_eq!(err.to_errno(), libc::EIO);
    assert!(err.is_retryable());
    assert_eq!(fx.fs.divergent_paths(), vec![p("/p")]);

    // Parked content stays visible through this mount
    let attr = fx.fs.getattr(&p("/p")).await.unwrap();
    assert_eq!(attr.size, FileSize::Known(4));
    assert_eq!(fx.names("/").await, vec![".", "..", "p"]);
}

#[tokio::test]
async fn test_parked_content_is_served_and_uploaded_by_next_release() {
    let fx = Fixture::new();
    fail_release(&fx, "/p", b"data").await;

    let fh = fx.fs.open(&p("/p"), OpenFlags::read_only()).await.unwrap();
    assert_eq!(fx.fs.read(fh, 16, 0).await.unwrap(), b"data");

    fx.remote.fail_puts(false);
    fx.fs.release(fh).await.unwrap();
    assert!(fx.fs.divergent_paths().is_empty());
    assert_eq!(fx.remote.body("p").await.unwrap().as_ref(), b"data");
}

#[tokio::test]
async fn test_retry_divergent() {
    let fx = Fixture::new();
    fail_release(&fx, "/one", b"1").await;
    let fh = fx
        .fs
        .create(&p("/two"), OpenFlags::read_write(), 0o644)
        .await
        .unwrap();
    assert!(fx.fs.release(fh).await.is_err());
    assert_eq!(fx.fs.divergent_paths().len(), 2);

    assert_eq!(fx.fs.retry_divergent().await, 0);
    assert_eq!(fx.fs.divergent_paths().len(), 2);

    fx.remote.fail_puts(false);
    assert_eq!(fx.fs.retry_divergent().await, 2);
    assert!(fx.fs.divergent_paths().is_empty());
    assert_eq!(fx.remote.keys().await, vec!["one", "two"]);
}

#[tokio::test]
async fn test_failed_flush_keeps_handle_dirty() {
    let fx = Fixture::new();
    let fh = fx
        .fs
        .create(&p("/f"), OpenFlags::read_write(), 0o644)
        .await
        .unwrap();
    fx.fs.write(fh, b"keep me", 0).await.unwrap();

    fx.remote.fail_puts(true);
    let err = fx.fs.flush(fh).await.unwrap_err();
    assert_eq!(err.to_errno(), libc::EIO);
    assert!(fx.fs.divergent_paths().is_empty());

    fx.remote.fail_puts(false);
    fx.fs.flush(fh).await.unwrap();
    fx.fs.release(fh).await.unwrap();
    assert_eq!(fx.remote.body("f").await.unwrap().as_ref(), b"keep me");
}

#[tokio::test]
async fn test_unlink_discards_parked_content() {
    let fx = Fixture::new();
    fail_release(&fx, "/gone", b"bytes").await;
    fx.remote.fail_puts(false);

    fx.fs.unlink(&p("/gone")).await.unwrap();
    assert!(fx.fs.divergent_paths().is_empty());
    assert!(fx.fs.getattr(&p("/gone")).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_rename_moves_parked_content() {
    let fx = Fixture::new();
    fail_release(&fx, "/before", b"abc").await;
    fx.remote.fail_puts(false);

    fx.fs.rename(&p("/before"), &p("/after")).await.unwrap();
    assert_eq!(fx.fs.divergent_paths(), vec![p("/after")]);
    assert_eq!(fx.fs.retry_divergent().await, 1);
    assert_eq!(fx.remote.body("after").await.unwrap().as_ref(), b"abc");
}
