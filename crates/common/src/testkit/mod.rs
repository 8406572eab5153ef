/// Fixtures for building realistic encrypted trees in tests
///
/// `TestVault` stands in for a whole account: an address keypair, a volume
/// with one share, and helpers that create folders and files with real
/// encryption (wrapped share passphrase, per-node passphrases, signed
/// names). Everything a resolver needs, without any remote.
///
/// # Example
///
/// ```rust,ignore
/// use common::testkit::TestVault;
///
/// #[tokio::test]
/// async fn test_resolve_file() {
///     let mut vault = TestVault::new().await;
///     let folder = vault.add_folder(vault.root(), "docs").await;
///     let file = vault.add_file(folder, "report.pdf", 1024).await;
///
///     let material = vault.resolver().resolve(&file).await.unwrap();
///     assert_eq!(material.name, "report.pdf");
/// }
/// ```
mod monitor;
mod vault;

pub use monitor::RecordingMonitor;
pub use vault::{MapSignerResolver, TestVault};
