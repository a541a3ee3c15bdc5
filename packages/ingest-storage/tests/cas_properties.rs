//! Property-based tests for the §4.1/§8 CAS invariant: `put` is
//! idempotent and content-addressed regardless of how many times, or in
//! what order, a given byte string is stored.

use ingest_model::CasStore;
use ingest_storage::LocalCasStore;
use proptest::prelude::*;

fn write_source(dir: &std::path::Path, bytes: &[u8]) -> std::path::PathBuf {
    let path = dir.join("src.bin");
    std::fs::write(&path, bytes).unwrap();
    path
}

proptest! {
    #[test]
    fn put_is_idempotent_for_arbitrary_bytes(bytes in prop::collection::vec(any::<u8>(), 0..2048)) {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalCasStore::new(dir.path());
        let src = write_source(dir.path(), &bytes);
        let rt = tokio::runtime::Runtime::new().unwrap();

        let (hash_a, path_a, size_a) = rt.block_on(store.put(&src)).unwrap();
        let (hash_b, path_b, size_b) = rt.block_on(store.put(&src)).unwrap();

        prop_assert_eq!(hash_a, hash_b);
        prop_assert_eq!(path_a, path_b);
        prop_assert_eq!(size_a, size_b);
        prop_assert_eq!(size_a, bytes.len() as u64);
    }

    #[test]
    fn distinct_byte_strings_get_distinct_paths(
        a in prop::collection::vec(any::<u8>(), 1..256),
        b in prop::collection::vec(any::<u8>(), 1..256),
    ) {
        prop_assume!(a != b);
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();
        let store_a = LocalCasStore::new(dir_a.path());
        let store_b = LocalCasStore::new(dir_b.path());
        let src_a = write_source(dir_a.path(), &a);
        let src_b = write_source(dir_b.path(), &b);
        let rt = tokio::runtime::Runtime::new().unwrap();

        let (hash_a, _, _) = rt.block_on(store_a.put(&src_a)).unwrap();
        let (hash_b, _, _) = rt.block_on(store_b.put(&src_b)).unwrap();
        prop_assert_ne!(hash_a, hash_b);
    }

    #[test]
    fn path_for_matches_what_put_returns(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalCasStore::new(dir.path());
        let src = write_source(dir.path(), &bytes);
        let rt = tokio::runtime::Runtime::new().unwrap();

        let (hash, path, _) = rt.block_on(store.put(&src)).unwrap();
        prop_assert_eq!(store.path_for(&hash), path);
    }
}
