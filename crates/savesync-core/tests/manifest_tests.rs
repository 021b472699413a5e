use savesync_core::codec::PathCodec;
use savesync_core::manifest::{FileChecksumRecord, GameUploadData, ManifestStore};
use std::fs;
use std::sync::Arc;
use tempfile::tempdir;

fn record(portable: &str, checksum: &str) -> FileChecksumRecord {
    FileChecksumRecord {
        checksum: checksum.to_string(),
        size: 42,
        last_modified_ms: 1_700_000_000_000,
        last_upload: None,
        portable_path: portable.to_string(),
    }
}

#[tokio::test]
async fn test_save_load_round_trip() {
    let dir = tempdir().unwrap();
    let store = ManifestStore::at_path(dir.path().join("manifest.json"));

    let mut data = GameUploadData::default();
    data.upsert_record(record("%GAMEPATH%\\Saves\\slot1.sav", "abc123"));
    data.play_time_secs = 360;
    data.provider = "dropbox".to_string();
    store.save(&data).await.unwrap();

    let loaded = store.load().await;
    assert_eq!(loaded.files.len(), 1);
    assert_eq!(
        loaded
            .find_record("%GAMEPATH%\\Saves\\slot1.sav")
            .unwrap()
            .checksum,
        "abc123"
    );
    assert_eq!(loaded.play_time_secs, 360);
    assert_eq!(loaded.provider, "dropbox");
    assert!(loaded.sync_enabled);
}

#[tokio::test]
async fn test_missing_manifest_loads_empty() {
    let dir = tempdir().unwrap();
    let store = ManifestStore::at_path(dir.path().join("missing.json"));
    let data = store.load().await;
    assert!(data.files.is_empty());
    assert!(data.sync_enabled);
}

#[tokio::test]
async fn test_corrupt_manifest_loads_empty() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("manifest.json");
    fs::write(&path, b"{ not valid json").unwrap();

    let store = ManifestStore::at_path(path);
    let data = store.load().await;
    assert!(data.files.is_empty());
}

#[tokio::test]
async fn test_save_failure_propagates() {
    let dir = tempdir().unwrap();
    // A regular file where the manifest directory should be makes every
    // write attempt fail.
    let blocker = dir.path().join("blocker");
    fs::write(&blocker, b"in the way").unwrap();

    let store = ManifestStore::at_path(blocker.join("manifest.json"));
    let result = store.save(&GameUploadData::default()).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_concurrent_updates_never_interleave() {
    let dir = tempdir().unwrap();
    let store = Arc::new(ManifestStore::at_path(dir.path().join("manifest.json")));

    // Each update is load-mutate-save; without the manifest lock the
    // read-modify-write cycles would lose increments.
    let mut handles = Vec::new();
    for _ in 0..20 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            store
                .update(|data| data.play_time_secs += 1)
                .await
                .unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(store.load().await.play_time_secs, 20);
}

#[tokio::test]
async fn test_migrate_rewrites_legacy_keys() {
    let dir = tempdir().unwrap();
    let store = ManifestStore::at_path(dir.path().join("manifest.json"));

    // A manifest written before portable encoding: keys are raw
    // emulation-layer absolute paths.
    let legacy_key = "/home/user/.wine/drive_c/users/bob/AppData/Roaming/Game/save.dat";
    let mut data = GameUploadData::default();
    data.files
        .insert(legacy_key.to_string(), record(legacy_key, "abc"));
    store.save(&data).await.unwrap();

    let emu = savesync_core::codec::EmulationPrefix::new("/home/user/.wine", "bob");
    let codec = PathCodec::with_roots("/home/user/games/foo", Some(emu), Vec::new());

    let rewritten = store.migrate_paths_if_needed(&codec).await.unwrap();
    assert_eq!(rewritten, 1);

    let migrated = store.load().await;
    let record = migrated.find_record("%APPDATA%\\Game\\save.dat").unwrap();
    assert_eq!(record.checksum, "abc");
    assert_eq!(record.portable_path, "%APPDATA%\\Game\\save.dat");
    assert!(migrated.files.get(legacy_key).is_none());

    // Idempotent: nothing left to rewrite.
    assert_eq!(store.migrate_paths_if_needed(&codec).await.unwrap(), 0);
}

#[tokio::test]
async fn test_migrate_rewrites_legacy_blacklist_keys() {
    let dir = tempdir().unwrap();
    let store = ManifestStore::at_path(dir.path().join("manifest.json"));

    let legacy_key = "/home/user/.wine/drive_c/users/bob/AppData/Roaming/Game/cache.bin";
    let mut data = GameUploadData::default();
    data.blacklist
        .insert(legacy_key.to_string(), record(legacy_key, "def"));
    store.save(&data).await.unwrap();

    let emu = savesync_core::codec::EmulationPrefix::new("/home/user/.wine", "bob");
    let codec = PathCodec::with_roots("/home/user/games/foo", Some(emu), Vec::new());

    assert_eq!(store.migrate_paths_if_needed(&codec).await.unwrap(), 1);

    let migrated = store.load().await;
    assert!(migrated.is_blacklisted("%APPDATA%\\Game\\cache.bin"));
    assert!(migrated.blacklist.get(legacy_key).is_none());
    assert_eq!(
        migrated.blacklist["%APPDATA%\\Game\\cache.bin"].portable_path,
        "%APPDATA%\\Game\\cache.bin"
    );

    assert_eq!(store.migrate_paths_if_needed(&codec).await.unwrap(), 0);
}

#[tokio::test]
async fn test_migrate_keeps_unrecognized_keys() {
    let dir = tempdir().unwrap();
    let store = ManifestStore::at_path(dir.path().join("manifest.json"));

    let odd_key = "/mnt/somewhere/else/save.dat";
    let mut data = GameUploadData::default();
    data.files.insert(odd_key.to_string(), record(odd_key, "x"));
    store.save(&data).await.unwrap();

    let codec = PathCodec::with_roots("/home/user/games/foo", None, Vec::new());
    assert_eq!(store.migrate_paths_if_needed(&codec).await.unwrap(), 0);
    assert!(store.load().await.files.contains_key(odd_key));
}

#[tokio::test]
async fn test_manifest_json_shape_is_stable() {
    // The on-disk field names are a compatibility surface between
    // installations; renaming any of them breaks cross-machine restore.
    let dir = tempdir().unwrap();
    let store = ManifestStore::at_path(dir.path().join("manifest.json"));

    let mut data = GameUploadData::default();
    data.upsert_record(record("%GAMEPATH%\\a.sav", "ff00"));
    store.save(&data).await.unwrap();

    let raw: serde_json::Value =
        serde_json::from_slice(&fs::read(store.path()).unwrap()).unwrap();
    assert!(raw.get("files").is_some());
    assert!(raw.get("blacklist").is_some());
    assert!(raw.get("sync_enabled").is_some());
    assert!(raw.get("play_time_secs").is_some());
    let entry = &raw["files"]["%GAMEPATH%\\a.sav"];
    assert_eq!(entry["checksum"], "ff00");
    assert_eq!(entry["size"], 42);
    assert!(entry.get("last_modified_ms").is_some());
    assert!(entry.get("portable_path").is_some());
}
