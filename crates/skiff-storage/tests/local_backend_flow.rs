//! End-to-end storage flow over the local backend: key resolution, chunked
//! multipart assembly, ranged retrieval, and factory fallback working
//! together the way the upload pipeline drives them.

use bytes::Bytes;
use futures::StreamExt;
use skiff_core::{StorageProvider, StorageSettings};
use skiff_storage::{keys, ByteRange, CompletedPart, StorageBackendKind, StorageFactory};
use uuid::Uuid;

fn settings(provider: StorageProvider, dir: &std::path::Path) -> StorageSettings {
    StorageSettings {
        provider,
        s3_bucket: None,
        s3_region: None,
        s3_endpoint: None,
        local_storage_path: dir.to_string_lossy().into_owned(),
        public_base_url: "http://localhost:4000".to_string(),
    }
}

async fn collect(mut stream: skiff_storage::ByteStream) -> Vec<u8> {
    let mut out = Vec::new();
    while let Some(chunk) = stream.next().await {
        out.extend_from_slice(&chunk.unwrap());
    }
    out
}

#[tokio::test]
async fn chunked_upload_flow_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let factory = StorageFactory::new(settings(StorageProvider::Local, dir.path()));
    let backend = factory.get_active().await.unwrap();

    let owner = Uuid::new_v4();
    let filename = keys::slugify_filename("Big Upload.BIN");
    assert_eq!(filename, "big-upload.bin");
    let key = keys::storage_key(owner, &filename);

    // Three parts shaped like a 12 MiB file at 5 MiB chunks, scaled down.
    let chunk = 512usize;
    let part1: Vec<u8> = vec![b'a'; chunk];
    let part2: Vec<u8> = vec![b'b'; chunk];
    let part3: Vec<u8> = vec![b'c'; chunk / 2];
    let whole: Vec<u8> = [part1.clone(), part2.clone(), part3.clone()].concat();

    let upload_id = backend
        .begin_multipart(&key, "application/octet-stream")
        .await
        .unwrap();

    // Concurrent-style out-of-order arrival.
    let id3 = backend
        .acknowledge_part(&key, &upload_id, 3, Bytes::from(part3))
        .await
        .unwrap();
    let id1 = backend
        .acknowledge_part(&key, &upload_id, 1, Bytes::from(part1))
        .await
        .unwrap();
    let id2 = backend
        .acknowledge_part(&key, &upload_id, 2, Bytes::from(part2))
        .await
        .unwrap();

    backend
        .complete_multipart(
            &key,
            &upload_id,
            &[
                CompletedPart {
                    part_number: 1,
                    part_id: id1,
                },
                CompletedPart {
                    part_number: 2,
                    part_id: id2,
                },
                CompletedPart {
                    part_number: 3,
                    part_id: id3,
                },
            ],
        )
        .await
        .unwrap();

    // Full-body round trip.
    let body = collect(backend.open_stream(&key, None).await.unwrap()).await;
    assert_eq!(body, whole);
    assert_eq!(backend.size(&key).await.unwrap(), whole.len() as u64);

    // Arbitrary ranges come back as exact slices.
    for (start, end) in [(0u64, 0u64), (10, 99), (511, 512), (1000, 1279)] {
        let ranged = collect(
            backend
                .open_stream(&key, Some(ByteRange::new(start, end)))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(ranged.len() as u64, end - start + 1);
        assert_eq!(ranged, whole[start as usize..=end as usize].to_vec());
    }
}

#[tokio::test]
async fn misconfigured_object_storage_falls_back_to_local() {
    let dir = tempfile::tempdir().unwrap();
    let factory = StorageFactory::new(settings(StorageProvider::ObjectStorage, dir.path()));

    let backend = factory.get_active().await.unwrap();
    assert_eq!(backend.kind(), StorageBackendKind::Local);

    // The fallback backend is fully functional.
    backend
        .put("files/x/probe.txt", Bytes::from_static(b"probe"), "text/plain")
        .await
        .unwrap();
    assert_eq!(backend.size("files/x/probe.txt").await.unwrap(), 5);
}

#[tokio::test]
async fn owner_namespace_rename_carries_objects() {
    let dir = tempfile::tempdir().unwrap();
    let factory = StorageFactory::new(settings(StorageProvider::Local, dir.path()));
    let backend = factory.get_active().await.unwrap();

    let old_owner = Uuid::new_v4();
    let new_owner = Uuid::new_v4();

    for name in ["a.txt", "b.txt", "c.txt"] {
        backend
            .put(
                &keys::storage_key(old_owner, name),
                Bytes::from_static(b"x"),
                "text/plain",
            )
            .await
            .unwrap();
    }

    let moved = backend
        .rename_prefix(&keys::owner_prefix(old_owner), &keys::owner_prefix(new_owner))
        .await
        .unwrap();
    assert_eq!(moved, 3);

    assert!(backend
        .size(&keys::storage_key(new_owner, "b.txt"))
        .await
        .is_ok());
    assert!(backend
        .size(&keys::storage_key(old_owner, "b.txt"))
        .await
        .is_err());
}
