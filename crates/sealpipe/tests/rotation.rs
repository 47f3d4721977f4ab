//! End-to-end key rotation across several members.

use std::sync::Arc;
use std::time::Duration;

use sealpipe::channel::{ChannelEvent, MemoryNetwork, SecureChannel};
use sealpipe::core::{KeyStore, Manifest};
use sealpipe::store::{MemoryStore, MetadataRecord, SqliteStore, Store, WidgetContent};
use sealpipe::{RecordKind, RotationState, SealpipeError, StrandedRecord};
use sealpipe_testkit::{init_tracing, FlakyStore, Op, SpaceFixture};

#[tokio::test]
async fn three_members_get_two_secrets() {
    init_tracing();
    let fixture = SpaceFixture::new("sales", &["alice", "bob", "carol"]).await;
    let alice = fixture.session(0).await;

    let report = alice.rotate_key().await.unwrap();

    assert_eq!(report.final_state, RotationState::SessionInvalidated);
    assert_eq!(report.old_key_id, fixture.initial_key_id);
    assert_ne!(report.new_key_id, report.old_key_id);
    assert_eq!(report.secrets.len(), 2);

    let new_key = fixture
        .member(0)
        .keys
        .get_key(&report.new_key_id)
        .unwrap();
    let bob = fixture.member(1);
    let carol = fixture.member(2);

    for secret in &report.secrets {
        assert_eq!(secret.key_id, report.new_key_id);
        assert_eq!(secret.owner, fixture.member(0).user);
        assert!(secret.message_id.is_some());
    }

    let for_bob = report
        .secrets
        .iter()
        .find(|s| s.receiver == bob.user)
        .unwrap();
    let for_carol = report
        .secrets
        .iter()
        .find(|s| s.receiver == carol.user)
        .unwrap();

    let raw = bob
        .channel
        .decrypt(&for_bob.owner, &for_bob.ciphertext)
        .await
        .unwrap();
    assert_eq!(&raw[..], new_key.as_bytes());

    // Only the receiver can open a share.
    assert!(carol
        .channel
        .decrypt(&for_bob.owner, &for_bob.ciphertext)
        .await
        .is_err());
    assert!(bob
        .channel
        .decrypt(&for_carol.owner, &for_carol.ciphertext)
        .await
        .is_err());

    // The shares are persisted for offline receivers.
    let pending = fixture
        .store
        .secrets_for(&fixture.handle, &carol.user)
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
}

#[tokio::test]
async fn rotation_reseals_every_sealed_record() {
    let fixture = SpaceFixture::new("sales", &["alice", "bob"]).await;
    let seeded = fixture.seed_content().await;
    let store = &fixture.store;
    let handle = &fixture.handle;

    let plain_before = store
        .get_transformer(handle, &seeded.plain_transformer)
        .await
        .unwrap()
        .unwrap();
    let public_before = store
        .list_widgets(handle)
        .await
        .unwrap()
        .into_iter()
        .find(|w| w.id == "w-public")
        .unwrap();

    let alice = fixture.session(0).await;
    let report = alice.rotate_key().await.unwrap();
    let new = &report.new_key_id;

    assert_eq!(report.metadata, 2);
    assert_eq!(report.concepts, 1);
    assert_eq!(report.widgets, 1);
    assert_eq!(report.transformers, 1);

    assert_eq!(store.get_space(handle).await.unwrap().active_key_id, *new);

    let keys = &fixture.member(0).keys;
    for record in store.list_metadata(handle).await.unwrap() {
        assert!(record.sealed.is_under(new));
        keys.decrypt_metadata(new, &record.sealed).unwrap();
    }
    for concept in store.list_concepts(handle).await.unwrap() {
        assert!(concept.sealed.is_under(new));
    }

    let widgets = store.list_widgets(handle).await.unwrap();
    let internal = widgets.iter().find(|w| w.id == "w-internal").unwrap();
    assert!(internal.sealed().unwrap().is_under(new));
    let public = widgets.iter().find(|w| w.id == "w-public").unwrap();
    assert_eq!(public, &public_before);
    assert!(matches!(public.content, WidgetContent::Plain(_)));

    let sealed_node = store
        .get_transformer(handle, &seeded.sealed_transformer)
        .await
        .unwrap()
        .unwrap();
    assert!(sealed_node.wal.is_sealed_under(new));
    assert_eq!(sealed_node.wal.transactions, vec!["SELECT %2$I FROM %1$I"]);
    assert_eq!(sealed_node.wal.artifacts.len(), 2);

    let plain_after = store
        .get_transformer(handle, &seeded.plain_transformer)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(plain_after, plain_before);

    // The manifest now verifies under the new key only.
    let manifest = store.fetch_manifest(handle).await.unwrap();
    manifest
        .verify(handle, &keys.get_key(new).unwrap())
        .unwrap();
    assert!(manifest
        .verify(handle, &keys.get_key(&report.old_key_id).unwrap())
        .is_err());
}

#[tokio::test]
async fn old_key_cannot_open_rotated_content() {
    let fixture = SpaceFixture::new("sales", &["alice"]).await;
    fixture.seed_content().await;
    let alice = fixture.session(0).await;
    let report = alice.rotate_key().await.unwrap();

    let keys = &fixture.member(0).keys;
    for record in fixture.store.list_metadata(&fixture.handle).await.unwrap() {
        assert!(keys.decrypt_metadata(&report.old_key_id, &record.sealed).is_err());
    }
}

#[tokio::test]
async fn bad_manifest_signature_aborts_before_publishing() {
    let fixture = SpaceFixture::new("sales", &["alice", "bob", "mallory"]).await;
    let tampered = Manifest {
        users: vec!["alice".into(), "mallory".into()],
        signature: "00".repeat(32),
    };
    fixture
        .store
        .put_manifest(&fixture.handle, &tampered)
        .await
        .unwrap();

    let alice = fixture.session(0).await;
    let err = alice.rotate_key().await.unwrap_err();
    assert!(matches!(err, SealpipeError::ManifestSignatureInvalid));
    assert_eq!(err.to_string(), "Invalid manifest signature");

    let space = fixture.store.get_space(&fixture.handle).await.unwrap();
    assert_eq!(space.active_key_id, fixture.initial_key_id);
    assert!(fixture
        .store
        .secrets_for(&fixture.handle, &"mallory".into())
        .await
        .unwrap()
        .is_empty());
    assert!(!alice.is_invalidated().await);
}

#[tokio::test]
async fn concurrent_rotation_is_rejected() {
    let store = Arc::new(FlakyStore::new(MemoryStore::new()));
    let fixture = SpaceFixture::with_store(store.clone(), "sales", &["alice", "bob"]).await;
    let alice = fixture.session(0).await;

    let gate = store.hold(Op::FetchManifest).await;
    let (first, second) = tokio::join!(alice.rotate_key(), async {
        let second = alice.rotate_key().await;
        drop(gate);
        second
    });

    assert!(matches!(second, Err(SealpipeError::RotationInProgress)));
    assert_eq!(
        first.unwrap().final_state,
        RotationState::SessionInvalidated
    );
}

#[tokio::test]
async fn transient_failures_are_retried() {
    let store = Arc::new(FlakyStore::new(MemoryStore::new()));
    let fixture = SpaceFixture::with_store(store.clone(), "sales", &["alice", "bob"]).await;
    fixture.seed_content().await;
    let alice = fixture.session(0).await;

    store.fail_next(Op::FetchManifest, 1);
    store.fail_next(Op::PutMetadata, 2);
    store.fail_next(Op::PutSecret, 1);

    let report = alice.rotate_key().await.unwrap();
    assert_eq!(report.final_state, RotationState::SessionInvalidated);
    assert_eq!(store.calls(Op::FetchManifest), 2);
    for record in store.list_metadata(&fixture.handle).await.unwrap() {
        assert!(record.sealed.is_under(&report.new_key_id));
    }
}

#[tokio::test]
async fn interrupted_rotation_resumes_forward() {
    let store = Arc::new(FlakyStore::new(MemoryStore::new()));
    let fixture = SpaceFixture::with_store(store.clone(), "sales", &["alice", "bob"]).await;
    fixture.seed_content().await;
    let alice = fixture.session(0).await;

    store.fail_always(Op::ListWidgets);
    let err = alice.rotate_key().await.unwrap_err();
    let SealpipeError::Rotation(interrupted) = err else {
        panic!("expected an interrupted rotation, got {err:?}");
    };
    let checkpoint = interrupted.into_checkpoint();

    assert_eq!(checkpoint.state, RotationState::ConceptsRotated);
    assert!(checkpoint.state.is_past_point_of_no_return());
    // Past the point of no return: the new key is already published.
    assert_eq!(
        fixture.store.get_space(&fixture.handle).await.unwrap().active_key_id,
        checkpoint.new_key_id
    );
    // The cached key is stale, so local writes are refused until resume.
    assert!(alice.is_invalidated().await);
    assert!(matches!(
        alice.seal_value("'late'").await,
        Err(SealpipeError::SessionInvalidated)
    ));

    store.heal();
    let report = alice.resume_rotation(checkpoint.clone()).await.unwrap();
    assert_eq!(report.final_state, RotationState::SessionInvalidated);
    assert_eq!(report.widgets, 1);
    assert_eq!(report.transformers, 1);
    assert_eq!(report.secrets.len(), 1);
    assert!(alice.is_invalidated().await);

    // Rerunning the same steps finds nothing left to reseal.
    let again = alice.resume_rotation(checkpoint).await.unwrap();
    assert_eq!(again.widgets, 0);
    assert_eq!(again.transformers, 0);
}

#[tokio::test]
async fn failed_publish_keeps_new_key_for_resume() {
    let store = Arc::new(FlakyStore::new(MemoryStore::new()));
    let fixture = SpaceFixture::with_store(store.clone(), "sales", &["alice"]).await;
    let alice = fixture.session(0).await;

    store.fail_always(Op::PublishActiveKey);
    let err = alice.rotate_key().await.unwrap_err();
    let SealpipeError::Rotation(interrupted) = err else {
        panic!("expected an interrupted rotation, got {err:?}");
    };
    let checkpoint = interrupted.into_checkpoint();
    assert_eq!(checkpoint.state, RotationState::ManifestVerified);
    assert!(!checkpoint.state.is_past_point_of_no_return());
    assert_eq!(
        fixture.store.get_space(&fixture.handle).await.unwrap().active_key_id,
        fixture.initial_key_id
    );

    store.heal();
    let report = alice.resume_rotation(checkpoint.clone()).await.unwrap();
    assert_eq!(report.new_key_id, checkpoint.new_key_id);
}

#[tokio::test]
async fn offline_member_picks_up_new_key() {
    let fixture = SpaceFixture::new("sales", &["alice", "bob"]).await;
    fixture.seed_content().await;

    let bob_before = fixture.session(1).await;
    let alice = fixture.session(0).await;
    let report = alice.rotate_key().await.unwrap();

    // Bob's old session notices the key moved.
    assert!(matches!(
        bob_before.refresh_space().await,
        Err(SealpipeError::SessionInvalidated)
    ));
    assert!(bob_before.is_invalidated().await);

    let bob = fixture.session(1).await;
    assert_eq!(bob.active_key_id().await.unwrap(), report.new_key_id);
    assert!(fixture.member(1).keys.has_key(&report.new_key_id));

    let node = fixture
        .store
        .get_transformer(&fixture.handle, "t-sealed")
        .await
        .unwrap()
        .unwrap();
    let statement = bob
        .materialize(&node.wal.transactions[0], &node.wal)
        .await
        .unwrap();
    assert_eq!(statement, r#"SELECT "amount" FROM "sales""#);
}

#[tokio::test]
async fn live_members_are_notified() {
    let fixture = SpaceFixture::new("sales", &["alice", "bob"]).await;
    let network = MemoryNetwork::new();
    let alice_tx = network.create_transport(fixture.member(0).user.clone()).await;
    let bob_rx = network.create_transport(fixture.member(1).user.clone()).await;

    let bob = fixture.session(1).await.with_transport(Arc::new(bob_rx));
    let alice = fixture.session(0).await.with_transport(Arc::new(alice_tx));
    let report = alice.rotate_key().await.unwrap();

    let mut events = Vec::new();
    while let Some(event) = bob.pump_events(Duration::from_millis(50)).await.unwrap() {
        events.push(event);
    }

    assert!(events
        .iter()
        .any(|e| matches!(e, ChannelEvent::KeyRotated { key_id, .. } if *key_id == report.new_key_id)));
    assert!(events
        .iter()
        .any(|e| matches!(e, ChannelEvent::SecretShared(_))));
    assert!(fixture.member(1).keys.has_key(&report.new_key_id));
    assert!(bob.is_invalidated().await);
}

#[tokio::test]
async fn invalidated_session_refuses_work() {
    let fixture = SpaceFixture::new("sales", &["alice"]).await;
    let alice = fixture.session(0).await;
    alice.rotate_key().await.unwrap();

    assert!(matches!(
        alice.active_key_id().await,
        Err(SealpipeError::SessionInvalidated)
    ));
    assert!(matches!(
        alice.seal_value("x").await,
        Err(SealpipeError::SessionInvalidated)
    ));
    assert!(matches!(
        alice.rotate_key().await,
        Err(SealpipeError::SessionInvalidated)
    ));
}

#[tokio::test]
async fn rotation_over_sqlite_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("space.db");
    let store = Arc::new(SqliteStore::open(&path).unwrap());
    let fixture = SpaceFixture::with_store(store, "sales", &["alice", "bob"]).await;
    fixture.seed_content().await;

    let alice = fixture.session(0).await;
    let report = alice.rotate_key().await.unwrap();
    drop(alice);

    let reopened = SqliteStore::open(&path).unwrap();
    let handle = &fixture.handle;
    assert_eq!(
        reopened.get_space(handle).await.unwrap().active_key_id,
        report.new_key_id
    );
    for record in reopened.list_metadata(handle).await.unwrap() {
        assert!(record.sealed.is_under(&report.new_key_id));
    }
    let pending = reopened
        .secrets_for(handle, &fixture.member(1).user)
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
}

#[tokio::test]
async fn local_writes_are_refused_while_rotating() {
    init_tracing();
    let store = Arc::new(FlakyStore::new(MemoryStore::new()));
    let fixture = SpaceFixture::with_store(store.clone(), "sales", &["alice", "bob"]).await;
    fixture.seed_content().await;
    let alice = fixture.session(0).await;

    // Park the rotation once every record is resealed and the key shared.
    let gate = store.hold(Op::PutSecret).await;
    let (rotated, (late_value, late_edit)) = tokio::join!(alice.rotate_key(), async {
        while store.calls(Op::PutSecret) == 0 {
            tokio::task::yield_now().await;
        }
        let late_value = alice.seal_value("'late literal'").await;
        let late_edit = alice.edit_transformer("t-late", |_| ()).await;
        drop(gate);
        (late_value, late_edit)
    });

    assert!(matches!(late_value, Err(SealpipeError::RotationInProgress)));
    assert!(matches!(late_edit, Err(SealpipeError::RotationInProgress)));
    let report = rotated.unwrap();
    assert!(report.stranded.is_empty());

    let records = store.list_metadata(&fixture.handle).await.unwrap();
    assert_eq!(records.len(), 2);
    for record in &records {
        assert!(record.sealed.is_under(&report.new_key_id));
    }
    assert!(store
        .get_transformer(&fixture.handle, "t-late")
        .await
        .unwrap()
        .is_none());

    // Nothing was left behind under the old key, so the next rotation runs clean.
    let alice = fixture.session(0).await;
    let second = alice.rotate_key().await.unwrap();
    assert_eq!(second.final_state, RotationState::SessionInvalidated);
    assert_eq!(second.metadata, 2);
}

#[tokio::test]
async fn stale_writer_record_is_resealed_from_its_own_key() {
    let fixture = SpaceFixture::new("sales", &["alice", "bob"]).await;
    fixture.seed_content().await;
    let bob = fixture.session(1).await;

    let alice = fixture.session(0).await;
    let first = alice.rotate_key().await.unwrap();

    // Bob has not noticed the rotation and still writes under the first key.
    let content_id = bob.seal_value("'stale'").await.unwrap();
    let stale = store_record(&fixture, &content_id).await;
    assert!(stale.sealed.is_under(&fixture.initial_key_id));

    let alice = fixture.session(0).await;
    let second = alice.rotate_key().await.unwrap();
    assert_eq!(second.old_key_id, first.new_key_id);
    assert_eq!(second.metadata, 3);
    assert!(second.stranded.is_empty());

    let keys = &fixture.member(0).keys;
    let resealed = store_record(&fixture, &content_id).await;
    assert!(resealed.sealed.is_under(&second.new_key_id));
    assert_eq!(
        keys.decrypt_metadata(&second.new_key_id, &resealed.sealed)
            .unwrap(),
        "'stale'"
    );
}

#[tokio::test]
async fn record_under_unknown_key_is_reported_not_fatal() {
    let fixture = SpaceFixture::new("sales", &["alice", "bob"]).await;
    fixture.seed_content().await;

    // A key only an outsider ever held.
    let outsider = SpaceFixture::new("elsewhere", &["mallory"]).await;
    let orphan = MetadataRecord {
        content_id: "c-orphan".into(),
        sealed: outsider
            .member(0)
            .keys
            .encrypt_metadata(&outsider.initial_key_id, "'orphan'")
            .unwrap(),
    };
    fixture
        .store
        .put_metadata(&fixture.handle, &orphan)
        .await
        .unwrap();
    assert!(!fixture.member(0).keys.has_key(&outsider.initial_key_id));

    let alice = fixture.session(0).await;
    let report = alice.rotate_key().await.unwrap();

    assert_eq!(report.final_state, RotationState::SessionInvalidated);
    assert_eq!(report.metadata, 2);
    assert_eq!(report.concepts, 1);
    assert_eq!(
        report.stranded,
        vec![StrandedRecord {
            kind: RecordKind::Metadata,
            id: "c-orphan".into(),
            key_id: outsider.initial_key_id.clone(),
        }]
    );

    for record in fixture.store.list_metadata(&fixture.handle).await.unwrap() {
        if record.content_id == orphan.content_id {
            assert_eq!(record.sealed, orphan.sealed);
        } else {
            assert!(record.sealed.is_under(&report.new_key_id));
        }
    }
}

async fn store_record(
    fixture: &SpaceFixture<MemoryStore>,
    content_id: &sealpipe::core::ContentId,
) -> MetadataRecord {
    fixture
        .store
        .list_metadata(&fixture.handle)
        .await
        .unwrap()
        .into_iter()
        .find(|r| &r.content_id == content_id)
        .unwrap()
}
