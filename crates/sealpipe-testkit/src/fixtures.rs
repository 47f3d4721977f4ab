//! Test fixtures and helpers.
//!
//! A [`SpaceFixture`] is a data space with several members, each holding
//! its own channel identity and key store, all sharing one backend.

use std::sync::Arc;
use std::time::Duration;

use sealpipe::{RetryPolicy, Session, SessionConfig};
use sealpipe_channel::{Directory, Identity, SealedBoxChannel};
use sealpipe_core::{
    Artifact, ContentId, KeyId, KeyStore, Manifest, Sealed, SpaceHandle, UserId, KEY_BITS,
};
use sealpipe_keystore::{LocalKeyStore, MemoryVault, VaultConfig};
use sealpipe_store::{
    AccessGrant, ConceptRecord, DataSpace, MemoryStore, MetadataRecord, Store, TransformerNode,
    Widget, WidgetContent,
};

/// Session type used throughout the fixtures.
pub type TestSession<S = MemoryStore> = Session<S, SealedBoxChannel, LocalKeyStore>;

/// One collaborator.
pub struct Member {
    pub user: UserId,
    pub channel: Arc<SealedBoxChannel>,
    pub keys: Arc<LocalKeyStore>,
}

impl Member {
    /// A member with a fresh identity and an empty in-memory key store.
    pub async fn new(user: &str, directory: Arc<Directory>) -> Self {
        let identity = Identity::generate(user);
        let channel = SealedBoxChannel::connect(identity, directory).await;
        let keys = LocalKeyStore::open(MemoryVault::new(), "test passphrase", VaultConfig::insecure_fast())
            .expect("open test key store");
        Self {
            user: UserId::from(user),
            channel: Arc::new(channel),
            keys: Arc::new(keys),
        }
    }
}

/// A data space shared by several members.
pub struct SpaceFixture<S = MemoryStore> {
    pub store: Arc<S>,
    pub directory: Arc<Directory>,
    pub handle: SpaceHandle,
    pub members: Vec<Member>,
    /// The key the space was created with.
    pub initial_key_id: KeyId,
}

impl SpaceFixture<MemoryStore> {
    /// A space on a fresh in-memory store.
    pub async fn new(handle: &str, users: &[&str]) -> Self {
        Self::with_store(Arc::new(MemoryStore::new()), handle, users).await
    }
}

impl<S: Store> SpaceFixture<S> {
    /// A space on `store`. The first user creates it and every member
    /// already holds the initial key.
    pub async fn with_store(store: Arc<S>, handle: &str, users: &[&str]) -> Self {
        let directory = Arc::new(Directory::new());
        let mut members = Vec::with_capacity(users.len());
        for user in users {
            members.push(Member::new(user, directory.clone()).await);
        }

        let owner = members.first().expect("at least one member");
        let key_id = owner.keys.generate_key(KEY_BITS).expect("generate space key");
        let key = owner.keys.get_key(&key_id).expect("space key");
        for member in members.iter().skip(1) {
            member
                .keys
                .add_key(&key_id, key.as_bytes())
                .expect("distribute space key");
        }

        let handle = SpaceHandle::from(handle);
        let manifest = Manifest::sign(
            &handle,
            members.iter().map(|m| m.user.clone()).collect(),
            &key,
        );
        store
            .create_space(
                &DataSpace {
                    handle: handle.clone(),
                    active_key_id: key_id.clone(),
                },
                &manifest,
            )
            .await
            .expect("create space");

        Self {
            store,
            directory,
            handle,
            members,
            initial_key_id: key_id,
        }
    }

    pub fn member(&self, index: usize) -> &Member {
        &self.members[index]
    }

    /// Session config with immediate retries.
    pub fn config(&self, index: usize) -> SessionConfig {
        SessionConfig::new(self.members[index].user.clone(), self.handle.clone()).with_retry(
            RetryPolicy {
                max_attempts: 3,
                initial_backoff: Duration::ZERO,
                max_backoff: Duration::ZERO,
            },
        )
    }

    /// Start a session for member `index`.
    pub async fn session(&self, index: usize) -> TestSession<S> {
        self.session_with(index, self.config(index)).await
    }

    pub async fn session_with(&self, index: usize, config: SessionConfig) -> TestSession<S> {
        let member = &self.members[index];
        Session::start(
            self.store.clone(),
            member.channel.clone(),
            member.keys.clone(),
            config,
        )
        .await
        .expect("start session")
    }

    /// Populate every kind of sealed record under the initial key.
    ///
    /// Adds two metadata values, one concept, an internal and a public
    /// widget, a transformer with sealed data and one with templates only.
    pub async fn seed_content(&self) -> SeededContent {
        let keys = &self.members[0].keys;
        let key_id = &self.initial_key_id;
        let seal = |text: &str| -> Sealed {
            keys.encrypt_metadata(key_id, text).expect("seal test content")
        };

        let values = vec![
            (ContentId::from("c-region"), "'EU'"),
            (ContentId::from("c-floor"), "100"),
        ];
        for (content_id, text) in &values {
            self.store
                .put_metadata(
                    &self.handle,
                    &MetadataRecord {
                        content_id: content_id.clone(),
                        sealed: seal(text),
                    },
                )
                .await
                .expect("put metadata");
        }

        self.store
            .put_concept(
                &self.handle,
                &ConceptRecord {
                    id: "revenue".into(),
                    sealed: seal("revenue: sum of amount"),
                },
            )
            .await
            .expect("put concept");

        for widget in [
            Widget {
                id: "w-internal".into(),
                access: vec![AccessGrant::Internal],
                content: WidgetContent::Sealed(seal("{\"chart\":\"bar\"}")),
            },
            Widget {
                id: "w-public".into(),
                access: vec![AccessGrant::Public],
                content: WidgetContent::Plain("{\"chart\":\"pie\"}".into()),
            },
        ] {
            self.store
                .put_widget(&self.handle, &widget)
                .await
                .expect("put widget");
        }

        let mut sealed_node = TransformerNode::new("t-sealed");
        sealed_node
            .wal
            .intern_identifiers(&["sales"], &["amount"])
            .expect("intern ids");
        sealed_node.wal.push_transaction("SELECT %2$I FROM %1$I");
        sealed_node.wal.set_data(seal("private result"));
        sealed_node
            .wal
            .push_artifact(Artifact::sealed("sql", seal("{\"rows\":3}")));
        sealed_node
            .wal
            .push_artifact(Artifact::plain("sql", serde_json::json!({"rows": 3})));

        let mut plain_node = TransformerNode::new("t-plain");
        plain_node
            .wal
            .intern_identifiers(&["sales"], &[])
            .expect("intern ids");
        plain_node.wal.push_transaction("SELECT * FROM %1$I");

        for node in [&sealed_node, &plain_node] {
            self.store
                .put_transformer(&self.handle, node)
                .await
                .expect("put transformer");
        }

        SeededContent {
            values: values.into_iter().map(|(id, _)| id).collect(),
            sealed_transformer: sealed_node.id,
            plain_transformer: plain_node.id,
        }
    }
}

/// Ids of what [`SpaceFixture::seed_content`] wrote.
#[derive(Debug, Clone)]
pub struct SeededContent {
    pub values: Vec<ContentId>,
    pub sealed_transformer: String,
    pub plain_transformer: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_members_share_initial_key() {
        let fixture = SpaceFixture::new("space", &["alice", "bob", "carol"]).await;

        for member in &fixture.members {
            assert!(member.keys.has_key(&fixture.initial_key_id));
        }

        let manifest = fixture.store.fetch_manifest(&fixture.handle).await.unwrap();
        let key = fixture.member(1).keys.get_key(&fixture.initial_key_id).unwrap();
        manifest.verify(&fixture.handle, &key).unwrap();
        assert_eq!(manifest.users.len(), 3);
    }

    #[tokio::test]
    async fn test_seed_content() {
        let fixture = SpaceFixture::new("space", &["alice"]).await;
        let seeded = fixture.seed_content().await;

        assert_eq!(
            fixture.store.list_metadata(&fixture.handle).await.unwrap().len(),
            seeded.values.len()
        );
        assert_eq!(fixture.store.list_widgets(&fixture.handle).await.unwrap().len(), 2);
        assert_eq!(
            fixture.store.list_transformers(&fixture.handle).await.unwrap().len(),
            2
        );
    }

    #[tokio::test]
    async fn test_session_starts() {
        let fixture = SpaceFixture::new("space", &["alice", "bob"]).await;
        let session = fixture.session(1).await;
        assert_eq!(session.active_key_id().await.unwrap(), fixture.initial_key_id);
    }
}
