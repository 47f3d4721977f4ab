//! Golden vectors and properties for WAL templates.
//!
//! Every client must resolve the same persisted template to the same
//! statement, and interning must number identifiers the same way no matter
//! who does it.

use proptest::prelude::*;
use sealpipe::core::{intern, materialize, KeyStore, ValueRegistry, KEY_BITS};
use sealpipe::keystore::{LocalKeyStore, MemoryVault, VaultConfig};
use sealpipe_testkit::generators::{identifiers, plaintext, wal_from_params, WalParams};
use sealpipe_testkit::vectors::{all_vectors, materialize_vector};

#[test]
fn golden_vectors() {
    for vector in all_vectors() {
        assert_eq!(
            materialize_vector(&vector),
            vector.expected,
            "vector {:?}",
            vector.name
        );
    }
}

fn key_store() -> LocalKeyStore {
    LocalKeyStore::open(MemoryVault::new(), "golden", VaultConfig::insecure_fast()).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn interning_is_stable(tables in identifiers(4), columns in identifiers(6)) {
        let t: Vec<&str> = tables.iter().map(String::as_str).collect();
        let c: Vec<&str> = columns.iter().map(String::as_str).collect();

        let (first, index) = intern(&Default::default(), &t, &c).unwrap();
        // Interning the same ids again changes nothing.
        let (second, again) = intern(&first, &t, &c).unwrap();
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(&index, &again);

        // Every id maps to a key holding that id.
        for (id, key) in &index {
            prop_assert_eq!(&first[key].id, id);
        }
    }

    #[test]
    fn materialize_does_not_touch_wal(params: WalParams) {
        let keys = key_store();
        let key_id = keys.generate_key(KEY_BITS).unwrap();
        let wal = wal_from_params(&params);
        let before = wal.clone();

        let registry: ValueRegistry = wal
            .values
            .values()
            .map(|cid| (cid.clone(), keys.encrypt_metadata(&key_id, cid.as_str()).unwrap()))
            .collect();

        let template = &wal.transactions[0];
        let first = materialize(template, &wal, &registry, &key_id, &keys).unwrap();
        let second = materialize(template, &wal, &registry, &key_id, &keys).unwrap();
        prop_assert_eq!(first, second);
        prop_assert_eq!(wal, before);
    }

    #[test]
    fn metadata_round_trip(text in plaintext()) {
        let keys = key_store();
        let key_id = keys.generate_key(KEY_BITS).unwrap();
        let sealed = keys.encrypt_metadata(&key_id, &text).unwrap();
        prop_assert_eq!(keys.decrypt_metadata(&key_id, &sealed).unwrap(), text);
    }

    #[test]
    fn reseal_is_idempotent(text in plaintext()) {
        let keys = key_store();
        let old = keys.generate_key(KEY_BITS).unwrap();
        let new = keys.generate_key(KEY_BITS).unwrap();

        let sealed = keys.encrypt_metadata(&old, &text).unwrap();
        let once = keys.reseal(&sealed, &old, &new).unwrap();
        let twice = keys.reseal(&once, &old, &new).unwrap();

        prop_assert_eq!(&once, &twice);
        prop_assert_eq!(keys.decrypt_metadata(&new, &twice).unwrap(), text);
        prop_assert!(keys.decrypt_metadata(&old, &twice).is_err());
    }
}
