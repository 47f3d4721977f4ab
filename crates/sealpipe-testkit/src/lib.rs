//! # sealpipe Testkit
//!
//! Testing utilities for sealpipe.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: a shared data space with several members, ready for sessions
//! - **Fault injection**: [`FlakyStore`] makes chosen backend calls fail transiently
//! - **Generators**: Proptest strategies for property-based testing
//! - **Golden vectors**: templates with the statements they must materialize to
//!
//! ## Test Fixtures
//!
//! ```rust,no_run
//! use sealpipe_testkit::fixtures::SpaceFixture;
//!
//! async fn example() {
//!     let fixture = SpaceFixture::new("sales", &["alice", "bob", "carol"]).await;
//!     let alice = fixture.session(0).await;
//!     let report = alice.rotate_key().await.unwrap();
//!     assert_eq!(report.secrets.len(), 2);
//! }
//! ```
//!
//! ## Golden Vectors
//!
//! ```rust
//! use sealpipe_testkit::vectors::{all_vectors, materialize_vector};
//!
//! for vector in all_vectors() {
//!     assert_eq!(materialize_vector(&vector), vector.expected, "{}", vector.name);
//! }
//! ```

pub mod fixtures;
pub mod flaky;
pub mod generators;
pub mod vectors;

pub use fixtures::{Member, SeededContent, SpaceFixture, TestSession};
pub use flaky::{FlakyStore, Op};
pub use generators::{wal_from_params, WalParams};
pub use vectors::{all_vectors, materialize_vector, verify_all_vectors, GoldenVector};

/// Install a test subscriber honouring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
