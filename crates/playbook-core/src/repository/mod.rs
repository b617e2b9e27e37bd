//! Repository trait definitions (ports).
//!
//! These traits define the storage interface that the infrastructure layer
//! (playbook-infra) implements. The core crate never depends on any
//! specific storage technology. `memory` holds the `DashMap`-backed
//! implementations used for embedding and tests.

pub mod memory;
pub mod slot;
pub mod state;

pub use memory::{InMemorySlotMappingRepository, InMemoryStateRepository};
pub use slot::SlotMappingRepository;
pub use state::StateRepository;
