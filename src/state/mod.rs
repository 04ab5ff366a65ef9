//! Instance and binding state.
//!
//! The [`store::BrokerStore`] trait defines the interface the handlers
//! use; [`local::LocalBrokerStore`] mirrors every mutation to JSON files
//! and is the default, [`memory::MemoryBrokerStore`] keeps everything in
//! process memory.

pub mod local;
pub mod memory;
pub mod store;
