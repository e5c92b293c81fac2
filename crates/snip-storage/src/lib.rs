//! Repository backends for the URL store.
//!
//! Three interchangeable implementations of [`Repository`]:
//! an in-process map, an append-only JSON lines file, and MySQL.

pub mod file;
pub mod memory;
pub mod mysql;

pub use file::FileRepository;
pub use memory::InMemoryRepository;
pub use mysql::{MySqlRepository, MySqlSettings};
pub use snip_core::error::StorageError;
pub use snip_core::{ReadRepository, Repository};
