//! Core types and traits for the Snip URL shortener.
//!
//! This crate holds the data model shared by the storage backends and the
//! shortener service, together with the repository contract every backend
//! implements.

pub mod batch;
pub mod error;
pub mod record;
pub mod repository;
pub mod shortcode;

pub use batch::{BatchItem, ItemError, ValidationError};
pub use error::{CoreError, StorageError};
pub use record::{OwnerId, UrlRecord};
pub use repository::{ReadRepository, Repository};
pub use shortcode::ShortCode;
