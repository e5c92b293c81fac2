//! URL shortener service implementation.
//!
//! Single and batch saving, resolution, owner listings and detached
//! deletion on top of any [`snip_core::Repository`] backend.

pub mod batch;
pub mod deletion;
pub mod error;
pub mod service;
pub mod shortener;
pub mod validator;

pub use batch::{BatchOutcome, BatchRequest};
pub use deletion::{DeletionPipeline, DeletionSettings};
pub use error::{Result, ShortenerError};
pub use service::{ShortenerService, ShortenerSettings, DEFAULT_BASE_URL};
pub use shortener::{OwnerUrl, Shortened, Shortener};
