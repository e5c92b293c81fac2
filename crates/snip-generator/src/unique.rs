use crate::Generator;
use snip_core::{ReadRepository, ShortCode, StorageError};
use thiserror::Error;
use tracing::{trace, warn};

/// Draws allowed before [`generate_unique`] gives up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 256;

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("no unused short code found after {attempts} attempts")]
    Exhausted { attempts: u32 },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type Result<T> = std::result::Result<T, GenerateError>;

/// An allowance of code draws that several [`generate_unique`] calls can
/// share, so retries on top of generation stay within one ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawBudget {
    limit: u32,
    used: u32,
}

impl DrawBudget {
    pub fn new(limit: u32) -> Self {
        Self { limit, used: 0 }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn used(&self) -> u32 {
        self.used
    }

    fn take(&mut self) -> bool {
        if self.used >= self.limit {
            return false;
        }
        self.used += 1;
        true
    }
}

/// Draws codes from `generator` until one is unused in `repo`, charging one
/// draw per candidate to `budget`.
///
/// Soft-deleted records still occupy their code. The returned code was free
/// when checked; a concurrent writer can still take it before the caller
/// inserts, which surfaces as `IdExists` on insert.
pub async fn generate_unique<R, G>(
    repo: &R,
    generator: &G,
    budget: &mut DrawBudget,
) -> Result<ShortCode>
where
    R: ReadRepository + ?Sized,
    G: Generator + ?Sized,
{
    while budget.take() {
        let code: ShortCode = generator.generate().into();
        match repo.check_id(&code).await? {
            None => return Ok(code),
            Some(_) => trace!(code = %code, attempt = budget.used(), "short code collision"),
        }
    }

    warn!(attempts = budget.limit(), "short code space exhausted");
    Err(GenerateError::Exhausted {
        attempts: budget.limit(),
    })
}
