//! Storage accounts and quota allocation.
//!
//! An owner may hold several accounts, each with its own capacity. Uploads
//! reserve their declared size across those accounts up front and give it
//! back when the item is replaced or deleted.

mod allocator;
mod repository;
mod types;

pub use allocator::{plan_grants, total_remaining, QuotaAllocator};
pub use repository::AccountRepository;
pub use types::{Account, Grant};
