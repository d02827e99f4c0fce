//! Shared quota data types.

mod record;
mod response;

pub use record::{Principal, PrincipalKind, QuotaRecord, QuotaType};
pub use response::{CachedValue, QuotaResponse};
