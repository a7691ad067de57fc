pub mod caller;
pub mod internal;

pub use caller::{CurrentTenant, UserId, USER_ID_HEADER};
pub use internal::InternalCallers;
