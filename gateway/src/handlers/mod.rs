pub mod challenge;
pub mod issuers;
pub mod policies;
pub mod revocations;
pub mod verify;

pub use challenge::issue_challenge;
pub use issuers::{list_issuers, put_issuer};
pub use policies::{list_policies, put_policy};
pub use revocations::put_revocations;
pub use verify::verify;
