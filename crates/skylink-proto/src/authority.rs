use serde::{Deserialize, Serialize};

/// Point-in-time view of the administrator-controlled authority flags, as
/// returned to the admin console after every admin request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorityStatus {
    pub controls: bool,
    pub video: bool,
    pub emergency: bool,
    pub message: String,
}
