use serde::{Deserialize, Serialize};

/// Point-in-time description of one connected client facade.
///
/// Snapshots are built by the session registry on demand; mutating a
/// `ClientDetails` has no effect on the session it was copied from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientDetails {
    /// Unique, monotonically assigned connection index.
    pub index: u32,
    pub username: String,
    pub fullname: String,
    pub hostname: String,
    /// Visit (experiment session) the client is collecting data under.
    pub visit: String,
    pub authorisation_level: i32,
    pub holds_baton: bool,
    pub holds_lease: bool,
}

impl ClientDetails {
    /// Non-interactive server-side connections register with an empty
    /// username and are implicitly trusted.
    pub fn is_automated(&self) -> bool {
        self.username.is_empty()
    }
}
