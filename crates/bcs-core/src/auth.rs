use std::{collections::HashMap, sync::Arc};

use thiserror::Error;

pub type SharedAuthoriser = Arc<dyn Authoriser>;

/// Maps a username onto an integer authorisation level. Higher levels carry
/// more authority; the baton arbitration compares them directly.
pub trait Authoriser: Send + Sync {
    fn authorisation_level(&self, username: &str) -> Result<i32, AuthorisationError>;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthorisationError {
    #[error("no authorisation entry for user '{0}'")]
    UnknownUser(String),
    #[error("authorisation lookup failed for user '{username}': {reason}")]
    Lookup { username: String, reason: String },
}

/// Static username -> level table, with an optional fallback level for
/// users missing from the table.
pub struct MapAuthoriser {
    levels: HashMap<String, i32>,
    default_level: Option<i32>,
}

impl MapAuthoriser {
    pub fn new(levels: HashMap<String, i32>) -> Self {
        Self {
            levels,
            default_level: None,
        }
    }

    pub fn with_default(levels: HashMap<String, i32>, default_level: i32) -> Self {
        Self {
            levels,
            default_level: Some(default_level),
        }
    }
}

impl Authoriser for MapAuthoriser {
    fn authorisation_level(&self, username: &str) -> Result<i32, AuthorisationError> {
        if let Some(level) = self.levels.get(username) {
            return Ok(*level);
        }
        match self.default_level {
            Some(level) => {
                log::debug!("no authorisation entry for '{username}', using default level {level}");
                Ok(level)
            }
            None => Err(AuthorisationError::UnknownUser(username.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_authoriser_returns_configured_level() {
        let authoriser = MapAuthoriser::new(HashMap::from_iter([("msmith".to_string(), 3)]));

        let level = authoriser
            .authorisation_level("msmith")
            .expect("resolve level");

        assert_eq!(level, 3);
    }

    #[test]
    fn map_authoriser_rejects_unknown_user() {
        let authoriser = MapAuthoriser::new(HashMap::new());
        let err = authoriser
            .authorisation_level("nobody")
            .expect_err("missing user should error");

        assert!(matches!(err, AuthorisationError::UnknownUser(user) if user == "nobody"));
    }

    #[test]
    fn map_authoriser_falls_back_to_default() {
        let authoriser = MapAuthoriser::with_default(HashMap::new(), 1);

        let level = authoriser
            .authorisation_level("visitor")
            .expect("default level");

        assert_eq!(level, 1);
    }
}
