use std::collections::HashMap;
use std::sync::RwLock;

use bcs_core::{AuthorisationError, ClientDetails, SharedAuthoriser};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no client facade registered under identity '{0}'")]
    UnknownFacade(String),
    #[error(transparent)]
    Authorisation(#[from] AuthorisationError),
}

/// One registered client connection. Keyed in the table by the opaque
/// identity string the transport layer registers under.
struct ClientSession {
    index: u32,
    username: String,
    fullname: String,
    hostname: String,
    visit: String,
    authorisation_level: i32,
    holds_lease: bool,
}

struct State {
    sessions: HashMap<String, ClientSession>,
    /// Identity of the baton holder. `None` means unrestricted access.
    baton_holder: Option<String>,
    next_index: u32,
}

/// Session table and baton arbitration. All state sits under one `RwLock`,
/// so baton decisions are linearizable: two racing `request_baton` calls can
/// never both be granted a free baton.
///
/// The registry arbitrates the baton flag only. Whether holding it is
/// required for a given operation is the caller's policy.
pub struct SessionRegistry {
    authoriser: SharedAuthoriser,
    state: RwLock<State>,
}

impl SessionRegistry {
    pub fn new(authoriser: SharedAuthoriser) -> Self {
        Self {
            authoriser,
            state: RwLock::new(State {
                sessions: HashMap::new(),
                baton_holder: None,
                next_index: 1,
            }),
        }
    }

    /// Registers a client connection and returns its connection index.
    ///
    /// An empty username marks a non-interactive server-side connection: it
    /// is implicitly trusted and skips the authoriser. Re-registering an
    /// identity replaces the previous session; a baton held by the old
    /// session is released.
    pub fn add_facade(
        &self,
        identity: &str,
        hostname: &str,
        username: &str,
        fullname: &str,
        visit: &str,
    ) -> Result<u32, SessionError> {
        let level = self.resolve_level(username)?;
        let mut state = self.state.write().unwrap();
        if state.sessions.contains_key(identity) {
            log::warn!("facade '{identity}' re-registered, replacing previous session");
            release_if_held(&mut state, identity);
        }
        let index = state.next_index;
        state.next_index += 1;
        state.sessions.insert(
            identity.to_string(),
            ClientSession {
                index,
                username: username.to_string(),
                fullname: fullname.to_string(),
                hostname: hostname.to_string(),
                visit: visit.to_string(),
                authorisation_level: level,
                holds_lease: false,
            },
        );
        log::info!("client {index} ('{username}' on {hostname}) registered as '{identity}'");
        Ok(index)
    }

    /// Re-resolves the authorisation level after a user change on an
    /// existing connection.
    pub fn switch_user(
        &self,
        identity: &str,
        username: &str,
        visit: &str,
    ) -> Result<(), SessionError> {
        let level = self.resolve_level(username)?;
        let mut state = self.state.write().unwrap();
        let session = state
            .sessions
            .get_mut(identity)
            .ok_or_else(|| SessionError::UnknownFacade(identity.to_string()))?;
        log::info!(
            "client {} switching user '{}' -> '{username}'",
            session.index,
            session.username
        );
        session.username = username.to_string();
        session.visit = visit.to_string();
        session.authorisation_level = level;
        Ok(())
    }

    /// Deregisters a connection, releasing the baton if it held it.
    /// Removing an unknown identity is a no-op.
    pub fn remove_facade(&self, identity: &str) {
        let mut state = self.state.write().unwrap();
        release_if_held(&mut state, identity);
        if let Some(session) = state.sessions.remove(identity) {
            log::info!("client {} ('{identity}') deregistered", session.index);
        }
    }

    /// Claims the baton. Granted when the baton is free or already held by
    /// the caller. When another session holds it, the caller takes it over
    /// only if its authorisation level is strictly higher than the holder's.
    pub fn request_baton(&self, identity: &str) -> bool {
        let mut state = self.state.write().unwrap();
        let Some(caller_level) = state
            .sessions
            .get(identity)
            .map(|s| s.authorisation_level)
        else {
            log::warn!("baton requested by unregistered identity '{identity}'");
            return false;
        };
        match &state.baton_holder {
            None => {
                state.baton_holder = Some(identity.to_string());
                log::info!("baton granted to '{identity}'");
                true
            }
            Some(holder) if holder == identity => true,
            Some(holder) => {
                let holder_level = state
                    .sessions
                    .get(holder)
                    .map(|s| s.authorisation_level)
                    .unwrap_or(i32::MIN);
                if caller_level > holder_level {
                    log::info!(
                        "baton seized from '{holder}' (level {holder_level}) by \
                         '{identity}' (level {caller_level})"
                    );
                    state.baton_holder = Some(identity.to_string());
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Hands the baton from the current holder to the session with the
    /// given connection index. A no-op unless the caller holds the baton
    /// and the target is registered.
    pub fn assign_baton(&self, identity: &str, target_index: u32) {
        let mut state = self.state.write().unwrap();
        if state.baton_holder.as_deref() != Some(identity) {
            log::warn!("'{identity}' tried to assign a baton it does not hold");
            return;
        }
        let target = state
            .sessions
            .iter()
            .find(|(_, s)| s.index == target_index)
            .map(|(id, _)| id.clone());
        match target {
            Some(target_identity) => {
                log::info!("baton passed from '{identity}' to client {target_index}");
                state.baton_holder = Some(target_identity);
            }
            None => log::warn!("baton assignment to unknown client index {target_index} ignored"),
        }
    }

    /// Releases the baton if the caller holds it.
    pub fn return_baton(&self, identity: &str) {
        let mut state = self.state.write().unwrap();
        if state.baton_holder.as_deref() == Some(identity) {
            state.baton_holder = None;
            log::info!("baton returned by '{identity}'");
        }
    }

    pub fn am_i_baton_holder(&self, identity: &str) -> bool {
        let state = self.state.read().unwrap();
        state.baton_holder.as_deref() == Some(identity)
    }

    pub fn is_baton_held(&self) -> bool {
        self.state.read().unwrap().baton_holder.is_some()
    }

    pub fn baton_holder(&self) -> Option<ClientDetails> {
        let state = self.state.read().unwrap();
        let holder = state.baton_holder.as_ref()?;
        state
            .sessions
            .get(holder)
            .map(|session| details(session, true))
    }

    pub fn authorisation_level_of(&self, identity: &str) -> Option<i32> {
        let state = self.state.read().unwrap();
        state
            .sessions
            .get(identity)
            .map(|session| session.authorisation_level)
    }

    pub fn authorisation_level_of_index(&self, index: u32) -> Option<i32> {
        let state = self.state.read().unwrap();
        state
            .sessions
            .values()
            .find(|session| session.index == index)
            .map(|session| session.authorisation_level)
    }

    pub fn client_information(&self, identity: &str) -> Option<ClientDetails> {
        let state = self.state.read().unwrap();
        state
            .sessions
            .get(identity)
            .map(|session| details(session, state.baton_holder.as_deref() == Some(identity)))
    }

    /// Snapshots of every client except the caller, ordered by index.
    pub fn other_client_information(&self, identity: &str) -> Vec<ClientDetails> {
        let state = self.state.read().unwrap();
        let mut others: Vec<_> = state
            .sessions
            .iter()
            .filter(|(id, _)| id.as_str() != identity)
            .map(|(id, session)| details(session, state.baton_holder.as_deref() == Some(id)))
            .collect();
        others.sort_by_key(|details| details.index);
        others
    }

    pub fn all_clients(&self) -> Vec<ClientDetails> {
        let state = self.state.read().unwrap();
        let mut clients: Vec<_> = state
            .sessions
            .iter()
            .map(|(id, session)| details(session, state.baton_holder.as_deref() == Some(id)))
            .collect();
        clients.sort_by_key(|details| details.index);
        clients
    }

    pub fn renew_lease(&self, identity: &str) {
        let mut state = self.state.write().unwrap();
        if let Some(session) = state.sessions.get_mut(identity) {
            session.holds_lease = true;
        }
    }

    pub fn surrender_lease(&self, identity: &str) {
        let mut state = self.state.write().unwrap();
        if let Some(session) = state.sessions.get_mut(identity) {
            session.holds_lease = false;
        }
    }

    fn resolve_level(&self, username: &str) -> Result<i32, SessionError> {
        if username.is_empty() {
            // Non-interactive server-side connection, implicitly trusted.
            return Ok(i32::MAX);
        }
        Ok(self.authoriser.authorisation_level(username)?)
    }
}

fn release_if_held(state: &mut State, identity: &str) {
    if state.baton_holder.as_deref() == Some(identity) {
        state.baton_holder = None;
        log::info!("baton released, holder '{identity}' is gone");
    }
}

fn details(session: &ClientSession, holds_baton: bool) -> ClientDetails {
    ClientDetails {
        index: session.index,
        username: session.username.clone(),
        fullname: session.fullname.clone(),
        hostname: session.hostname.clone(),
        visit: session.visit.clone(),
        authorisation_level: session.authorisation_level,
        holds_baton,
        holds_lease: session.holds_lease,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bcs_core::MapAuthoriser;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn registry() -> SessionRegistry {
        let levels = HashMap::from_iter([
            ("alice".to_string(), 2),
            ("bob".to_string(), 2),
            ("carol".to_string(), 3),
        ]);
        SessionRegistry::new(Arc::new(MapAuthoriser::new(levels)))
    }

    fn add(reg: &SessionRegistry, identity: &str, username: &str) -> u32 {
        reg.add_facade(identity, "ws001", username, username, "cm1234-5")
            .expect("register facade")
    }

    #[test]
    fn indices_are_unique_and_monotonic() {
        let reg = registry();
        let a = add(&reg, "a", "alice");
        let b = add(&reg, "b", "bob");
        assert!(b > a);

        let info = reg.client_information("a").expect("client info");
        assert_eq!(info.index, a);
        assert_eq!(info.username, "alice");
        assert_eq!(info.authorisation_level, 2);
        assert!(!info.holds_baton);
    }

    #[test]
    fn empty_username_is_trusted_without_lookup() {
        let reg = registry();
        let index = add(&reg, "objectserver", "");
        let info = reg.client_information("objectserver").expect("client info");
        assert_eq!(info.index, index);
        assert!(info.is_automated());
        assert_eq!(info.authorisation_level, i32::MAX);
    }

    #[test]
    fn unknown_user_is_rejected() {
        let reg = registry();
        let err = reg
            .add_facade("x", "ws001", "mallory", "Mallory", "cm1234-5")
            .expect_err("unknown user should fail");
        assert!(matches!(
            err,
            SessionError::Authorisation(AuthorisationError::UnknownUser(user)) if user == "mallory"
        ));
    }

    #[test]
    fn baton_granted_when_free_and_denied_at_same_level() {
        let reg = registry();
        add(&reg, "a", "alice");
        add(&reg, "b", "bob");

        assert!(reg.request_baton("a"));
        assert!(reg.am_i_baton_holder("a"));
        // Same level does not displace a holder.
        assert!(!reg.request_baton("b"));
        assert!(!reg.am_i_baton_holder("b"));
        // Re-request by the holder stays granted.
        assert!(reg.request_baton("a"));
    }

    #[test]
    fn baton_available_after_return() {
        let reg = registry();
        add(&reg, "a", "alice");
        add(&reg, "b", "bob");

        assert!(reg.request_baton("a"));
        assert!(!reg.request_baton("b"));
        reg.return_baton("a");
        assert!(!reg.is_baton_held());
        assert!(reg.request_baton("b"));
    }

    #[test]
    fn higher_level_seizes_the_baton() {
        let reg = registry();
        add(&reg, "a", "alice");
        add(&reg, "c", "carol");

        assert!(reg.request_baton("a"));
        assert!(reg.request_baton("c"));
        assert!(reg.am_i_baton_holder("c"));
        assert!(!reg.am_i_baton_holder("a"));
    }

    #[test]
    fn return_by_non_holder_changes_nothing() {
        let reg = registry();
        add(&reg, "a", "alice");
        add(&reg, "b", "bob");

        assert!(reg.request_baton("a"));
        reg.return_baton("b");
        assert!(reg.am_i_baton_holder("a"));
    }

    #[test]
    fn removing_the_holder_frees_the_baton() {
        let reg = registry();
        add(&reg, "a", "alice");
        add(&reg, "b", "bob");

        assert!(reg.request_baton("a"));
        reg.remove_facade("a");
        assert!(!reg.is_baton_held());
        assert!(reg.request_baton("b"));
    }

    #[test]
    fn reregistering_the_holder_releases_the_baton() {
        let reg = registry();
        let first = add(&reg, "a", "alice");
        assert!(reg.request_baton("a"));

        let second = add(&reg, "a", "alice");
        assert!(second > first);
        assert!(!reg.is_baton_held());
        assert_eq!(reg.all_clients().len(), 1);
    }

    #[test]
    fn assign_baton_moves_it_to_the_target_index() {
        let reg = registry();
        add(&reg, "a", "alice");
        let b_index = add(&reg, "b", "bob");

        assert!(reg.request_baton("a"));
        reg.assign_baton("a", b_index);
        assert!(reg.am_i_baton_holder("b"));

        let holder = reg.baton_holder().expect("holder details");
        assert_eq!(holder.index, b_index);
        assert!(holder.holds_baton);
    }

    #[test]
    fn assign_baton_requires_holding_it() {
        let reg = registry();
        add(&reg, "a", "alice");
        let b_index = add(&reg, "b", "bob");

        reg.assign_baton("a", b_index);
        assert!(!reg.is_baton_held());
    }

    #[test]
    fn switch_user_re_resolves_the_level() {
        let reg = registry();
        add(&reg, "a", "alice");
        reg.switch_user("a", "carol", "cm9999-1").expect("switch");

        let info = reg.client_information("a").expect("client info");
        assert_eq!(info.username, "carol");
        assert_eq!(info.visit, "cm9999-1");
        assert_eq!(info.authorisation_level, 3);

        let err = reg
            .switch_user("ghost", "alice", "cm1234-5")
            .expect_err("unknown facade");
        assert!(matches!(err, SessionError::UnknownFacade(id) if id == "ghost"));
    }

    #[test]
    fn other_client_information_excludes_the_caller() {
        let reg = registry();
        add(&reg, "a", "alice");
        let b_index = add(&reg, "b", "bob");

        let others = reg.other_client_information("a");
        assert_eq!(others.len(), 1);
        assert_eq!(others[0].index, b_index);
    }

    #[test]
    fn leases_toggle_per_session() {
        let reg = registry();
        add(&reg, "a", "alice");

        reg.renew_lease("a");
        assert!(reg.client_information("a").expect("info").holds_lease);
        reg.surrender_lease("a");
        assert!(!reg.client_information("a").expect("info").holds_lease);
    }
}
