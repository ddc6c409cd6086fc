//! Process-wide chat state: reserved names and logged-in users.
//!
//! Every mutation takes the `registered` mutex first, then (when needed) the
//! `users` write lock, so register/login/logout are linearized through one
//! critical section. Routing lookups take only the `users` read lock.
//! Neither lock is ever held across an `.await`.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError, RwLock};

use tokio::sync::mpsc;

use certchat_core::types::is_valid_name;
use certchat_core::{CertChatError, CertChatResult, Message};

/// Write side of a connection, drained by that connection's writer task.
pub type Outbox = mpsc::Sender<Message>;

/// A logged-in, routable user.
#[derive(Debug, Clone)]
pub struct User {
    pub name: String,
    pub outbox: Outbox,
    /// Encoded certificate presented at login
    pub certificate: String,
}

/// Peers to notify after a membership change, collected under the lock
/// and sent to after it is released.
pub type Peers = Vec<(String, Outbox)>;

#[derive(Debug, Default)]
pub struct Registry {
    registered: Mutex<HashSet<String>>,
    users: RwLock<HashMap<String, User>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `name`. Fails if the name is malformed or already reserved.
    pub fn register(&self, name: &str) -> CertChatResult<()> {
        if !is_valid_name(name) {
            return Err(CertChatError::InvalidName(name.to_string()));
        }
        let mut registered = self.registered.lock().unwrap_or_else(PoisonError::into_inner);
        if !registered.insert(name.to_string()) {
            return Err(CertChatError::DuplicateName(name.to_string()));
        }
        Ok(())
    }

    /// Admit `user` if its name is registered and not already logged in.
    ///
    /// `greet` receives the certificates of every other logged-in user and
    /// runs inside the critical section, so whatever it queues on the new
    /// user's outbox precedes any later presence broadcast. If `greet` fails
    /// the user is not admitted.
    ///
    /// Returns the other users, to be told about the arrival.
    pub fn login<F>(&self, user: User, greet: F) -> CertChatResult<Peers>
    where
        F: FnOnce(&[String]) -> CertChatResult<()>,
    {
        let registered = self.registered.lock().unwrap_or_else(PoisonError::into_inner);
        if !registered.contains(&user.name) {
            return Err(CertChatError::NotRegistered(user.name));
        }
        let mut users = self.users.write().unwrap_or_else(PoisonError::into_inner);
        if users.contains_key(&user.name) {
            return Err(CertChatError::DuplicateName(user.name));
        }

        let roster: Vec<String> = users.values().map(|u| u.certificate.clone()).collect();
        greet(&roster)?;

        let peers = users
            .values()
            .map(|u| (u.name.clone(), u.outbox.clone()))
            .collect();
        users.insert(user.name.clone(), user);
        Ok(peers)
    }

    /// Drop `name` from both the logged-in map and the reserved set.
    ///
    /// Returns the remaining users when `name` was logged in, `None` otherwise.
    pub fn logout(&self, name: &str) -> Option<Peers> {
        let mut registered = self.registered.lock().unwrap_or_else(PoisonError::into_inner);
        let mut users = self.users.write().unwrap_or_else(PoisonError::into_inner);
        registered.remove(name);
        users.remove(name)?;
        Some(
            users
                .values()
                .map(|u| (u.name.clone(), u.outbox.clone()))
                .collect(),
        )
    }

    /// Give back a reservation that never reached login.
    ///
    /// No-op (returns `false`) while someone is logged in under `name`.
    pub fn release(&self, name: &str) -> bool {
        let mut registered = self.registered.lock().unwrap_or_else(PoisonError::into_inner);
        let users = self.users.read().unwrap_or_else(PoisonError::into_inner);
        if users.contains_key(name) {
            return false;
        }
        registered.remove(name)
    }

    /// Outboxes of the named users; unknown names are returned separately.
    pub fn resolve<'a, I>(&self, names: I) -> (Peers, Vec<String>)
    where
        I: IntoIterator<Item = &'a str>,
    {
        let users = self.users.read().unwrap_or_else(PoisonError::into_inner);
        let mut found = Vec::new();
        let mut missing = Vec::new();
        for name in names {
            match users.get(name) {
                Some(u) => found.push((u.name.clone(), u.outbox.clone())),
                None => missing.push(name.to_string()),
            }
        }
        (found, missing)
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.registered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(name)
    }

    pub fn is_logged_in(&self, name: &str) -> bool {
        self.users
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Names of logged-in users, sorted.
    pub fn logged_in(&self) -> Vec<String> {
        let users = self.users.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = users.keys().cloned().collect();
        names.sort();
        names
    }
}
