// Whitelist account types and errors

use serde::{Deserialize, Serialize};
use std::fmt;

/// Chat-platform member identifier (the member holding a session)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberId(pub u64);

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for MemberId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Chat-platform role identifier granted to members of an account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleId(pub u64);

impl fmt::Display for RoleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for RoleId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Errors raised by account and registry operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WhitelistError {
    #[error("account already exists: {0}")]
    DuplicateAccount(String),
    #[error("account not found: {0}")]
    AccountNotFound(String),
    #[error("account {account} has no free session slot (limit {limit})")]
    CapacityExceeded { account: String, limit: usize },
    #[error("member {member} already holds a session on account {owner}")]
    SessionConflict { member: MemberId, owner: String },
}

/// A registered whitelist entry
///
/// The session list never grows past `session_limit`; every mutation that
/// could break this checks or truncates on the spot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    name: String,
    display_name: String,
    roles: Vec<RoleId>,
    session_limit: usize,
    sessions: Vec<MemberId>,
}

impl Account {
    /// Create an account with no sessions
    pub fn new(
        name: impl Into<String>,
        display_name: Option<String>,
        session_limit: usize,
        roles: Vec<RoleId>,
    ) -> Self {
        let name = name.into();
        let display_name = display_name.unwrap_or_else(|| name.clone());

        Self {
            name,
            display_name,
            roles,
            session_limit,
            sessions: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn roles(&self) -> &[RoleId] {
        &self.roles
    }

    pub fn session_limit(&self) -> usize {
        self.session_limit
    }

    /// Sessions in claim order (first claimed first)
    pub fn sessions(&self) -> &[MemberId] {
        &self.sessions
    }

    pub fn has_session(&self, member: MemberId) -> bool {
        self.sessions.contains(&member)
    }

    pub fn available_slots(&self) -> usize {
        self.session_limit.saturating_sub(self.sessions.len())
    }

    /// Claim a session slot for `member`
    ///
    /// Claiming twice is a no-op. Fails when the account is full.
    pub fn create_session(&mut self, member: MemberId) -> Result<(), WhitelistError> {
        if self.has_session(member) {
            return Ok(());
        }

        if self.sessions.len() + 1 > self.session_limit {
            return Err(WhitelistError::CapacityExceeded {
                account: self.name.clone(),
                limit: self.session_limit,
            });
        }

        self.sessions.push(member);
        Ok(())
    }

    /// Release `member`'s slot. Returns whether a session was removed.
    pub fn drop_session(&mut self, member: MemberId) -> bool {
        match self.sessions.iter().position(|m| *m == member) {
            Some(index) => {
                self.sessions.remove(index);
                true
            }
            None => false,
        }
    }

    /// Release every slot, returning the members that held them
    pub fn drop_all_sessions(&mut self) -> Vec<MemberId> {
        std::mem::take(&mut self.sessions)
    }

    /// Change capacity, evicting the most recent claims if the account is over
    /// the new limit. Evicted members are returned and are not otherwise
    /// notified.
    pub fn set_session_limit(&mut self, limit: usize) -> Vec<MemberId> {
        self.session_limit = limit;

        if self.sessions.len() > limit {
            self.sessions.split_off(limit)
        } else {
            Vec::new()
        }
    }

    /// Owned copy for presentation
    pub fn snapshot(&self) -> AccountSnapshot {
        AccountSnapshot {
            name: self.name.clone(),
            display_name: self.display_name.clone(),
            roles: self.roles.clone(),
            session_limit: self.session_limit,
            sessions: self.sessions.clone(),
        }
    }
}

/// Read-only account view handed out across the store lock
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountSnapshot {
    pub name: String,
    pub display_name: String,
    pub roles: Vec<RoleId>,
    pub session_limit: usize,
    pub sessions: Vec<MemberId>,
}

/// Parameters for registering a new account
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub name: String,
    pub display_name: Option<String>,
    pub session_limit: usize,
    pub sessions: Vec<MemberId>,
    pub roles: Vec<RoleId>,
}

impl NewAccount {
    /// Account with one session slot, no sessions and no roles
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display_name: None,
            session_limit: 1,
            sessions: Vec::new(),
            roles: Vec::new(),
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    pub fn with_session_limit(mut self, session_limit: usize) -> Self {
        self.session_limit = session_limit;
        self
    }

    pub fn with_sessions(mut self, sessions: Vec<MemberId>) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn with_roles(mut self, roles: Vec<RoleId>) -> Self {
        self.roles = roles;
        self
    }
}
