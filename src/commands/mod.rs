// Command layer
// Platform-agnostic handlers for the member and admin commands. Chat
// presentation and nickname/role side effects stay with the caller.

use crate::store::{StoreError, WhitelistStore};
use crate::whitelist::{AccountSnapshot, MemberId, NewAccount, RoleId, WhitelistError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// Canonical account key: lowercase with all whitespace removed
pub fn normalize_username(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// User-facing command failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("You already have a session on {account}!")]
    AlreadyLoggedIn { account: String },
    #[error("You do not have any sessions!")]
    NoSession,
    #[error("Username {0} does not exist")]
    UnknownUsername(String),
    #[error("Username {0} cannot have any more sessions!")]
    NoFreeSlots(String),
    #[error("Username {0} is already whitelisted!")]
    UsernameTaken(String),
    #[error("Member {member} already has the whitelist username {account} assigned!")]
    MemberAlreadyAssigned { member: MemberId, account: String },
    #[error("Please provide a username")]
    InvalidUsername,
    #[error("The whitelist store is unavailable: {0}")]
    Store(String),
}

impl From<WhitelistError> for CommandError {
    fn from(err: WhitelistError) -> Self {
        match err {
            WhitelistError::DuplicateAccount(name) => CommandError::UsernameTaken(name),
            WhitelistError::AccountNotFound(name) => CommandError::UnknownUsername(name),
            WhitelistError::CapacityExceeded { account, .. } => CommandError::NoFreeSlots(account),
            WhitelistError::SessionConflict { member, owner } => {
                CommandError::MemberAlreadyAssigned {
                    member,
                    account: owner,
                }
            }
        }
    }
}

impl From<StoreError> for CommandError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Whitelist(err) => err.into(),
            other => CommandError::Store(other.to_string()),
        }
    }
}

/// What a successful login grants the member
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoginGrant {
    pub account: String,
    pub display_name: String,
    pub roles: Vec<RoleId>,
}

/// Admin request to whitelist a username
#[derive(Debug, Clone, Default)]
pub struct AddRequest {
    /// Raw username as typed; normalized before use
    pub username: String,
    /// Display name; defaults to the raw username
    pub pretty: Option<String>,
    /// Session capacity; defaults to 1
    pub max_sessions: Option<usize>,
    /// Member to log in immediately
    pub member: Option<MemberId>,
    pub roles: Vec<RoleId>,
}

/// Store freshness summary
#[derive(Debug, Clone, Serialize)]
pub struct StoreStatus {
    pub accounts: usize,
    pub sessions: usize,
    pub last_loaded_at: Option<DateTime<Utc>>,
    pub last_persisted_at: Option<DateTime<Utc>>,
}

/// Command handlers bound to one store
#[derive(Clone)]
pub struct WhitelistCommands {
    store: Arc<WhitelistStore>,
}

impl WhitelistCommands {
    pub fn new(store: Arc<WhitelistStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<WhitelistStore> {
        &self.store
    }

    /// Claim a session on `username` for `member`
    ///
    /// The "no session yet" check and the claim happen under one lock.
    pub async fn login(&self, member: MemberId, username: &str) -> Result<LoginGrant, CommandError> {
        let username = normalized(username)?;

        let grant = self
            .store
            .update(|registry| -> Result<LoginGrant, CommandError> {
                if let Some(owner) = registry.find_owner(member) {
                    return Err(CommandError::AlreadyLoggedIn {
                        account: owner.to_string(),
                    });
                }

                registry.create_session(&username, member)?;

                let account = registry
                    .get_account(&username)
                    .ok_or_else(|| CommandError::UnknownUsername(username.clone()))?;
                Ok(LoginGrant {
                    account: account.name().to_string(),
                    display_name: account.display_name().to_string(),
                    roles: account.roles().to_vec(),
                })
            })
            .await?;

        info!("Member {} logged in as {}", member, grant.account);
        Ok(grant)
    }

    /// Release `member`'s session, returning the account it was held on
    pub async fn logout(&self, member: MemberId) -> Result<String, CommandError> {
        let account = self
            .store
            .release_member(member)
            .await
            .ok_or(CommandError::NoSession)?;

        info!("Member {} logged out of {}", member, account);
        Ok(account)
    }

    pub async fn whois(&self, username: &str) -> Result<AccountSnapshot, CommandError> {
        let username = normalized(username)?;
        self.store
            .get_account(&username)
            .await
            .ok_or(CommandError::UnknownUsername(username))
    }

    pub async fn whitelist_add(&self, request: AddRequest) -> Result<AccountSnapshot, CommandError> {
        let username = normalized(&request.username)?;
        let pretty = request.pretty.unwrap_or_else(|| request.username.clone());

        let mut new = NewAccount::new(username)
            .with_display_name(pretty)
            .with_roles(request.roles);
        if let Some(max_sessions) = request.max_sessions {
            new = new.with_session_limit(max_sessions);
        }
        if let Some(member) = request.member {
            new = new.with_sessions(vec![member]);
        }

        Ok(self.store.add_account(new).await?)
    }

    /// Remove a username, returning the members whose sessions were released
    pub async fn whitelist_remove(&self, username: &str) -> Result<Vec<MemberId>, CommandError> {
        let username = normalized(username)?;
        self.store
            .remove_account(&username)
            .await
            .map(|account| account.sessions)
            .ok_or(CommandError::UnknownUsername(username))
    }

    pub async fn whitelist_list(&self) -> Vec<String> {
        self.store.read(|registry| registry.account_names()).await
    }

    /// Change a username's capacity, returning evicted members
    pub async fn set_limit(
        &self,
        username: &str,
        limit: usize,
    ) -> Result<Vec<MemberId>, CommandError> {
        let username = normalized(username)?;
        let evicted = self.store.set_session_limit(&username, limit).await?;

        info!(
            "Session limit of {} set to {} ({} evicted)",
            username,
            limit,
            evicted.len()
        );
        Ok(evicted)
    }

    /// Flush and re-read the store
    pub async fn reload(&self) -> Result<usize, CommandError> {
        Ok(self.store.reload().await?)
    }

    pub async fn status(&self) -> StoreStatus {
        let (accounts, sessions) = self
            .store
            .read(|registry| (registry.len(), registry.session_count()))
            .await;

        StoreStatus {
            accounts,
            sessions,
            last_loaded_at: self.store.last_loaded_at().await,
            last_persisted_at: self.store.last_persisted_at().await,
        }
    }
}

fn normalized(raw: &str) -> Result<String, CommandError> {
    let username = normalize_username(raw);
    if username.is_empty() {
        return Err(CommandError::InvalidUsername);
    }
    Ok(username)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryDocumentStorage;

    async fn commands() -> WhitelistCommands {
        let store = WhitelistStore::open(Arc::new(MemoryDocumentStorage::new()))
            .await
            .unwrap();
        WhitelistCommands::new(Arc::new(store))
    }

    fn add(username: &str, max_sessions: usize) -> AddRequest {
        AddRequest {
            username: username.to_string(),
            max_sessions: Some(max_sessions),
            ..Default::default()
        }
    }

    #[test]
    fn test_normalize_username() {
        assert_eq!(normalize_username("  Big Tom "), "bigtom");
        assert_eq!(normalize_username("ALICE\t1"), "alice1");
        assert_eq!(normalize_username(" \n "), "");
    }

    #[tokio::test]
    async fn test_add_uses_raw_name_as_display() {
        let commands = commands().await;
        let account = commands
            .whitelist_add(AddRequest {
                username: "Big Tom".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(account.name, "bigtom");
        assert_eq!(account.display_name, "Big Tom");
        assert_eq!(account.session_limit, 1);
    }

    #[tokio::test]
    async fn test_login_grants_display_name_and_roles() {
        let commands = commands().await;
        commands
            .whitelist_add(AddRequest {
                username: "alice".to_string(),
                pretty: Some("Alice".to_string()),
                roles: vec![RoleId(11), RoleId(12)],
                ..Default::default()
            })
            .await
            .unwrap();

        let grant = commands.login(MemberId(1), " ALICE ").await.unwrap();
        assert_eq!(grant.display_name, "Alice");
        assert_eq!(grant.roles, vec![RoleId(11), RoleId(12)]);
    }

    #[tokio::test]
    async fn test_login_errors() {
        let commands = commands().await;
        commands.whitelist_add(add("alice", 1)).await.unwrap();
        commands.whitelist_add(add("bob", 1)).await.unwrap();

        assert_eq!(
            commands.login(MemberId(1), "nobody").await,
            Err(CommandError::UnknownUsername("nobody".to_string()))
        );

        commands.login(MemberId(1), "alice").await.unwrap();
        assert_eq!(
            commands.login(MemberId(1), "bob").await,
            Err(CommandError::AlreadyLoggedIn {
                account: "alice".to_string()
            })
        );
        assert_eq!(
            commands.login(MemberId(2), "alice").await,
            Err(CommandError::NoFreeSlots("alice".to_string()))
        );
        assert_eq!(
            commands.login(MemberId(3), "   ").await,
            Err(CommandError::InvalidUsername)
        );
    }

    #[tokio::test]
    async fn test_logout() {
        let commands = commands().await;
        commands.whitelist_add(add("alice", 1)).await.unwrap();
        commands.login(MemberId(1), "alice").await.unwrap();

        assert_eq!(commands.logout(MemberId(1)).await.unwrap(), "alice");
        assert_eq!(commands.logout(MemberId(1)).await, Err(CommandError::NoSession));

        // Slot is free again
        commands.login(MemberId(2), "alice").await.unwrap();
    }

    #[tokio::test]
    async fn test_add_rejects_taken_username_and_member() {
        let commands = commands().await;
        commands
            .whitelist_add(AddRequest {
                username: "alice".to_string(),
                member: Some(MemberId(5)),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(
            commands.whitelist_add(add("Alice", 3)).await,
            Err(CommandError::UsernameTaken("alice".to_string()))
        );
        assert_eq!(
            commands
                .whitelist_add(AddRequest {
                    username: "bob".to_string(),
                    member: Some(MemberId(5)),
                    ..Default::default()
                })
                .await,
            Err(CommandError::MemberAlreadyAssigned {
                member: MemberId(5),
                account: "alice".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_remove_releases_members() {
        let commands = commands().await;
        commands.whitelist_add(add("alice", 2)).await.unwrap();
        commands.login(MemberId(1), "alice").await.unwrap();
        commands.login(MemberId(2), "alice").await.unwrap();

        let released = commands.whitelist_remove("alice").await.unwrap();
        assert_eq!(released, vec![MemberId(1), MemberId(2)]);
        assert_eq!(
            commands.whitelist_remove("alice").await,
            Err(CommandError::UnknownUsername("alice".to_string()))
        );
        assert_eq!(commands.logout(MemberId(1)).await, Err(CommandError::NoSession));
    }

    #[tokio::test]
    async fn test_set_limit_and_whois() {
        let commands = commands().await;
        commands.whitelist_add(add("alice", 3)).await.unwrap();
        for id in 1..=3 {
            commands.login(MemberId(id), "alice").await.unwrap();
        }

        let evicted = commands.set_limit("alice", 1).await.unwrap();
        assert_eq!(evicted, vec![MemberId(2), MemberId(3)]);

        let account = commands.whois("alice").await.unwrap();
        assert_eq!(account.sessions, vec![MemberId(1)]);
        assert_eq!(account.session_limit, 1);
    }

    #[tokio::test]
    async fn test_list_and_status() {
        let commands = commands().await;
        commands.whitelist_add(add("alice", 1)).await.unwrap();
        commands.login(MemberId(1), "alice").await.unwrap();

        let names = commands.whitelist_list().await;
        assert!(names.contains(&"alice".to_string()));
        assert!(names.contains(&"example_user".to_string()));

        commands.reload().await.unwrap();
        let status = commands.status().await;
        assert_eq!(status.accounts, 2);
        assert_eq!(status.sessions, 1);
        assert!(status.last_loaded_at.is_some());
        assert!(status.last_persisted_at.is_some());
    }

    #[test]
    fn test_store_errors_become_messages() {
        let err: CommandError = StoreError::PersistenceFailure("disk full".to_string()).into();
        assert_eq!(
            err.to_string(),
            "The whitelist store is unavailable: persistence failure: disk full"
        );
    }
}
