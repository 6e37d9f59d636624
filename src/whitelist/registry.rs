// In-memory whitelist registry
// Owns every account and routes session changes through the owning account

use super::types::{Account, AccountSnapshot, MemberId, NewAccount, WhitelistError};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Mapping of account name to account
///
/// A member id appears in at most one account's session list. The registry
/// keeps no reverse index; owner lookups scan every account.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registry {
    accounts: BTreeMap<String, Account>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Total claimed sessions across all accounts
    pub fn session_count(&self) -> usize {
        self.accounts.values().map(|a| a.sessions().len()).sum()
    }

    pub fn get_account(&self, name: &str) -> Option<&Account> {
        self.accounts.get(name)
    }

    pub fn accounts(&self) -> impl Iterator<Item = &Account> {
        self.accounts.values()
    }

    /// Name of the account holding `member`'s session, if any
    pub fn find_owner(&self, member: MemberId) -> Option<&str> {
        self.accounts
            .values()
            .find(|account| account.has_session(member))
            .map(|account| account.name())
    }

    /// Register a new account
    ///
    /// Existing accounts are never overwritten. Initial sessions are claimed
    /// in order and must respect the limit and the one-owner rule; nothing is
    /// inserted if any of them fails.
    pub fn add_account(&mut self, new: NewAccount) -> Result<&Account, WhitelistError> {
        if self.accounts.contains_key(&new.name) {
            return Err(WhitelistError::DuplicateAccount(new.name));
        }

        let mut account = Account::new(
            new.name.clone(),
            new.display_name,
            new.session_limit,
            new.roles,
        );

        for member in new.sessions {
            if let Some(owner) = self.find_owner(member) {
                return Err(WhitelistError::SessionConflict {
                    member,
                    owner: owner.to_string(),
                });
            }
            account.create_session(member)?;
        }

        debug!(
            "Registered account {} (limit {}, {} session(s))",
            new.name,
            account.session_limit(),
            account.sessions().len()
        );

        Ok(self.accounts.entry(new.name).or_insert(account))
    }

    /// Remove an account and release its sessions
    ///
    /// The removed account is returned so callers can follow up on the
    /// released members. Unknown names are a no-op.
    pub fn remove_account(&mut self, name: &str) -> Option<Account> {
        self.accounts.remove(name)
    }

    pub fn list_accounts(&self) -> Vec<AccountSnapshot> {
        self.accounts.values().map(Account::snapshot).collect()
    }

    pub fn account_names(&self) -> Vec<String> {
        self.accounts.keys().cloned().collect()
    }

    /// Claim a slot on `name` for `member`
    ///
    /// Repeating a claim on the same account is a no-op; a member holding a
    /// session elsewhere is rejected.
    pub fn create_session(&mut self, name: &str, member: MemberId) -> Result<(), WhitelistError> {
        if !self.accounts.contains_key(name) {
            return Err(WhitelistError::AccountNotFound(name.to_string()));
        }

        if let Some(owner) = self.find_owner(member)
            && owner != name
        {
            return Err(WhitelistError::SessionConflict {
                member,
                owner: owner.to_string(),
            });
        }

        self.account_mut(name)?.create_session(member)
    }

    pub fn drop_session(&mut self, name: &str, member: MemberId) -> Result<bool, WhitelistError> {
        Ok(self.account_mut(name)?.drop_session(member))
    }

    pub fn drop_all_sessions(&mut self, name: &str) -> Result<Vec<MemberId>, WhitelistError> {
        Ok(self.account_mut(name)?.drop_all_sessions())
    }

    pub fn set_session_limit(
        &mut self,
        name: &str,
        limit: usize,
    ) -> Result<Vec<MemberId>, WhitelistError> {
        let evicted = self.account_mut(name)?.set_session_limit(limit);
        if !evicted.is_empty() {
            debug!(
                "Lowering limit of {} to {} evicted {} session(s)",
                name,
                limit,
                evicted.len()
            );
        }
        Ok(evicted)
    }

    /// Drop `member`'s session wherever it is held, returning the account name
    pub fn release_member(&mut self, member: MemberId) -> Option<String> {
        let owner = self.find_owner(member)?.to_string();
        if let Some(account) = self.accounts.get_mut(&owner) {
            account.drop_session(member);
        }
        Some(owner)
    }

    /// Insert an account read from durable storage
    ///
    /// Stored data is not trusted: sessions past the limit and members already
    /// owned by a previously restored account are discarded with a warning.
    /// Returns the discarded members.
    pub(crate) fn restore_account(
        &mut self,
        mut account: Account,
        sessions: Vec<MemberId>,
    ) -> Vec<MemberId> {
        let mut discarded = Vec::new();

        for member in sessions {
            if let Some(owner) = self.find_owner(member) {
                warn!(
                    "Discarding session {} on {}: already held by {}",
                    member,
                    account.name(),
                    owner
                );
                discarded.push(member);
                continue;
            }

            if account.create_session(member).is_err() {
                warn!(
                    "Discarding session {} on {}: over the limit of {}",
                    member,
                    account.name(),
                    account.session_limit()
                );
                discarded.push(member);
            }
        }

        self.accounts.insert(account.name().to_string(), account);
        discarded
    }

    fn account_mut(&mut self, name: &str) -> Result<&mut Account, WhitelistError> {
        self.accounts
            .get_mut(name)
            .ok_or_else(|| WhitelistError::AccountNotFound(name.to_string()))
    }
}
