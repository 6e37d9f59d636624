// Whitelist domain: accounts, sessions and the registry that owns them

pub mod registry;
pub mod types;

pub use registry::Registry;
pub use types::{Account, AccountSnapshot, MemberId, NewAccount, RoleId, WhitelistError};
