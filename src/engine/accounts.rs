use async_trait::async_trait;
use dashmap::DashMap;
use tracing::info;
use ulid::Ulid;

use crate::limits::MAX_NICKNAME_LEN;
use crate::model::*;

use super::{EngineError, Journal};

/// Account lookup as the schedule use cases see it.
#[async_trait]
pub trait AccountProvider: Send + Sync {
    async fn get(&self, id: Ulid) -> Option<Account>;

    async fn get_or_raise(&self, id: Ulid) -> Result<Account, EngineError> {
        self.get(id)
            .await
            .ok_or_else(|| EngineError::NotFound(format!("not exist account. account_id: '{id}'")))
    }
}

pub struct AccountStore {
    accounts: DashMap<Ulid, Account>,
    journal: Journal,
}

impl AccountStore {
    pub(super) fn new(journal: Journal) -> Self {
        Self {
            accounts: DashMap::new(),
            journal,
        }
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    pub async fn create(&self, nickname: String, role: Role) -> Result<Account, EngineError> {
        if nickname.trim().is_empty() {
            return Err(EngineError::InvalidArgument("nickname must not be empty".into()));
        }
        if nickname.chars().count() > MAX_NICKNAME_LEN {
            return Err(EngineError::InvalidArgument(format!(
                "nickname must be at most {MAX_NICKNAME_LEN} characters"
            )));
        }
        let account = Account {
            id: Ulid::new(),
            nickname,
            role,
        };
        let event = Event::AccountCreated {
            id: account.id,
            nickname: account.nickname.clone(),
            role,
        };
        self.journal
            .commit(&event, || {
                self.accounts.insert(account.id, account.clone());
            })
            .await?;
        info!(account_id = %account.id, role = ?role, "account created");
        Ok(account)
    }

    pub fn snapshot(&self) -> Vec<Account> {
        let mut accounts: Vec<Account> = self.accounts.iter().map(|e| e.value().clone()).collect();
        accounts.sort_by_key(|a| a.id);
        accounts
    }

    pub(super) fn restore(&self, account: Account) {
        self.accounts.insert(account.id, account);
    }
}

#[async_trait]
impl AccountProvider for AccountStore {
    async fn get(&self, id: Ulid) -> Option<Account> {
        self.accounts.get(&id).map(|e| e.value().clone())
    }
}
