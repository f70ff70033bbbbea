//! Per-account mailbox clients built from configuration

use futures::future::join_all;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use google_gmail1::yup_oauth2::ApplicationSecret;

use crate::auth;
use crate::client::{GmailMailboxClient, MailboxClient};
use crate::config::{AccountConfig, Config};
use crate::error::{Result, TriageError};
use crate::models::AccountFailure;

/// An authenticated client bound to one account
#[derive(Clone)]
pub struct AccountClient {
    pub account: String,
    pub client: Arc<dyn MailboxClient>,
}

impl AccountClient {
    pub fn new(account: impl Into<String>, client: Arc<dyn MailboxClient>) -> Self {
        Self {
            account: account.into(),
            client,
        }
    }
}

/// Clients for every configured account, plus the accounts that failed to connect
#[derive(Clone, Default)]
pub struct MailboxPool {
    clients: Vec<AccountClient>,
    failures: Vec<AccountFailure>,
}

impl MailboxPool {
    /// Build one Gmail client per configured account.
    ///
    /// Fails only when no accounts are configured. Accounts without a cached
    /// token, or whose hub is not ready within the scan budget, are recorded
    /// as failures; the interactive consent flow only runs from `auth`.
    pub async fn connect(config: &Config, credentials_path: &Path) -> Result<Self> {
        if config.accounts.is_empty() {
            return Err(TriageError::NoAccountsConfigured);
        }

        let secret = auth::application_secret(credentials_path).await?;
        let budget = Duration::from_secs(config.scan.timeout_secs);

        let results = join_all(
            config
                .accounts
                .iter()
                .map(|account| connect_account(account, secret.clone(), budget)),
        )
        .await;

        let mut pool = Self::default();
        for result in results {
            match result {
                Ok(client) => pool.clients.push(client),
                Err(failure) => pool.failures.push(failure),
            }
        }

        Ok(pool)
    }

    /// Pool over already-built clients
    pub fn from_clients(clients: Vec<AccountClient>) -> Self {
        Self {
            clients,
            failures: Vec::new(),
        }
    }

    pub fn with_failures(mut self, failures: Vec<AccountFailure>) -> Self {
        self.failures.extend(failures);
        self
    }

    pub fn clients(&self) -> &[AccountClient] {
        &self.clients
    }

    pub fn failures(&self) -> &[AccountFailure] {
        &self.failures
    }

    /// Accounts configured, connected or not
    pub fn configured(&self) -> usize {
        self.clients.len() + self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configured() == 0
    }
}

/// Hub for one account from its cached token, never prompting for consent
async fn connect_account(
    account: &AccountConfig,
    secret: ApplicationSecret,
    budget: Duration,
) -> std::result::Result<AccountClient, AccountFailure> {
    let failure = |error: String| {
        warn!("Account {} unavailable: {}", account.name, error);
        AccountFailure {
            account: account.name.clone(),
            error,
        }
    };

    let token_cache = account.token_cache_path();
    if !token_cache.exists() {
        return Err(failure(format!(
            "not authenticated, run `mail-triage auth --account {}`",
            account.name
        )));
    }

    match tokio::time::timeout(budget, auth::initialize_gmail_hub(secret, &token_cache)).await {
        Ok(Ok(hub)) => {
            info!("Connected account {}", account.name);
            Ok(AccountClient::new(
                account.name.clone(),
                Arc::new(GmailMailboxClient::new(hub)),
            ))
        }
        Ok(Err(e)) => Err(failure(e.to_string())),
        Err(_) => Err(failure(format!(
            "token refresh did not finish within {:?}, run `mail-triage auth --account {} --force`",
            budget, account.name
        ))),
    }
}
