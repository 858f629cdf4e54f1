//! Value-transfer boundary.
//!
//! Agents never construct chain transactions themselves; they delegate to a
//! transfer tool keyed by token identifier. The `native` sentinel selects a
//! native-currency transfer, anything else a fungible-token transfer.

use async_trait::async_trait;
use bazaar_types::config::NATIVE_TOKEN;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use thiserror::Error;
use uuid::Uuid;

/// What kind of asset a transfer moves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    /// The network's native currency.
    Native,
    /// A fungible token, by external identifier.
    Token(String),
}

impl TokenKind {
    /// Resolve a wire token id into a kind.
    pub fn from_id(token_id: &str) -> Self {
        if token_id == NATIVE_TOKEN {
            TokenKind::Native
        } else {
            TokenKind::Token(token_id.to_string())
        }
    }

    /// The wire token id of this kind.
    pub fn id(&self) -> &str {
        match self {
            TokenKind::Native => NATIVE_TOKEN,
            TokenKind::Token(id) => id,
        }
    }
}

/// Errors from the transfer tool.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The transfer was rejected or reverted.
    #[error("Transfer rejected: {0}")]
    Rejected(String),

    /// The tool could not reach its backing service.
    #[error("Transfer tool unavailable: {0}")]
    Unavailable(String),
}

/// Receipt for a completed transfer.
#[derive(Debug, Clone)]
pub struct TransferReceipt {
    /// Transaction id assigned by the network.
    pub transaction_id: String,
}

/// Executes value transfers on behalf of agents.
#[async_trait]
pub trait TransferTool: Send + Sync {
    /// Transfer `amount` of `token` to `to_account`, tagged with `memo`.
    async fn transfer(
        &self,
        to_account: &str,
        amount: f64,
        token: &TokenKind,
        memo: &str,
    ) -> Result<TransferReceipt, TransferError>;
}

/// A transfer made through [`MockTransferTool`], recorded for assertions.
#[derive(Debug, Clone)]
pub struct RecordedTransfer {
    pub to_account: String,
    pub amount: f64,
    pub token: TokenKind,
    pub memo: String,
}

/// In-memory transfer tool for tests and demos.
///
/// Records every call and hands out synthetic transaction ids; `fail_next`
/// scripts a one-shot failure.
#[derive(Default)]
pub struct MockTransferTool {
    calls: Mutex<Vec<RecordedTransfer>>,
    fail_next: AtomicBool,
}

impl MockTransferTool {
    /// Create a tool that succeeds on every call.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next transfer fail with a rejection.
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// All transfers executed so far.
    pub fn calls(&self) -> Vec<RecordedTransfer> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of transfers executed.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl TransferTool for MockTransferTool {
    async fn transfer(
        &self,
        to_account: &str,
        amount: f64,
        token: &TokenKind,
        memo: &str,
    ) -> Result<TransferReceipt, TransferError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(TransferError::Rejected("scripted failure".to_string()));
        }
        if amount <= 0.0 {
            return Err(TransferError::Rejected(format!(
                "non-positive amount: {amount}"
            )));
        }
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(RecordedTransfer {
                to_account: to_account.to_string(),
                amount,
                token: token.clone(),
                memo: memo.to_string(),
            });
        Ok(TransferReceipt {
            transaction_id: format!("0.0.mock@{}", Uuid::new_v4()),
        })
    }
}
