//! Transport and value-transfer boundaries for the Bazaar agent mesh.
//!
//! The core never talks to a real consensus service or chain SDK directly.
//! It consumes two narrow traits:
//!
//! - **`Topic`**: an append-only broadcast log with at-least-once delivery.
//!   Every published message reaches every subscriber; consumers filter by
//!   recipient and deduplicate by message id.
//! - **`TransferTool`**: executes a value transfer (native currency or a
//!   fungible token) and returns a receipt.
//!
//! In-process implementations (`MemoryTopic`, `MockTransferTool`) back the
//! test harness and demos.

pub mod codec;
pub mod topic;
pub mod transfer;

pub use codec::{decode_message, encode_message};
pub use topic::{Delivery, MemoryTopic, Subscription, Topic, TransportError};
pub use transfer::{MockTransferTool, TokenKind, TransferError, TransferReceipt, TransferTool};
