//! The slice of the Pocket Network SDK the stake agent needs.
//!
//! # Architecture
//!
//! ```text
//! Signer          ← ed25519 keypair parsed from a 128-char hex private key
//!     │              address = first 20 bytes of sha256(public key)
//!     ▼
//! tx::build_stake ← MsgStake + fee/memo/entropy → canonical sign doc
//!     │              signed and hex-encoded for /v1/client/rawtx
//!     ▼
//! PocketRpc       ← NodeRpc over HttpClient (retry policy, timeouts)
//! ```
//!
//! [`HttpClient`] is also used directly by the recommendation-service client
//! in `wtsc-core`, which is why it lives here rather than behind the RPC.

pub mod error;
pub mod http;
pub mod key;
pub mod rpc;
pub mod tx;
pub mod types;

pub use error::PocketError;
pub use http::{HttpClient, RetryDecision, RetryPolicy};
pub use key::Signer;
pub use rpc::{NodeRpc, PocketRpc};
pub use tx::{StakeTx, TxParams};
pub use types::{MsgStake, Node, TxReceipt};

/// Convenience `Result` alias for this crate.
pub type Result<T> = std::result::Result<T, PocketError>;
