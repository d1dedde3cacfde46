use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use pocket_client::{tx, NodeRpc, PocketError, Signer, TxParams, TxReceipt};
use rand::Rng;
use thiserror::Error;
use tracing::{debug, info};

/// The stage a stake submission was in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StakeStep {
    ReadNode,
    BuildMessage,
    Sign,
    Broadcast,
}

impl fmt::Display for StakeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StakeStep::ReadNode => "read_node",
            StakeStep::BuildMessage => "build_message",
            StakeStep::Sign => "sign",
            StakeStep::Broadcast => "broadcast",
        })
    }
}

#[derive(Debug, Error)]
pub enum StakeError {
    #[error("{address}: {step} failed: {source}")]
    Failed {
        address: String,
        step: StakeStep,
        #[source]
        source: PocketError,
    },

    #[error("{address}: broadcast timed out after {timeout:?}")]
    TimedOut { address: String, timeout: Duration },

    #[error("{address}: transaction {txhash} rejected with code {code}: {raw_log}")]
    Rejected {
        address: String,
        txhash: String,
        code: u32,
        raw_log: String,
    },
}

/// Re-stake one servicer on a new set of services, keeping its current
/// balance, service URL and output address.
#[derive(Clone)]
pub struct StakeTask {
    pub signer: Arc<Signer>,
    pub services: Vec<String>,
    pub rpc: Arc<dyn NodeRpc>,
    pub params: TxParams,
    pub broadcast_timeout: Duration,
}

impl StakeTask {
    pub async fn run(self) -> Result<TxReceipt, StakeError> {
        let address = self.signer.address().to_string();
        let fail = |step: StakeStep| {
            let address = address.clone();
            move |source: PocketError| StakeError::Failed {
                address,
                step,
                source,
            }
        };

        debug!(address = %address, step = %StakeStep::ReadNode, "reading node from rpc");
        let node = self
            .rpc
            .get_node(&address)
            .await
            .map_err(fail(StakeStep::ReadNode))?;

        debug!(address = %address, step = %StakeStep::BuildMessage, "building stake message");
        let msg = tx::stake_message(&self.signer, &node, self.services.clone())
            .map_err(fail(StakeStep::BuildMessage))?;

        let entropy = rand::thread_rng().gen_range(0..i64::MAX);
        debug!(address = %address, step = %StakeStep::Sign, "signing stake transaction");
        let signed = tx::build_stake(&self.signer, &msg, &self.params, entropy)
            .map_err(fail(StakeStep::Sign))?;

        debug!(address = %address, step = %StakeStep::Broadcast, "broadcasting stake transaction");
        let receipt = tokio::time::timeout(
            self.broadcast_timeout,
            self.rpc.send_raw_tx(&signed.address, &signed.raw_hex),
        )
        .await
        .map_err(|_| StakeError::TimedOut {
            address: address.clone(),
            timeout: self.broadcast_timeout,
        })?
        .map_err(fail(StakeStep::Broadcast))?;

        if receipt.code != 0 {
            return Err(StakeError::Rejected {
                address,
                txhash: receipt.txhash,
                code: receipt.code,
                raw_log: receipt.raw_log,
            });
        }

        info!(
            address = %address,
            chains = ?self.services,
            height = %receipt.height,
            hash = %receipt.txhash,
            raw_log = %receipt.raw_log,
            "successfully submitted stake node transaction"
        );
        Ok(receipt)
    }
}
