use serde::Serialize;

use crate::key::Signer;
use crate::types::{MsgStake, Node};
use crate::{PocketError, Result};

pub const DENOM: &str = "upokt";
const MSG_STAKE_TYPE: &str = "pos/8.0MsgStake";

/// Network-level parameters shared by every stake transaction in a run.
#[derive(Debug, Clone, PartialEq)]
pub struct TxParams {
    pub network_id: String,
    pub fee: u64,
    pub memo: String,
}

/// A signed stake transaction ready for `/v1/client/rawtx`.
#[derive(Debug, Clone)]
pub struct StakeTx {
    pub address: String,
    pub raw_hex: String,
}

#[derive(Serialize)]
struct Coin<'a> {
    amount: String,
    denom: &'a str,
}

#[derive(Serialize)]
struct TypedMsg<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    value: &'a MsgStake,
}

/// Fields in lexical order: the JSON encoding is the canonical sign bytes.
#[derive(Serialize)]
struct SignDoc<'a> {
    chain_id: &'a str,
    entropy: String,
    fee: Vec<Coin<'a>>,
    memo: &'a str,
    msg: TypedMsg<'a>,
}

#[derive(Serialize)]
struct StdSignature<'a> {
    pub_key: &'a str,
    signature: String,
}

#[derive(Serialize)]
struct StdTx<'a> {
    entropy: String,
    fee: Vec<Coin<'a>>,
    memo: &'a str,
    msg: TypedMsg<'a>,
    signature: StdSignature<'a>,
}

/// Build the stake message that re-stakes `node` on `chains` with its
/// current token balance.
pub fn stake_message(signer: &Signer, node: &Node, chains: Vec<String>) -> Result<MsgStake> {
    let tokens = node.staked_tokens()?;
    if hex::decode(&node.output_address).is_err() {
        return Err(PocketError::InvalidNode {
            address: node.address.clone(),
            reason: format!("output address '{}' is not hex", node.output_address),
        });
    }
    Ok(MsgStake {
        chains,
        output_address: node.output_address.clone(),
        public_key: signer.public_key().to_string(),
        service_url: node.service_url.clone(),
        value: tokens.to_string(),
    })
}

/// Canonical bytes the signer commits to.
pub fn sign_bytes(msg: &MsgStake, params: &TxParams, entropy: i64) -> Result<Vec<u8>> {
    let doc = SignDoc {
        chain_id: &params.network_id,
        entropy: entropy.to_string(),
        fee: fee(params),
        memo: &params.memo,
        msg: typed(msg),
    };
    Ok(serde_json::to_vec(&doc)?)
}

/// Sign `msg` and encode the full transaction as hex.
pub fn build_stake(
    signer: &Signer,
    msg: &MsgStake,
    params: &TxParams,
    entropy: i64,
) -> Result<StakeTx> {
    let signature = signer.sign(&sign_bytes(msg, params, entropy)?);
    let tx = StdTx {
        entropy: entropy.to_string(),
        fee: fee(params),
        memo: &params.memo,
        msg: typed(msg),
        signature: StdSignature {
            pub_key: signer.public_key(),
            signature: hex::encode(signature),
        },
    };
    Ok(StakeTx {
        address: signer.address().to_string(),
        raw_hex: hex::encode(serde_json::to_vec(&tx)?),
    })
}

fn fee(params: &TxParams) -> Vec<Coin<'static>> {
    vec![Coin {
        amount: params.fee.to_string(),
        denom: DENOM,
    }]
}

fn typed(msg: &MsgStake) -> TypedMsg<'_> {
    TypedMsg {
        kind: MSG_STAKE_TYPE,
        value: msg,
    }
}
