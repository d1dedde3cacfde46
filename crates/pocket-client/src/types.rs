use serde::{Deserialize, Deserializer, Serialize};

use crate::{PocketError, Result};

// ─── Node ─────────────────────────────────────────────────────────────────

/// On-chain servicer record as returned by `/v1/query/node`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub address: String,
    #[serde(default)]
    pub public_key: String,
    #[serde(default)]
    pub chains: Vec<String>,
    #[serde(default)]
    pub service_url: String,
    #[serde(deserialize_with = "string_or_number")]
    pub tokens: String,
    #[serde(default)]
    pub output_address: String,
    #[serde(default)]
    pub jailed: bool,
    #[serde(default)]
    pub status: i32,
}

impl Node {
    /// Staked amount in upokt.
    pub fn staked_tokens(&self) -> Result<u64> {
        self.tokens
            .parse()
            .map_err(|_| PocketError::InvalidNode {
                address: self.address.clone(),
                reason: format!("tokens '{}' is not an unsigned integer", self.tokens),
            })
    }
}

// ─── MsgStake ─────────────────────────────────────────────────────────────

/// The stake message. Fields are declared in lexical order so the
/// serialized form is canonical.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MsgStake {
    pub chains: Vec<String>,
    pub output_address: String,
    pub public_key: String,
    pub service_url: String,
    pub value: String,
}

// ─── TxReceipt ────────────────────────────────────────────────────────────

/// Response of `/v1/client/rawtx`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxReceipt {
    #[serde(default, deserialize_with = "string_or_number")]
    pub height: String,
    pub txhash: String,
    #[serde(default)]
    pub code: u32,
    #[serde(default)]
    pub raw_log: String,
}

/// Accept `"123"` and `123` alike; Pocket nodes are inconsistent about it.
fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Num(serde_json::Number),
    }
    Ok(match Raw::deserialize(deserializer)? {
        Raw::Str(s) => s,
        Raw::Num(n) => n.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_node_record() {
        let json = r#"{
            "address": "f3abbe313689a603a1a6d6a43330d0440a552288",
            "chains": ["0001", "0021"],
            "jailed": false,
            "output_address": "0b6e5bd3a8e5a7a3d3bd8d2e0b2f3e0dcf4b5a11",
            "public_key": "aa",
            "service_url": "https://node1.example.com:443",
            "status": 2,
            "tokens": "60000000000",
            "unstaking_time": "0001-01-01T00:00:00Z"
        }"#;
        let node: Node = serde_json::from_str(json).unwrap();
        assert_eq!(node.chains.len(), 2);
        assert_eq!(node.staked_tokens().unwrap(), 60_000_000_000);
    }

    #[test]
    fn numeric_tokens_are_accepted() {
        let node: Node = serde_json::from_str(r#"{"address":"a","tokens":15000}"#).unwrap();
        assert_eq!(node.staked_tokens().unwrap(), 15_000);
    }

    #[test]
    fn negative_tokens_fail() {
        let node: Node = serde_json::from_str(r#"{"address":"a","tokens":"-1"}"#).unwrap();
        assert!(matches!(
            node.staked_tokens(),
            Err(PocketError::InvalidNode { .. })
        ));
    }

    #[test]
    fn receipt_height_as_number() {
        let receipt: TxReceipt =
            serde_json::from_str(r#"{"height":12345,"txhash":"ABCD","raw_log":""}"#).unwrap();
        assert_eq!(receipt.height, "12345");
        assert_eq!(receipt.code, 0);
    }
}
