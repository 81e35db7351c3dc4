//! Raw log → [`ChainEvent`] decoding.
//!
//! Logs are matched to an event ABI by topic0, decoded with `alloy-dyn-abi`,
//! and their arguments normalized to JSON the way the event handlers expect
//! them: integers that fit in a `u64` become JSON numbers, larger ones
//! decimal strings; addresses, bytes and hashes become `0x` hex strings.

use std::collections::HashMap;

use alloy_dyn_abi::{DynSolValue, EventExt};
use alloy_primitives::B256;
use serde_json::{Map, Value};

use bountyindex_core::error::DecodeError;
use bountyindex_core::types::{ChainEvent, EventSource};

use crate::abi::SourceAbi;
use crate::fetcher::RawLog;

/// Per-source ABIs, keyed by the source's lowercased address.
#[derive(Debug, Clone, Default)]
pub struct LogDecoder {
    abis: HashMap<String, (EventSource, SourceAbi)>,
}

impl LogDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, source: EventSource, abi: SourceAbi) {
        self.abis.insert(source.id(), (source, abi));
    }

    pub fn abi(&self, source: &EventSource) -> Option<&SourceAbi> {
        self.abis.get(&source.id()).map(|(_, abi)| abi)
    }

    pub fn sources(&self) -> impl Iterator<Item = &EventSource> {
        self.abis.values().map(|(source, _)| source)
    }

    /// Decode `log` emitted by `source`.
    ///
    /// Returns `Ok(None)` for logs whose topic0 matches no known event.
    pub fn decode(
        &self,
        source: &EventSource,
        log: &RawLog,
        block_number: u64,
        log_index: u32,
        block_timestamp: i64,
    ) -> Result<Option<ChainEvent>, DecodeError> {
        let abi = self.abi(source).ok_or_else(|| DecodeError::Abi {
            reason: format!("no ABI registered for {source}"),
        })?;

        let topics = log
            .topics
            .iter()
            .map(|t| {
                t.parse::<B256>().map_err(|e| DecodeError::Abi {
                    reason: format!("invalid topic '{t}': {e}"),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let Some(selector) = topics.first() else {
            return Ok(None);
        };
        let Some(event) = abi.event(selector) else {
            return Ok(None);
        };

        let data = hex::decode(log.data.strip_prefix("0x").unwrap_or(&log.data)).map_err(|e| {
            DecodeError::Abi {
                reason: format!("invalid log data: {e}"),
            }
        })?;

        let decoded = event
            .decode_log_parts(topics.iter().copied(), &data, true)
            .map_err(|e| DecodeError::Abi {
                reason: format!("{}: {e}", event.name),
            })?;

        let mut indexed = decoded.indexed.into_iter();
        let mut body = decoded.body.into_iter();
        let mut args = Map::new();
        for (position, param) in event.inputs.iter().enumerate() {
            let value = if param.indexed {
                indexed.next()
            } else {
                body.next()
            };
            let name = if param.name.is_empty() {
                position.to_string()
            } else {
                param.name.clone()
            };
            args.insert(name, value.map(normalize).unwrap_or(Value::Null));
        }

        Ok(Some(ChainEvent {
            source: source.kind,
            contract: source.id(),
            event_name: event.name.clone(),
            args,
            block_number,
            log_index,
            block_timestamp,
            tx_hash: log.tx_hash.clone().unwrap_or_default(),
        }))
    }
}

/// Convert a decoded `DynSolValue` into JSON.
pub fn normalize(val: DynSolValue) -> Value {
    match val {
        DynSolValue::Bool(b) => Value::Bool(b),

        DynSolValue::Uint(u, _) => match u64::try_from(u) {
            Ok(v) => Value::from(v),
            Err(_) => Value::String(u.to_string()),
        },

        DynSolValue::Int(i, _) => {
            let text = i.to_string();
            match text.parse::<i64>() {
                Ok(v) => Value::from(v),
                Err(_) => Value::String(text),
            }
        }

        DynSolValue::FixedBytes(word, size) => hex_value(&word[..size.min(32)]),

        DynSolValue::Bytes(b) => hex_value(&b),

        DynSolValue::String(s) => Value::String(s),

        DynSolValue::Address(a) => Value::String(format!("{a:#x}")),

        DynSolValue::Array(vals) | DynSolValue::FixedArray(vals) | DynSolValue::Tuple(vals) => {
            Value::Array(vals.into_iter().map(normalize).collect())
        }

        DynSolValue::Function(f) => hex_value(f.as_slice()),

        #[allow(unreachable_patterns)]
        _ => Value::Null,
    }
}

fn hex_value(bytes: &[u8]) -> Value {
    Value::String(format!("0x{}", hex::encode(bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, U256};
    use bountyindex_core::types::SourceKind;

    const BOUNTY: &str = "0x3B3B3B3B3B3B3B3B3B3B3B3B3B3B3B3B3B3B3B3B";

    fn source() -> EventSource {
        EventSource::new(SourceKind::Bounty, BOUNTY)
    }

    fn decoder() -> LogDecoder {
        let mut decoder = LogDecoder::new();
        decoder.register(source(), SourceAbi::new(SourceKind::Bounty).unwrap());
        decoder
    }

    fn word(n: u64) -> String {
        format!("{:#x}", B256::from(U256::from(n).to_be_bytes::<32>()))
    }

    fn selector(sig: &str) -> String {
        format!("{:#x}", alloy_primitives::keccak256(sig))
    }

    fn raw(topics: Vec<String>, data: Vec<u8>) -> RawLog {
        RawLog {
            address: BOUNTY.to_lowercase(),
            topics,
            data: format!("0x{}", hex::encode(data)),
            block_number: "0x64".into(),
            block_hash: None,
            tx_hash: Some("0xabc".into()),
            log_index: "0x2".into(),
            removed: None,
        }
    }

    #[test]
    fn decodes_indexed_and_body_arguments() {
        let data = DynSolValue::Tuple(vec![
            DynSolValue::Uint(U256::from(500u64), 256),
            DynSolValue::Address(Address::repeat_byte(0x11)),
            DynSolValue::Uint(U256::from(1_800_000_000u64), 256),
            DynSolValue::String("ipfs://bounty/7".into()),
        ])
        .abi_encode_params();
        let log = raw(
            vec![
                selector("BountyCreated(uint256,uint256,uint256,address,uint256,string)"),
                word(7),
                word(1),
            ],
            data,
        );

        let event = decoder().decode(&source(), &log, 100, 2, 1_700_000_000).unwrap().unwrap();
        assert_eq!(event.event_name, "BountyCreated");
        assert_eq!(event.contract, BOUNTY.to_lowercase());
        assert_eq!(event.key().to_string(), "100:2");
        assert_eq!(event.args["bountyId"], 7);
        assert_eq!(event.args["creatorId"], 1);
        assert_eq!(event.args["reward"], 500);
        assert_eq!(event.args["token"], format!("0x{}", "11".repeat(20)));
        assert_eq!(event.args["metadataURI"], "ipfs://bounty/7");
        assert_eq!(event.tx_hash, "0xabc");
    }

    #[test]
    fn unknown_selector_is_ignored() {
        let log = raw(vec![selector("BountyTipped(uint256)"), word(1)], vec![]);
        assert!(decoder().decode(&source(), &log, 1, 0, 0).unwrap().is_none());
    }

    #[test]
    fn truncated_data_is_an_abi_error() {
        let log = raw(
            vec![selector("BountyPaid(uint256,uint256,uint256)"), word(1), word(2)],
            vec![0u8; 7],
        );
        let err = decoder().decode(&source(), &log, 1, 0, 0).unwrap_err();
        assert!(matches!(err, DecodeError::Abi { .. }));
    }

    #[test]
    fn unregistered_source_is_an_error() {
        let other = EventSource::new(SourceKind::Identity, "0x1d");
        let log = raw(vec![], vec![]);
        assert!(decoder().decode(&other, &log, 1, 0, 0).is_err());
    }

    #[test]
    fn large_uints_become_decimal_strings() {
        let big = U256::from(u64::MAX) + U256::from(1u64);
        assert_eq!(normalize(DynSolValue::Uint(big, 256)), "18446744073709551616");
        assert_eq!(normalize(DynSolValue::Uint(U256::from(42u64), 256)), 42);
    }

    #[test]
    fn bytes_normalize_to_hex() {
        assert_eq!(normalize(DynSolValue::Bytes(b"Ada".to_vec())), "0x416461");
        assert_eq!(normalize(DynSolValue::Bool(true)), true);
    }
}
