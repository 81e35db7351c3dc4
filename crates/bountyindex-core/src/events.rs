//! Typed ledger events.
//!
//! A [`ChainEvent`] carries loosely-typed JSON arguments. Before anything
//! touches the projection it is resolved, by `(source kind, event name)`, to
//! an [`EventKind`] and decoded into a [`LedgerEvent`] with a typed payload.
//! Unknown pairs decode to [`LedgerEvent::Unknown`].
//!
//! Decoding is per field: a missing or malformed *identifier* makes the whole
//! event unusable (`Err`), while any other field that fails to decode is left
//! unset and reported in [`DecodedEvent::field_errors`].

use serde_json::{Map, Value};

use crate::error::DecodeError;
use crate::projection::{Amount, BountyStatus};
use crate::types::{ChainEvent, SourceKind};

// ─── Routing table ────────────────────────────────────────────────────────────

/// Every event kind the router knows how to project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    AgentRegistered,
    AgentMetadataSet,
    AgentWalletSet,
    ReputationUpdated,
    BountyCreated,
    BountyClaimed,
    WorkSubmitted,
    BountyApproved,
    BountyRejected,
    BountyDisputed,
    BountyCancelled,
    BountyExpired,
    BountyPaid,
    BountyCompleted,
}

/// `(source kind, event name) → kind`.
pub const ROUTES: &[(SourceKind, &str, EventKind)] = &[
    (SourceKind::Identity, "Registered", EventKind::AgentRegistered),
    (SourceKind::Identity, "MetadataSet", EventKind::AgentMetadataSet),
    (SourceKind::Identity, "AgentWalletSet", EventKind::AgentWalletSet),
    (SourceKind::Reputation, "ReputationUpdated", EventKind::ReputationUpdated),
    (SourceKind::Bounty, "BountyCreated", EventKind::BountyCreated),
    (SourceKind::Bounty, "BountyClaimed", EventKind::BountyClaimed),
    (SourceKind::Bounty, "WorkSubmitted", EventKind::WorkSubmitted),
    (SourceKind::Bounty, "BountyApproved", EventKind::BountyApproved),
    (SourceKind::Bounty, "BountyRejected", EventKind::BountyRejected),
    (SourceKind::Bounty, "BountyDisputed", EventKind::BountyDisputed),
    (SourceKind::Bounty, "BountyCancelled", EventKind::BountyCancelled),
    (SourceKind::Bounty, "BountyExpired", EventKind::BountyExpired),
    (SourceKind::Bounty, "BountyPaid", EventKind::BountyPaid),
    (SourceKind::Bounty, "BountyCompleted", EventKind::BountyCompleted),
];

impl EventKind {
    /// Resolve a `(source, event name)` pair. Names are matched exactly.
    pub fn resolve(source: SourceKind, event_name: &str) -> Option<EventKind> {
        ROUTES
            .iter()
            .find(|(s, name, _)| *s == source && *name == event_name)
            .map(|(_, _, kind)| *kind)
    }

    /// Event names known for a source kind.
    pub fn names_for(source: SourceKind) -> impl Iterator<Item = &'static str> {
        ROUTES
            .iter()
            .filter(move |(s, _, _)| *s == source)
            .map(|(_, name, _)| *name)
    }
}

// ─── Typed payloads ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum LedgerEvent {
    AgentRegistered {
        agent_id: u64,
        owner: Option<String>,
        token_uri: Option<String>,
    },
    AgentMetadataSet {
        agent_id: u64,
        key: Option<String>,
        value: Option<Vec<u8>>,
    },
    AgentWalletSet {
        agent_id: u64,
        wallet: Option<String>,
    },
    ReputationUpdated {
        agent_id: u64,
        score: Option<u64>,
    },
    BountyCreated {
        bounty_id: u64,
        creator_id: Option<u64>,
        reward: Option<Amount>,
        token: Option<String>,
        deadline: Option<i64>,
        metadata_uri: Option<String>,
    },
    BountyClaimed {
        bounty_id: u64,
        hunter_id: u64,
    },
    WorkSubmitted {
        bounty_id: u64,
        hunter_id: Option<u64>,
        submission: Option<String>,
    },
    BountyApproved {
        bounty_id: u64,
        rating: Option<u8>,
        feedback_uri: Option<String>,
    },
    /// Rejected, disputed, cancelled or expired: a status change with no
    /// monetary effect.
    BountyStatusChanged {
        bounty_id: u64,
        status: BountyStatus,
    },
    BountyPaid {
        bounty_id: u64,
        hunter_id: Option<u64>,
        amount: Option<Amount>,
    },
    BountyCompleted {
        bounty_id: Option<u64>,
        agent_id: u64,
        reward: Option<Amount>,
    },
    /// Not in the routing table; logged and ignored.
    Unknown {
        source: SourceKind,
        event_name: String,
    },
}

/// A typed event plus the optional fields that failed to decode.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedEvent {
    pub event: LedgerEvent,
    pub field_errors: Vec<DecodeError>,
}

impl LedgerEvent {
    /// Decode a raw chain event. `Err` means a required identifier is unusable.
    pub fn decode(raw: &ChainEvent) -> Result<DecodedEvent, DecodeError> {
        let mut args = Args::new(&raw.args);
        let kind = match EventKind::resolve(raw.source, &raw.event_name) {
            Some(kind) => kind,
            None => {
                return Ok(DecodedEvent {
                    event: LedgerEvent::Unknown {
                        source: raw.source,
                        event_name: raw.event_name.clone(),
                    },
                    field_errors: vec![],
                })
            }
        };

        let event = match kind {
            EventKind::AgentRegistered => LedgerEvent::AgentRegistered {
                agent_id: args.required_u64("agentId")?,
                owner: args.string("owner"),
                token_uri: args.string("tokenURI"),
            },
            EventKind::AgentMetadataSet => LedgerEvent::AgentMetadataSet {
                agent_id: args.required_u64("agentId")?,
                key: args.string("key"),
                value: args.bytes("value"),
            },
            EventKind::AgentWalletSet => LedgerEvent::AgentWalletSet {
                agent_id: args.required_u64("agentId")?,
                wallet: args.string("wallet"),
            },
            EventKind::ReputationUpdated => LedgerEvent::ReputationUpdated {
                agent_id: args.required_u64("agentId")?,
                score: args.u64("score"),
            },
            EventKind::BountyCreated => LedgerEvent::BountyCreated {
                bounty_id: args.required_u64("bountyId")?,
                creator_id: args.u64("creatorId"),
                reward: args.amount("reward"),
                token: args.string("token"),
                deadline: args.i64("deadline"),
                metadata_uri: args.string("metadataURI"),
            },
            EventKind::BountyClaimed => LedgerEvent::BountyClaimed {
                bounty_id: args.required_u64("bountyId")?,
                hunter_id: args.required_u64("hunterId")?,
            },
            EventKind::WorkSubmitted => LedgerEvent::WorkSubmitted {
                bounty_id: args.required_u64("bountyId")?,
                hunter_id: args.u64("hunterId"),
                submission: args.string("submissionURI"),
            },
            EventKind::BountyApproved => LedgerEvent::BountyApproved {
                bounty_id: args.required_u64("bountyId")?,
                rating: args.u8("rating"),
                feedback_uri: args.string("feedbackURI"),
            },
            EventKind::BountyRejected => status_change(&mut args, BountyStatus::Rejected)?,
            EventKind::BountyDisputed => status_change(&mut args, BountyStatus::Disputed)?,
            EventKind::BountyCancelled => status_change(&mut args, BountyStatus::Cancelled)?,
            EventKind::BountyExpired => status_change(&mut args, BountyStatus::Expired)?,
            EventKind::BountyPaid => LedgerEvent::BountyPaid {
                bounty_id: args.required_u64("bountyId")?,
                hunter_id: args.u64("hunterId"),
                amount: args.amount("amount"),
            },
            EventKind::BountyCompleted => LedgerEvent::BountyCompleted {
                bounty_id: args.u64("bountyId"),
                agent_id: args.required_u64("agentId")?,
                reward: args.amount("reward"),
            },
        };

        Ok(DecodedEvent {
            event,
            field_errors: args.into_errors(),
        })
    }
}

fn status_change(args: &mut Args<'_>, status: BountyStatus) -> Result<LedgerEvent, DecodeError> {
    Ok(LedgerEvent::BountyStatusChanged {
        bounty_id: args.required_u64("bountyId")?,
        status,
    })
}

// ─── Argument access ──────────────────────────────────────────────────────────

/// Field-by-field reader over an argument map that collects optional-field errors.
struct Args<'a> {
    map: &'a Map<String, Value>,
    errors: Vec<DecodeError>,
}

impl<'a> Args<'a> {
    fn new(map: &'a Map<String, Value>) -> Self {
        Self { map, errors: vec![] }
    }

    fn into_errors(self) -> Vec<DecodeError> {
        self.errors
    }

    fn required_u64(&mut self, field: &str) -> Result<u64, DecodeError> {
        match self.map.get(field) {
            None | Some(Value::Null) => Err(DecodeError::MissingField {
                field: field.to_string(),
            }),
            Some(v) => parse_u64(field, v),
        }
    }

    /// Optional field: absent → `None`, malformed → `None` + recorded error.
    fn optional<T>(
        &mut self,
        field: &str,
        parse: impl FnOnce(&str, &Value) -> Result<T, DecodeError>,
    ) -> Option<T> {
        match self.map.get(field) {
            None | Some(Value::Null) => None,
            Some(v) => match parse(field, v) {
                Ok(value) => Some(value),
                Err(e) => {
                    self.errors.push(e);
                    None
                }
            },
        }
    }

    fn u64(&mut self, field: &str) -> Option<u64> {
        self.optional(field, parse_u64)
    }

    fn i64(&mut self, field: &str) -> Option<i64> {
        self.optional(field, |f, v| {
            let n = parse_u64(f, v)?;
            i64::try_from(n).map_err(|_| DecodeError::invalid(f, format!("{n} exceeds i64")))
        })
    }

    fn u8(&mut self, field: &str) -> Option<u8> {
        self.optional(field, |f, v| {
            let n = parse_u64(f, v)?;
            u8::try_from(n).map_err(|_| DecodeError::invalid(f, format!("{n} exceeds u8")))
        })
    }

    fn amount(&mut self, field: &str) -> Option<Amount> {
        self.optional(field, parse_amount)
    }

    fn string(&mut self, field: &str) -> Option<String> {
        self.optional(field, |f, v| match v {
            Value::String(s) => Ok(s.clone()),
            other => Err(DecodeError::invalid(f, format!("expected string, got {other}"))),
        })
    }

    fn bytes(&mut self, field: &str) -> Option<Vec<u8>> {
        self.optional(field, parse_bytes)
    }
}

/// Parse a JSON number, decimal string or `0x` hex string into a `u64`.
pub fn parse_u64(field: &str, value: &Value) -> Result<u64, DecodeError> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| DecodeError::invalid(field, format!("{n} is not an unsigned integer"))),
        Value::String(s) => {
            let s = s.trim();
            let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                Some(hex) => u64::from_str_radix(hex, 16),
                None => s.parse::<u64>(),
            };
            parsed.map_err(|e| DecodeError::invalid(field, format!("'{s}': {e}")))
        }
        other => Err(DecodeError::invalid(field, format!("expected integer, got {other}"))),
    }
}

/// Parse a JSON number, decimal string or `0x` hex string into an [`Amount`].
///
/// Values wider than 128 bits are rejected.
pub fn parse_amount(field: &str, value: &Value) -> Result<Amount, DecodeError> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .map(Amount::from)
            .ok_or_else(|| DecodeError::invalid(field, format!("{n} is not an unsigned integer"))),
        Value::String(s) => {
            let s = s.trim();
            let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                Some(hex) => Amount::from_str_radix(hex, 16),
                None => s.parse::<Amount>(),
            };
            parsed.map_err(|e| DecodeError::invalid(field, format!("'{s}': {e}")))
        }
        other => Err(DecodeError::invalid(field, format!("expected integer, got {other}"))),
    }
}

/// Parse a `0x`-prefixed hex string into raw bytes.
pub fn parse_bytes(field: &str, value: &Value) -> Result<Vec<u8>, DecodeError> {
    match value {
        Value::String(s) => {
            let hex_str = s.strip_prefix("0x").unwrap_or(s);
            hex::decode(hex_str).map_err(|e| DecodeError::invalid(field, format!("bad hex: {e}")))
        }
        other => Err(DecodeError::invalid(field, format!("expected hex bytes, got {other}"))),
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(source: SourceKind, name: &str, args: Value) -> ChainEvent {
        ChainEvent {
            source,
            contract: "0xc0".into(),
            event_name: name.into(),
            args: args.as_object().cloned().unwrap_or_default(),
            block_number: 10,
            log_index: 0,
            block_timestamp: 1_700_000_000,
            tx_hash: "0xabc".into(),
        }
    }

    #[test]
    fn routes_are_scoped_by_source() {
        assert_eq!(
            EventKind::resolve(SourceKind::Bounty, "BountyPaid"),
            Some(EventKind::BountyPaid)
        );
        // Same name from the wrong contract kind is not routed.
        assert_eq!(EventKind::resolve(SourceKind::Identity, "BountyPaid"), None);
        assert_eq!(EventKind::names_for(SourceKind::Reputation).count(), 1);
    }

    #[test]
    fn decodes_numbers_from_all_encodings() {
        let d = LedgerEvent::decode(&raw(
            SourceKind::Bounty,
            "BountyCreated",
            json!({"bountyId": "0x2a", "creatorId": 1, "reward": "100", "deadline": 1_800_000_000u64}),
        ))
        .unwrap();
        assert!(d.field_errors.is_empty());
        match d.event {
            LedgerEvent::BountyCreated {
                bounty_id,
                creator_id,
                reward,
                deadline,
                token,
                ..
            } => {
                assert_eq!(bounty_id, 42);
                assert_eq!(creator_id, Some(1));
                assert_eq!(reward, Some(100));
                assert_eq!(deadline, Some(1_800_000_000));
                assert_eq!(token, None);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn missing_identifier_rejects_event() {
        let err = LedgerEvent::decode(&raw(
            SourceKind::Bounty,
            "BountyClaimed",
            json!({"bountyId": 3}),
        ))
        .unwrap_err();
        assert_eq!(
            err,
            DecodeError::MissingField {
                field: "hunterId".into()
            }
        );
    }

    #[test]
    fn malformed_optional_field_is_left_unset() {
        let d = LedgerEvent::decode(&raw(
            SourceKind::Bounty,
            "BountyPaid",
            json!({"bountyId": 3, "hunterId": 2, "amount": "twelve"}),
        ))
        .unwrap();
        assert_eq!(
            d.event,
            LedgerEvent::BountyPaid {
                bounty_id: 3,
                hunter_id: Some(2),
                amount: None
            }
        );
        assert_eq!(d.field_errors.len(), 1);
    }

    #[test]
    fn wei_amounts_decode_beyond_u64() {
        let d = LedgerEvent::decode(&raw(
            SourceKind::Bounty,
            "BountyPaid",
            json!({"bountyId": 3, "hunterId": 2, "amount": "100000000000000000000"}),
        ))
        .unwrap();
        assert!(d.field_errors.is_empty());
        assert_eq!(
            d.event,
            LedgerEvent::BountyPaid {
                bounty_id: 3,
                hunter_id: Some(2),
                amount: Some(100_000_000_000_000_000_000)
            }
        );

        // A uint256 beyond 128 bits cannot be stored.
        let too_wide = format!("0x1{}", "0".repeat(32));
        assert!(parse_amount("amount", &Value::String(too_wide)).is_err());
        assert_eq!(parse_amount("amount", &json!("0xff")).unwrap(), 255);
    }

    #[test]
    fn status_events_map_to_statuses() {
        let d = LedgerEvent::decode(&raw(
            SourceKind::Bounty,
            "BountyExpired",
            json!({"bountyId": 9}),
        ))
        .unwrap();
        assert_eq!(
            d.event,
            LedgerEvent::BountyStatusChanged {
                bounty_id: 9,
                status: BountyStatus::Expired
            }
        );
    }

    #[test]
    fn metadata_value_is_hex_bytes() {
        let d = LedgerEvent::decode(&raw(
            SourceKind::Identity,
            "MetadataSet",
            json!({"agentId": 1, "key": "name", "value": format!("0x{}", hex::encode("Ada"))}),
        ))
        .unwrap();
        assert_eq!(
            d.event,
            LedgerEvent::AgentMetadataSet {
                agent_id: 1,
                key: Some("name".into()),
                value: Some(b"Ada".to_vec())
            }
        );
    }

    #[test]
    fn unknown_event_is_explicit() {
        let d = LedgerEvent::decode(&raw(SourceKind::Reputation, "FeedbackRevoked", json!({}))).unwrap();
        assert!(matches!(d.event, LedgerEvent::Unknown { .. }));
    }
}
