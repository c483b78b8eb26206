//! Protocol messages.
//!
//! Every frame body is a `ProtoMessage` envelope carrying a numeric payload
//! type and the serialized payload. Only the payloads the recorder sends or
//! consumes are modelled; unknown types decode to `InboundMessage::Unhandled`.

use bytes::Bytes;
use prost::Message;
use tickrec_core::{AccountId, RecorderEvent, Symbol, SymbolId};

use crate::error::WireResult;

/// Numeric payload type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum PayloadType {
    ErrorRes = 50,
    HeartbeatEvent = 51,
    PingReq = 52,
    PingRes = 53,
    ApplicationAuthReq = 2100,
    ApplicationAuthRes = 2101,
    AccountAuthReq = 2102,
    AccountAuthRes = 2103,
    SymbolsListReq = 2114,
    SymbolsListRes = 2115,
    SubscribeSpotsReq = 2127,
    SubscribeSpotsRes = 2128,
    SpotEvent = 2131,
    OaErrorRes = 2142,
    ClientDisconnectEvent = 2148,
    GetAccountsByAccessTokenReq = 2149,
    GetAccountsByAccessTokenRes = 2150,
}

impl PayloadType {
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    pub fn from_u32(value: u32) -> Option<Self> {
        let payload_type = match value {
            50 => Self::ErrorRes,
            51 => Self::HeartbeatEvent,
            52 => Self::PingReq,
            53 => Self::PingRes,
            2100 => Self::ApplicationAuthReq,
            2101 => Self::ApplicationAuthRes,
            2102 => Self::AccountAuthReq,
            2103 => Self::AccountAuthRes,
            2114 => Self::SymbolsListReq,
            2115 => Self::SymbolsListRes,
            2127 => Self::SubscribeSpotsReq,
            2128 => Self::SubscribeSpotsRes,
            2131 => Self::SpotEvent,
            2142 => Self::OaErrorRes,
            2148 => Self::ClientDisconnectEvent,
            2149 => Self::GetAccountsByAccessTokenReq,
            2150 => Self::GetAccountsByAccessTokenRes,
            _ => return None,
        };
        Some(payload_type)
    }
}

// ============================================================================
// Envelope and payloads
// ============================================================================

#[derive(Clone, PartialEq, Message)]
pub struct ProtoMessage {
    #[prost(uint32, required, tag = "1")]
    pub payload_type: u32,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub payload: Option<Vec<u8>>,
    #[prost(string, optional, tag = "3")]
    pub client_msg_id: Option<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ProtoErrorRes {
    #[prost(int32, optional, tag = "1")]
    pub payload_type: Option<i32>,
    #[prost(string, required, tag = "2")]
    pub error_code: String,
    #[prost(string, optional, tag = "3")]
    pub description: Option<String>,
    #[prost(uint64, optional, tag = "4")]
    pub maintenance_end_timestamp: Option<u64>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ProtoHeartbeatEvent {
    #[prost(int32, optional, tag = "1")]
    pub payload_type: Option<i32>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ProtoPing {
    #[prost(int32, optional, tag = "1")]
    pub payload_type: Option<i32>,
    #[prost(uint64, required, tag = "2")]
    pub timestamp: u64,
}

#[derive(Clone, PartialEq, Message)]
pub struct ApplicationAuthReq {
    #[prost(int32, optional, tag = "1")]
    pub payload_type: Option<i32>,
    #[prost(string, required, tag = "2")]
    pub client_id: String,
    #[prost(string, required, tag = "3")]
    pub client_secret: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct ApplicationAuthRes {
    #[prost(int32, optional, tag = "1")]
    pub payload_type: Option<i32>,
}

#[derive(Clone, PartialEq, Message)]
pub struct GetAccountListByAccessTokenReq {
    #[prost(int32, optional, tag = "1")]
    pub payload_type: Option<i32>,
    #[prost(string, required, tag = "2")]
    pub access_token: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct CtidTraderAccount {
    #[prost(uint64, required, tag = "1")]
    pub ctid_trader_account_id: u64,
    #[prost(bool, optional, tag = "2")]
    pub is_live: Option<bool>,
    #[prost(int64, optional, tag = "3")]
    pub trader_login: Option<i64>,
}

#[derive(Clone, PartialEq, Message)]
pub struct GetAccountListByAccessTokenRes {
    #[prost(int32, optional, tag = "1")]
    pub payload_type: Option<i32>,
    #[prost(string, required, tag = "2")]
    pub access_token: String,
    #[prost(int32, optional, tag = "3")]
    pub permission_scope: Option<i32>,
    #[prost(message, repeated, tag = "4")]
    pub ctid_trader_account: Vec<CtidTraderAccount>,
}

#[derive(Clone, PartialEq, Message)]
pub struct AccountAuthReq {
    #[prost(int32, optional, tag = "1")]
    pub payload_type: Option<i32>,
    #[prost(int64, required, tag = "2")]
    pub ctid_trader_account_id: i64,
    #[prost(string, required, tag = "3")]
    pub access_token: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct AccountAuthRes {
    #[prost(int32, optional, tag = "1")]
    pub payload_type: Option<i32>,
    #[prost(int64, required, tag = "2")]
    pub ctid_trader_account_id: i64,
}

#[derive(Clone, PartialEq, Message)]
pub struct SymbolsListReq {
    #[prost(int32, optional, tag = "1")]
    pub payload_type: Option<i32>,
    #[prost(int64, required, tag = "2")]
    pub ctid_trader_account_id: i64,
    #[prost(bool, optional, tag = "3")]
    pub include_archived_symbols: Option<bool>,
}

#[derive(Clone, PartialEq, Message)]
pub struct LightSymbol {
    #[prost(int64, required, tag = "1")]
    pub symbol_id: i64,
    #[prost(string, optional, tag = "2")]
    pub symbol_name: Option<String>,
    #[prost(bool, optional, tag = "3")]
    pub enabled: Option<bool>,
    #[prost(string, optional, tag = "7")]
    pub description: Option<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct SymbolsListRes {
    #[prost(int32, optional, tag = "1")]
    pub payload_type: Option<i32>,
    #[prost(int64, required, tag = "2")]
    pub ctid_trader_account_id: i64,
    #[prost(message, repeated, tag = "3")]
    pub symbol: Vec<LightSymbol>,
}

#[derive(Clone, PartialEq, Message)]
pub struct SubscribeSpotsReq {
    #[prost(int32, optional, tag = "1")]
    pub payload_type: Option<i32>,
    #[prost(int64, required, tag = "2")]
    pub ctid_trader_account_id: i64,
    #[prost(int64, repeated, packed = "false", tag = "3")]
    pub symbol_id: Vec<i64>,
}

#[derive(Clone, PartialEq, Message)]
pub struct SubscribeSpotsRes {
    #[prost(int32, optional, tag = "1")]
    pub payload_type: Option<i32>,
    #[prost(int64, required, tag = "2")]
    pub ctid_trader_account_id: i64,
}

#[derive(Clone, PartialEq, Message)]
pub struct SpotEvent {
    #[prost(int32, optional, tag = "1")]
    pub payload_type: Option<i32>,
    #[prost(int64, required, tag = "2")]
    pub ctid_trader_account_id: i64,
    #[prost(int64, required, tag = "3")]
    pub symbol_id: i64,
    #[prost(uint64, optional, tag = "4")]
    pub bid: Option<u64>,
    #[prost(uint64, optional, tag = "5")]
    pub ask: Option<u64>,
    #[prost(int64, optional, tag = "8")]
    pub timestamp: Option<i64>,
}

#[derive(Clone, PartialEq, Message)]
pub struct OaErrorRes {
    #[prost(int32, optional, tag = "1")]
    pub payload_type: Option<i32>,
    #[prost(int64, optional, tag = "2")]
    pub ctid_trader_account_id: Option<i64>,
    #[prost(string, required, tag = "3")]
    pub error_code: String,
    #[prost(string, optional, tag = "4")]
    pub description: Option<String>,
    #[prost(int64, optional, tag = "5")]
    pub maintenance_end_timestamp: Option<i64>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ClientDisconnectEvent {
    #[prost(int32, optional, tag = "1")]
    pub payload_type: Option<i32>,
    #[prost(string, optional, tag = "2")]
    pub reason: Option<String>,
}

/// Wrap a payload in an envelope and serialize it.
pub fn encode_envelope<M: Message>(payload_type: PayloadType, payload: &M) -> Bytes {
    let envelope = ProtoMessage {
        payload_type: payload_type.as_u32(),
        payload: Some(payload.encode_to_vec()),
        client_msg_id: None,
    };
    Bytes::from(envelope.encode_to_vec())
}

fn type_field(payload_type: PayloadType) -> Option<i32> {
    Some(payload_type.as_u32() as i32)
}

// ============================================================================
// Outbound requests
// ============================================================================

/// What an outbound frame is, for status reporting after transmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestKind {
    AppAuth,
    AccountList,
    AccountAuth { account_id: AccountId },
    SymbolsList { account_id: AccountId },
    SubscribeSpots { account_id: AccountId, symbol_id: SymbolId },
    Heartbeat,
}

impl RequestKind {
    pub fn payload_type(&self) -> PayloadType {
        match self {
            Self::AppAuth => PayloadType::ApplicationAuthReq,
            Self::AccountList => PayloadType::GetAccountsByAccessTokenReq,
            Self::AccountAuth { .. } => PayloadType::AccountAuthReq,
            Self::SymbolsList { .. } => PayloadType::SymbolsListReq,
            Self::SubscribeSpots { .. } => PayloadType::SubscribeSpotsReq,
            Self::Heartbeat => PayloadType::HeartbeatEvent,
        }
    }

    /// Status notification to raise once the request is on the wire.
    pub fn status_event(&self) -> Option<RecorderEvent> {
        let event = match self {
            Self::AppAuth => RecorderEvent::Message("Authorising app.".to_string()),
            Self::AccountList => RecorderEvent::Message("Retrieving account id.".to_string()),
            Self::AccountAuth { account_id } => {
                RecorderEvent::Message(format!("Authorising account {account_id}."))
            }
            Self::SymbolsList { account_id } => RecorderEvent::Message(format!(
                "Retrieving symbol list for account {account_id}."
            )),
            Self::SubscribeSpots {
                account_id,
                symbol_id,
            } => RecorderEvent::SpotsRequested {
                account_id: *account_id,
                symbol_id: *symbol_id,
            },
            Self::Heartbeat => return None,
        };
        Some(event)
    }
}

/// A serialized request waiting for the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundRequest {
    kind: RequestKind,
    payload: Bytes,
}

impl OutboundRequest {
    pub fn app_auth(client_id: &str, client_secret: &str) -> Self {
        let message = ApplicationAuthReq {
            payload_type: type_field(PayloadType::ApplicationAuthReq),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
        };
        Self::build(RequestKind::AppAuth, &message)
    }

    pub fn account_list(access_token: &str) -> Self {
        let message = GetAccountListByAccessTokenReq {
            payload_type: type_field(PayloadType::GetAccountsByAccessTokenReq),
            access_token: access_token.to_string(),
        };
        Self::build(RequestKind::AccountList, &message)
    }

    pub fn account_auth(access_token: &str, account_id: AccountId) -> Self {
        let message = AccountAuthReq {
            payload_type: type_field(PayloadType::AccountAuthReq),
            ctid_trader_account_id: account_id.value(),
            access_token: access_token.to_string(),
        };
        Self::build(RequestKind::AccountAuth { account_id }, &message)
    }

    pub fn symbols_list(account_id: AccountId) -> Self {
        let message = SymbolsListReq {
            payload_type: type_field(PayloadType::SymbolsListReq),
            ctid_trader_account_id: account_id.value(),
            include_archived_symbols: Some(false),
        };
        Self::build(RequestKind::SymbolsList { account_id }, &message)
    }

    /// One subscription per symbol; the server rejects large multi-symbol requests.
    pub fn subscribe_spots(account_id: AccountId, symbol_id: SymbolId) -> Self {
        let message = SubscribeSpotsReq {
            payload_type: type_field(PayloadType::SubscribeSpotsReq),
            ctid_trader_account_id: account_id.value(),
            symbol_id: vec![symbol_id.value()],
        };
        Self::build(
            RequestKind::SubscribeSpots {
                account_id,
                symbol_id,
            },
            &message,
        )
    }

    pub fn heartbeat() -> Self {
        let message = ProtoHeartbeatEvent {
            payload_type: type_field(PayloadType::HeartbeatEvent),
        };
        Self::build(RequestKind::Heartbeat, &message)
    }

    fn build<M: Message>(kind: RequestKind, message: &M) -> Self {
        let payload = encode_envelope(kind.payload_type(), message);
        Self { kind, payload }
    }

    pub fn kind(&self) -> &RequestKind {
        &self.kind
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }
}

// ============================================================================
// Inbound messages
// ============================================================================

/// Price update for one symbol. Either side may be absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpotUpdate {
    pub account_id: AccountId,
    pub symbol_id: SymbolId,
    pub bid: Option<u64>,
    pub ask: Option<u64>,
}

/// Decoded server message.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    AppAuthorized,
    AccountList {
        access_token: String,
        account_ids: Vec<AccountId>,
    },
    AccountAuthorized {
        account_id: AccountId,
    },
    SymbolsList {
        account_id: AccountId,
        symbols: Vec<Symbol>,
    },
    SpotsSubscribed {
        account_id: AccountId,
    },
    Spot(SpotUpdate),
    /// Business-level error from the trading API.
    VendorError {
        account_id: Option<AccountId>,
        code: String,
        description: Option<String>,
    },
    /// Protocol-level error.
    CommonError {
        code: String,
        description: Option<String>,
    },
    ClientDisconnect {
        reason: Option<String>,
    },
    Heartbeat,
    PingReq {
        timestamp: u64,
    },
    PingRes {
        timestamp: u64,
    },
    Unhandled {
        payload_type: u32,
    },
}

/// Decode one frame body.
pub fn decode_inbound(frame: &[u8]) -> WireResult<InboundMessage> {
    let envelope = ProtoMessage::decode(frame)?;
    let payload = envelope.payload.as_deref().unwrap_or_default();

    let Some(payload_type) = PayloadType::from_u32(envelope.payload_type) else {
        return Ok(InboundMessage::Unhandled {
            payload_type: envelope.payload_type,
        });
    };

    let message = match payload_type {
        PayloadType::HeartbeatEvent => InboundMessage::Heartbeat,
        PayloadType::PingReq => InboundMessage::PingReq {
            timestamp: ProtoPing::decode(payload)?.timestamp,
        },
        PayloadType::PingRes => InboundMessage::PingRes {
            timestamp: ProtoPing::decode(payload)?.timestamp,
        },
        PayloadType::ErrorRes => {
            let res = ProtoErrorRes::decode(payload)?;
            InboundMessage::CommonError {
                code: res.error_code,
                description: res.description,
            }
        }
        PayloadType::ApplicationAuthRes => InboundMessage::AppAuthorized,
        PayloadType::GetAccountsByAccessTokenRes => {
            let res = GetAccountListByAccessTokenRes::decode(payload)?;
            let account_ids = res
                .ctid_trader_account
                .iter()
                .filter_map(|a| i64::try_from(a.ctid_trader_account_id).ok())
                .map(AccountId::new)
                .collect();
            InboundMessage::AccountList {
                access_token: res.access_token,
                account_ids,
            }
        }
        PayloadType::AccountAuthRes => InboundMessage::AccountAuthorized {
            account_id: AccountId::new(AccountAuthRes::decode(payload)?.ctid_trader_account_id),
        },
        PayloadType::SymbolsListRes => {
            let res = SymbolsListRes::decode(payload)?;
            let symbols = res
                .symbol
                .into_iter()
                .filter_map(|s| {
                    s.symbol_name
                        .filter(|name| Symbol::is_valid_name(name))
                        .map(|name| Symbol::new(SymbolId::new(s.symbol_id), name))
                })
                .collect();
            InboundMessage::SymbolsList {
                account_id: AccountId::new(res.ctid_trader_account_id),
                symbols,
            }
        }
        PayloadType::SubscribeSpotsRes => InboundMessage::SpotsSubscribed {
            account_id: AccountId::new(SubscribeSpotsRes::decode(payload)?.ctid_trader_account_id),
        },
        PayloadType::SpotEvent => {
            let event = SpotEvent::decode(payload)?;
            InboundMessage::Spot(SpotUpdate {
                account_id: AccountId::new(event.ctid_trader_account_id),
                symbol_id: SymbolId::new(event.symbol_id),
                bid: event.bid,
                ask: event.ask,
            })
        }
        PayloadType::OaErrorRes => {
            let res = OaErrorRes::decode(payload)?;
            InboundMessage::VendorError {
                account_id: res.ctid_trader_account_id.map(AccountId::new),
                code: res.error_code,
                description: res.description,
            }
        }
        PayloadType::ClientDisconnectEvent => InboundMessage::ClientDisconnect {
            reason: ClientDisconnectEvent::decode(payload)?.reason,
        },
        // Request types are never sent by the server.
        PayloadType::ApplicationAuthReq
        | PayloadType::GetAccountsByAccessTokenReq
        | PayloadType::AccountAuthReq
        | PayloadType::SymbolsListReq
        | PayloadType::SubscribeSpotsReq => InboundMessage::Unhandled {
            payload_type: envelope.payload_type,
        },
    };
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_auth_request_envelope() {
        let request = OutboundRequest::app_auth("id-1", "secret-1");
        assert_eq!(request.kind(), &RequestKind::AppAuth);

        let envelope = ProtoMessage::decode(request.payload().as_ref()).unwrap();
        assert_eq!(envelope.payload_type, 2100);
        let body = ApplicationAuthReq::decode(envelope.payload.unwrap().as_slice()).unwrap();
        assert_eq!(body.client_id, "id-1");
        assert_eq!(body.client_secret, "secret-1");
    }

    #[test]
    fn test_subscribe_request_carries_single_symbol() {
        let request = OutboundRequest::subscribe_spots(AccountId::new(555), SymbolId::new(1));
        let envelope = ProtoMessage::decode(request.payload().as_ref()).unwrap();
        assert_eq!(envelope.payload_type, 2127);
        let body = SubscribeSpotsReq::decode(envelope.payload.unwrap().as_slice()).unwrap();
        assert_eq!(body.ctid_trader_account_id, 555);
        assert_eq!(body.symbol_id, vec![1]);
    }

    #[test]
    fn test_status_events() {
        assert_eq!(
            RequestKind::AppAuth.status_event(),
            Some(RecorderEvent::Message("Authorising app.".to_string()))
        );
        assert_eq!(
            RequestKind::AccountAuth {
                account_id: AccountId::new(7)
            }
            .status_event(),
            Some(RecorderEvent::Message("Authorising account 7.".to_string()))
        );
        assert_eq!(
            RequestKind::SymbolsList {
                account_id: AccountId::new(7)
            }
            .status_event(),
            Some(RecorderEvent::Message(
                "Retrieving symbol list for account 7.".to_string()
            ))
        );
        assert!(RequestKind::Heartbeat.status_event().is_none());
    }

    #[test]
    fn test_decode_spot_event_with_bid_only() {
        let frame = encode_envelope(
            PayloadType::SpotEvent,
            &SpotEvent {
                payload_type: Some(2131),
                ctid_trader_account_id: 555,
                symbol_id: 1,
                bid: Some(123_450),
                ask: None,
                timestamp: None,
            },
        );

        let message = decode_inbound(&frame).unwrap();
        assert_eq!(
            message,
            InboundMessage::Spot(SpotUpdate {
                account_id: AccountId::new(555),
                symbol_id: SymbolId::new(1),
                bid: Some(123_450),
                ask: None,
            })
        );
    }

    #[test]
    fn test_decode_account_list() {
        let frame = encode_envelope(
            PayloadType::GetAccountsByAccessTokenRes,
            &GetAccountListByAccessTokenRes {
                payload_type: Some(2150),
                access_token: "tok".to_string(),
                permission_scope: None,
                ctid_trader_account: vec![
                    CtidTraderAccount {
                        ctid_trader_account_id: 555,
                        is_live: Some(false),
                        trader_login: None,
                    },
                    CtidTraderAccount {
                        ctid_trader_account_id: 777,
                        is_live: Some(true),
                        trader_login: None,
                    },
                ],
            },
        );

        match decode_inbound(&frame).unwrap() {
            InboundMessage::AccountList {
                access_token,
                account_ids,
            } => {
                assert_eq!(access_token, "tok");
                assert_eq!(account_ids, vec![AccountId::new(555), AccountId::new(777)]);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_decode_symbols_skips_unnamed_and_unusable() {
        let frame = encode_envelope(
            PayloadType::SymbolsListRes,
            &SymbolsListRes {
                payload_type: Some(2115),
                ctid_trader_account_id: 555,
                symbol: vec![
                    LightSymbol {
                        symbol_id: 1,
                        symbol_name: Some("EURUSD".to_string()),
                        enabled: Some(true),
                        description: None,
                    },
                    LightSymbol {
                        symbol_id: 2,
                        symbol_name: None,
                        enabled: Some(true),
                        description: None,
                    },
                    LightSymbol {
                        symbol_id: 3,
                        symbol_name: Some(String::new()),
                        enabled: Some(true),
                        description: None,
                    },
                    LightSymbol {
                        symbol_id: 4,
                        symbol_name: Some("../../etc".to_string()),
                        enabled: Some(true),
                        description: None,
                    },
                ],
            },
        );

        match decode_inbound(&frame).unwrap() {
            InboundMessage::SymbolsList {
                account_id,
                symbols,
            } => {
                assert_eq!(account_id, AccountId::new(555));
                assert_eq!(symbols.len(), 1);
                assert_eq!(symbols[0].name(), "EURUSD");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_decode_unknown_type_is_unhandled() {
        let envelope = ProtoMessage {
            payload_type: 2999,
            payload: None,
            client_msg_id: None,
        };
        let message = decode_inbound(&envelope.encode_to_vec()).unwrap();
        assert_eq!(message, InboundMessage::Unhandled { payload_type: 2999 });
    }

    #[test]
    fn test_decode_heartbeat() {
        let frame = OutboundRequest::heartbeat().payload().clone();
        let message = decode_inbound(&frame).unwrap();
        assert_eq!(message, InboundMessage::Heartbeat);
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(decode_inbound(&[0xff, 0xff, 0xff]).is_err());
    }
}
