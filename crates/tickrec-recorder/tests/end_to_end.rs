//! Full handshake against an in-memory server, ending in a tick on disk.

use futures_util::{SinkExt, StreamExt};
use prost::Message;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tickrec_core::{Account, AccountId, EventBus, Side};
use tickrec_persistence::{tick_file_path, MemoryAccountRegistry, WriterConfig};
use tickrec_recorder::{AccountArena, AccountPhase, ApiCredentials, ConnectionManager, SessionEnd};
use tickrec_wire::message::{
    AccountAuthRes, ApplicationAuthRes, CtidTraderAccount, GetAccountListByAccessTokenReq,
    GetAccountListByAccessTokenRes, LightSymbol, ProtoMessage, SpotEvent, SubscribeSpotsRes,
    SymbolsListRes,
};
use tickrec_wire::{encode_envelope, Connection, DispatchConfig, FrameCodec, PayloadType, MAX_FRAME_LEN};
use tokio::io::DuplexStream;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

const ACCOUNT: i64 = 555;

/// Answers each request the way the live API does for a single demo account.
async fn fake_server(stream: DuplexStream) {
    let mut framed = Framed::new(stream, FrameCodec::default());

    while let Some(Ok(frame)) = framed.next().await {
        let envelope = ProtoMessage::decode(frame.as_ref()).unwrap();
        let payload = envelope.payload.unwrap_or_default();

        let replies = match PayloadType::from_u32(envelope.payload_type) {
            Some(PayloadType::ApplicationAuthReq) => vec![encode_envelope(
                PayloadType::ApplicationAuthRes,
                &ApplicationAuthRes {
                    payload_type: Some(2101),
                },
            )],
            Some(PayloadType::GetAccountsByAccessTokenReq) => {
                let req = GetAccountListByAccessTokenReq::decode(payload.as_slice()).unwrap();
                vec![encode_envelope(
                    PayloadType::GetAccountsByAccessTokenRes,
                    &GetAccountListByAccessTokenRes {
                        payload_type: Some(2150),
                        access_token: req.access_token,
                        permission_scope: None,
                        ctid_trader_account: vec![CtidTraderAccount {
                            ctid_trader_account_id: ACCOUNT as u64,
                            is_live: Some(false),
                            trader_login: None,
                        }],
                    },
                )]
            }
            Some(PayloadType::AccountAuthReq) => vec![encode_envelope(
                PayloadType::AccountAuthRes,
                &AccountAuthRes {
                    payload_type: Some(2103),
                    ctid_trader_account_id: ACCOUNT,
                },
            )],
            Some(PayloadType::SymbolsListReq) => vec![encode_envelope(
                PayloadType::SymbolsListRes,
                &SymbolsListRes {
                    payload_type: Some(2115),
                    ctid_trader_account_id: ACCOUNT,
                    symbol: vec![LightSymbol {
                        symbol_id: 1,
                        symbol_name: Some("EURUSD".to_string()),
                        enabled: Some(true),
                        description: None,
                    }],
                },
            )],
            Some(PayloadType::SubscribeSpotsReq) => vec![
                encode_envelope(
                    PayloadType::SubscribeSpotsRes,
                    &SubscribeSpotsRes {
                        payload_type: Some(2128),
                        ctid_trader_account_id: ACCOUNT,
                    },
                ),
                encode_envelope(
                    PayloadType::SpotEvent,
                    &SpotEvent {
                        payload_type: Some(2131),
                        ctid_trader_account_id: ACCOUNT,
                        symbol_id: 1,
                        bid: Some(123_450),
                        ask: None,
                        timestamp: None,
                    },
                ),
            ],
            _ => vec![],
        };

        for reply in replies {
            if framed.send(reply).await.is_err() {
                return;
            }
        }
    }
}

#[tokio::test(start_paused = true)]
async fn handshake_ends_with_tick_on_disk() {
    let dir = TempDir::new().unwrap();
    let registry = Arc::new(MemoryAccountRegistry::new(vec![]));
    let events = EventBus::default();

    let mut manager = ConnectionManager::new(
        ApiCredentials {
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
        },
        WriterConfig::default(),
        AccountArena::new(vec![Account::new("tok", "refresh", dir.path())]).unwrap(),
        registry.clone(),
        events.clone(),
    );

    let (client, server) = tokio::io::duplex(256 * 1024);
    tokio::spawn(fake_server(server));
    let (reader, writer) = tokio::io::split(client);
    let (connection, mut inbound) =
        Connection::start(reader, writer, &DispatchConfig::default(), MAX_FRAME_LEN, events);
    manager.attach(connection);

    let stop = CancellationToken::new();
    let session_stop = stop.clone();
    let session = tokio::spawn(async move {
        let end = manager.run_session(&mut inbound, &session_stop).await;
        manager.close_session().await;
        (manager, end)
    });

    let today = chrono::Utc::now().format("%Y-%m-%d").to_string();
    let path = tick_file_path(dir.path(), "EURUSD", &today, Side::Bid);
    let mut contents = String::new();
    for _ in 0..120 {
        tokio::time::sleep(Duration::from_secs(1)).await;
        if let Ok(text) = std::fs::read_to_string(&path) {
            contents = text;
            break;
        }
    }

    stop.cancel();
    let (manager, end) = session.await.unwrap();
    assert_eq!(end, SessionEnd::Stopped);

    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 1, "unexpected file contents: {contents:?}");
    assert!(lines[0].ends_with(",123450"));
    assert_eq!(lines[0].len(), "HH:MM:SS.fff,123450".len());

    let slot = manager.accounts().get(0);
    assert_eq!(slot.account.account_id, AccountId::new(ACCOUNT));
    assert_eq!(slot.phase, AccountPhase::Streaming);
    assert_eq!(slot.account.symbols.len(), 1);

    let saves = registry.saves();
    assert_eq!(saves.len(), 2);
    assert_eq!(saves[0].account_id, AccountId::new(ACCOUNT));
    assert_eq!(saves[1].symbols.len(), 1);
}
