//! Application-level keepalive.
//!
//! Each tick writes the keepalive payload (if any) as a text frame followed by an
//! empty protocol ping. With pong counting on, every tick bumps the connection's
//! unanswered counter and the caller decrements it through
//! [`Connection::pong_received`]. Once the counter exceeds the threshold plus
//! one, the session is failed with [`DuplexError::KeepaliveExhausted`].

use std::sync::Arc;

use bytes::Bytes;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, warn};

use crate::{
    connection::{Connection, Session},
    error::DuplexError,
    frame::Frame,
    task::guarded,
};

pub(crate) async fn run(conn: Connection, session: Arc<Session>) {
    let config = conn.config();
    let interval = config.ping_interval;
    let counting = config.counts_pongs();
    let limit = i64::from(config.unreceived_ping_threshold) + 1;

    let mut deadline = Instant::now() + interval;
    loop {
        tokio::select! {
            biased;
            _ = session.shutdown().cancelled() => break,
            _ = sleep_until(deadline) => {}
        }
        if session.is_closed() {
            break;
        }

        let payload = match &config.compose_ping {
            Some(compose) => guarded("compose_ping", || compose()).unwrap_or_default(),
            None => config.ping_message.clone(),
        };
        if !payload.is_empty() && conn.write(&session, Frame::text(payload)).await.is_err() {
            break;
        }
        if conn.write(&session, Frame::ping(Bytes::new())).await.is_err() {
            break;
        }

        let unanswered = if counting {
            conn.record_ping()
        } else {
            conn.pending_pings()
        };
        if unanswered > limit {
            warn!(unanswered, "Keepalive exhausted");
            conn.fail(&session, &DuplexError::keepalive_exhausted(unanswered))
                .await;
            break;
        }

        deadline = Instant::now() + interval;
    }
    debug!("Keepalive stopped");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc;

    use super::*;
    use crate::{
        config::ConnectionConfig,
        connection::ConnectionState,
        frame::OpCode,
        testing::{ScriptedConnector, eventually, recv_within},
    };

    fn pinging(threshold: u32) -> ConnectionConfig {
        ConnectionConfig::new()
            .ping_message("ping")
            .ping_interval(Duration::from_millis(10))
            .count_pongs(true)
            .unreceived_ping_threshold(threshold)
            .on_message(|_, _| {})
    }

    #[tokio::test]
    async fn exhausts_after_threshold_plus_two_pings() {
        let (err_tx, mut err_rx) = mpsc::unbounded_channel();
        let connector = ScriptedConnector::new();
        let mut peer = connector.push_peer();
        let conn = Connection::new(
            pinging(2).on_error(move |e| {
                let _ = err_tx.send(matches!(e, DuplexError::KeepaliveExhausted { .. }));
            }),
            Arc::clone(&connector),
        );
        conn.dial("ws://a").await.expect("dial");

        let mut pings = 0;
        let mut texts = 0;
        while let Some(frame) = peer.next_sent().await {
            match frame.opcode {
                OpCode::Ping => pings += 1,
                OpCode::Text => {
                    assert_eq!(frame.payload, "ping");
                    texts += 1;
                }
                OpCode::Close => break,
                other => panic!("unexpected frame {other:?}"),
            }
        }

        assert_eq!(pings, 4);
        assert_eq!(texts, 4);
        assert_eq!(recv_within(&mut err_rx).await, Some(true));
        eventually(|| conn.state() == ConnectionState::Closed).await;
    }

    #[tokio::test]
    async fn answered_pings_keep_session_alive() {
        let connector = ScriptedConnector::new();
        let mut peer = connector.push_peer();
        let conn = Connection::new(pinging(0), Arc::clone(&connector));
        conn.dial("ws://a").await.expect("dial");

        let mut pings = 0;
        while pings < 6 {
            let frame = peer.next_sent().await.expect("ping");
            if frame.opcode == OpCode::Ping {
                pings += 1;
                conn.pong_received();
            }
        }

        assert!(conn.is_connected());
        assert!(conn.pending_pings() <= 1);
        conn.close().await;
    }

    #[tokio::test]
    async fn pongs_are_not_counted_without_message_handler() {
        let connector = ScriptedConnector::new();
        let mut peer = connector.push_peer();
        let conn = Connection::new(
            ConnectionConfig::new()
                .ping_message("ping")
                .ping_interval(Duration::from_millis(5))
                .count_pongs(true),
            Arc::clone(&connector),
        );
        conn.dial("ws://a").await.expect("dial");

        let mut pings = 0;
        while pings < 5 {
            if peer.next_sent().await.expect("ping").opcode == OpCode::Ping {
                pings += 1;
            }
        }
        assert_eq!(conn.pending_pings(), 0);
        assert!(conn.is_connected());
        conn.close().await;
    }

    #[tokio::test]
    async fn composed_payload_overrides_fixed_one() {
        let connector = ScriptedConnector::new();
        let mut peer = connector.push_peer();
        let conn = Connection::new(
            ConnectionConfig::new()
                .ping_message("fixed")
                .compose_ping(|| Bytes::from_static(b"{\"op\":\"ping\"}"))
                .ping_interval(Duration::from_millis(5)),
            Arc::clone(&connector),
        );
        conn.dial("ws://a").await.expect("dial");

        assert_eq!(peer.next_sent().await, Some(Frame::text("{\"op\":\"ping\"}")));
        assert_eq!(peer.next_sent().await, Some(Frame::ping(Bytes::new())));
        conn.close().await;
    }

    #[tokio::test]
    async fn disabled_without_payload() {
        let connector = ScriptedConnector::new();
        let mut peer = connector.push_peer();
        let conn = Connection::new(
            ConnectionConfig::new().ping_interval(Duration::from_millis(5)),
            Arc::clone(&connector),
        );
        conn.dial("ws://a").await.expect("dial");

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(peer.try_next_sent().is_none());
        conn.close().await;
    }
}
