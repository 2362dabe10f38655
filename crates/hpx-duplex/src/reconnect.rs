//! Reconnect supervisor.
//!
//! Spawned by teardown after an abnormal close when auto-reconnect is on. Dials
//! the last URL immediately, then again after every `reconnect_delay`, until a
//! dial succeeds or the user closes the connection.

use tracing::{info, warn};

use crate::{connection::Connection, error::DuplexError};

pub(crate) fn spawn_supervisor(conn: Connection, url: String) {
    tokio::spawn(run(conn, url));
}

async fn run(conn: Connection, url: String) {
    let delay = conn.config().reconnect_delay;
    let mut attempt: u64 = 0;
    loop {
        if conn.is_halted() {
            info!(url = %url, "Reconnect abandoned, connection closed by user");
            return;
        }
        attempt += 1;
        match conn.dial_session(url.clone()).await {
            Ok(()) => {
                info!(url = %url, attempt, "Reconnected");
                return;
            }
            Err(DuplexError::AlreadyConnected | DuplexError::ConnectionClosed) => return,
            Err(e) => warn!(url = %url, attempt, error = %e, "Reconnect attempt failed"),
        }
        tokio::time::sleep(delay).await;
    }
}
