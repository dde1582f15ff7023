//! Session TTL sweeper
//!
//! Backends without native document expiry keep expired rows until this loop
//! deletes them. Reads already hide expired sessions, so the interval only
//! bounds how long dead rows occupy storage.

use std::sync::Arc;
use std::time::Duration;

use chowbot_core::SessionStore;
use tokio::sync::broadcast;

/// Purge expired sessions every `interval` until shutdown fires.
pub async fn run_session_sweeper(
    sessions: Arc<dyn SessionStore>,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    tracing::info!("Session sweeper started (interval: {}s)", interval.as_secs());

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match sessions.purge_expired().await {
                    Ok(0) => tracing::debug!("Session sweep: nothing expired"),
                    Ok(purged) => tracing::info!("Session sweep purged {} expired sessions", purged),
                    Err(e) => tracing::warn!("Session sweep failed: {}", e),
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("Session sweeper shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chowbot_core::models::Session;
    use chowbot_core::store::MemoryStore;
    use chowbot_core::Step;

    #[tokio::test]
    async fn test_sweeper_purges_and_stops_on_shutdown() {
        let store = Arc::new(MemoryStore::new(Duration::from_secs(60)));
        let mut stale = Session::new("stale-user", Step::AwaitChoice, None);
        stale.updated_at = chrono::Utc::now() - chrono::Duration::minutes(5);
        store.put_session(stale).await;
        store.create("fresh-user", Step::AwaitChoice, None).await.unwrap();

        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(run_session_sweeper(
            store.clone(),
            Duration::from_millis(10),
            rx,
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper should stop")
            .unwrap();

        assert_eq!(store.purge_expired().await.unwrap(), 0);
        assert!(store.get("fresh-user").await.unwrap().is_some());
    }
}
