#![allow(dead_code)]

pub mod fake_media;

use std::sync::Arc;
use std::time::Duration;

use ogradio_proto::protocol::SessionSnapshot;
use tokio::sync::watch;

/// Wait until the published snapshot satisfies `pred`.
pub async fn wait_for<F>(rx: &mut watch::Receiver<Arc<SessionSnapshot>>, pred: F) -> Arc<SessionSnapshot>
where
    F: Fn(&SessionSnapshot) -> bool,
{
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let snapshot = rx.borrow_and_update().clone();
            if pred(&snapshot) {
                return snapshot;
            }
            rx.changed().await.expect("session core should still be running");
        }
    })
    .await
    .expect("timed out waiting for snapshot")
}
