//! Shutdown - 協調的キャンセルの信号
//!
//! `tokio::sync::watch` の bool を 1 本だけ使います。
//! - `ShutdownHandle::request()` で全体に停止を伝える
//! - `Shutdown` は clone して各ループに配る（`select!` で競合させる）

use std::time::Duration;

use tokio::sync::watch;

/// Create a connected handle / signal pair.
pub fn shutdown_channel() -> (ShutdownHandle, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownHandle { tx }, Shutdown { rx })
}

/// Sending side. Dropping it without `request()` means "never".
#[derive(Debug)]
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

impl ShutdownHandle {
    pub fn request(&self) {
        // receivers may already be dropped
        self.tx.send_replace(true);
    }

    pub fn subscribe(&self) -> Shutdown {
        Shutdown {
            rx: self.tx.subscribe(),
        }
    }
}

/// Receiving side of the shutdown signal.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_requested(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown is requested.
    pub async fn requested(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|&requested| requested).await.is_err() {
            // sender が落ちた = もう誰も停止を要求できない
            std::future::pending::<()>().await;
        }
    }

    /// Sleep for `duration`. Returns `true` if interrupted by shutdown.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.requested() => true,
            _ = tokio::time::sleep(duration) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn request_reaches_every_subscriber() {
        let (handle, shutdown) = shutdown_channel();
        let other = handle.subscribe();
        assert!(!shutdown.is_requested());

        handle.request();

        shutdown.requested().await;
        assert!(shutdown.is_requested());
        assert!(other.clone().is_requested());
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_is_interrupted() {
        let (handle, shutdown) = shutdown_channel();
        let sleeper = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { shutdown.sleep(Duration::from_secs(3600)).await }
        });
        tokio::task::yield_now().await;
        handle.request();
        assert!(sleeper.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn never_only_times_out() {
        let shutdown = Shutdown::never();
        assert!(!shutdown.sleep(Duration::from_millis(10)).await);
        assert!(!shutdown.is_requested());
    }
}
