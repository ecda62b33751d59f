//! One-shot timers that post a message back into an actor's mailbox.
//!
//! The timer holds only a [`mpsc::WeakSender`], so a pending timer never keeps
//! the mailbox open. Dropping the handle cancels the timer.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Handle to a scheduled timer. Cancels on drop.
#[derive(Debug)]
pub struct TimerHandle {
    generation: u64,
    cancel_token: CancellationToken,
}

impl TimerHandle {
    /// Deliver `message` to `mailbox` after `delay` unless cancelled first.
    ///
    /// `parent` cancels the timer as well, so actor shutdown stops pending
    /// timers.
    pub fn schedule<M>(
        delay: Duration,
        generation: u64,
        mailbox: mpsc::WeakSender<M>,
        message: M,
        parent: &CancellationToken,
    ) -> Self
    where
        M: Send + 'static,
    {
        let cancel_token = parent.child_token();
        let token = cancel_token.clone();

        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = token.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    if let Some(sender) = mailbox.upgrade() {
                        let _ = sender.send(message).await;
                    }
                }
            }
        });

        Self {
            generation,
            cancel_token,
        }
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Cancel the timer. Safe to call any number of times.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}
