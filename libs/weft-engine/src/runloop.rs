//! Per-owner runloop.
//!
//! Every owner (app, engine, extension group, extension) binds its state to
//! one runloop; all mutation of that state happens on the runloop's task.
//! Cross-owner interaction is message passing: callers post a closure to
//! the mailbox, and synchronous results travel back over a oneshot reply.
//! Once the owner starts closing, posting fails with `Closed` and every
//! task still queued is dropped, which resolves its reply channel as
//! closed for the waiting caller.

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use weft_api::error::Error;

type Task<S> = Box<dyn FnOnce(&mut S) + Send>;

pub struct Runloop<S> {
    tx: mpsc::UnboundedSender<Task<S>>,
    token: CancellationToken,
}

impl<S> Clone for Runloop<S> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone(), token: self.token.clone() }
    }
}

impl<S: Send + 'static> Runloop<S> {
    /// Spawn the owner task; `state` lives on it until close.
    pub fn spawn(name: impl Into<String>, mut state: S) -> Runloop<S> {
        let name = name.into();
        let (tx, mut rx) = mpsc::unbounded_channel::<Task<S>>();
        let token = CancellationToken::new();

        let loop_token = token.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    task = rx.recv() => match task {
                        Some(task) => task(&mut state),
                        None => break,
                    },
                    _ = loop_token.cancelled() => break,
                }
            }
            // Drain without running: queued reply channels resolve as
            // closed, so blocked callers observe `Closed`.
            rx.close();
            while rx.try_recv().is_ok() {}
            tracing::debug!(owner = %name, "runloop stopped");
        });

        Runloop { tx, token }
    }

    /// Enqueue a task for the owner thread. Fire-and-forget.
    pub fn post(&self, task: impl FnOnce(&mut S) + Send + 'static) -> Result<(), Error> {
        if self.token.is_cancelled() {
            return Err(Error::closed("owner is closing"));
        }
        self.tx
            .send(Box::new(task))
            .map_err(|_| Error::closed("owner is closing"))
    }

    /// Run `f` on the owner thread and await its result.
    pub async fn call<R, F>(&self, f: F) -> Result<R, Error>
    where
        R: Send + 'static,
        F: FnOnce(&mut S) -> R + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.post(move |state| {
            let _ = reply_tx.send(f(state));
        })?;
        reply_rx
            .await
            .map_err(|_| Error::closed("owner is closing"))
    }

    pub fn close(&self) {
        self.token.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn close_token(&self) -> CancellationToken {
        self.token.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_api::error::ErrorCode;

    #[tokio::test]
    async fn tasks_run_in_post_order_on_owner_state() {
        let runloop = Runloop::spawn("t", Vec::<u32>::new());
        for i in 0..10 {
            runloop.post(move |v| v.push(i)).unwrap();
        }
        let seen = runloop.call(|v| v.clone()).await.unwrap();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn closed_runloop_rejects_operations() {
        let runloop = Runloop::spawn("t", 0u32);
        runloop.close();
        let err = runloop.call(|v| *v).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Closed);
        assert!(runloop.post(|_| {}).is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn queued_tasks_are_dropped_on_close() {
        let runloop = Runloop::spawn("t", 0u32);
        // Block the loop so the next call stays queued, then close.
        let (gate_tx, gate_rx) = std::sync::mpsc::channel::<()>();
        runloop
            .post(move |_| {
                let _ = gate_rx.recv();
            })
            .unwrap();

        let pending = {
            let runloop = runloop.clone();
            tokio::spawn(async move { runloop.call(|v| *v).await })
        };

        runloop.close();
        gate_tx.send(()).unwrap();

        let err = pending.await.unwrap().unwrap_err();
        assert_eq!(err.code(), ErrorCode::Closed);
    }
}
