//! Cancellation-aware send primitives for the bounded channels between
//! stages.
//!
//! Stages never touch a raw sender: they emit through an [`Outlet`], whose
//! send blocks until the value is accepted, the stream is cancelled, or the
//! receiver is gone. Sources use the [`SourceOutlet`] variant, which also
//! aborts a pending send the moment their complete signal triggers, so a
//! drained source does not hand over one more item it was already blocked on.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::complete::CompleteSignal;
use crate::item::Item;
use crate::StreamError;

/// Why a send did not go through. The value is dropped in every case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendAbort {
    /// The stream context was cancelled.
    Cancelled,
    /// The stage's complete signal was triggered (sources only).
    Completed,
    /// The downstream receiver is gone.
    Closed,
}

/// Downstream-facing handle held by a flow stage.
pub struct Outlet<T> {
    tx: mpsc::Sender<Item<T>>,
    token: CancellationToken,
}

impl<T> Clone for Outlet<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            token: self.token.clone(),
        }
    }
}

impl<T> Outlet<T> {
    pub(crate) fn new(tx: mpsc::Sender<Item<T>>, token: CancellationToken) -> Self {
        Self { tx, token }
    }

    /// Send one item, blocking until it is accepted or the stream dies.
    pub async fn send(&self, item: Item<T>) -> Result<(), SendAbort> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(SendAbort::Cancelled),
            res = self.tx.send(item) => res.map_err(|_| SendAbort::Closed),
        }
    }

    /// Send a value item.
    pub async fn value(&self, value: T) -> Result<(), SendAbort> {
        self.send(Item::Value(value)).await
    }

    /// Send an error item.
    pub async fn error(&self, err: StreamError) -> Result<(), SendAbort> {
        self.send(Item::Error(err)).await
    }

    /// Send every value in order, stopping at the first abort.
    pub async fn send_all<I>(&self, values: I) -> Result<(), SendAbort>
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send,
    {
        for value in values {
            self.value(value).await?;
        }
        Ok(())
    }
}

/// Downstream-facing handle held by a source task.
///
/// Same contract as [`Outlet`], plus sensitivity to the source's complete
/// signal: a pending send or [`idle`](Self::idle) wait aborts as soon as the
/// signal triggers.
pub struct SourceOutlet<T> {
    outlet: Outlet<T>,
    complete: CompleteSignal,
}

impl<T> SourceOutlet<T> {
    pub(crate) fn new(outlet: Outlet<T>, complete: CompleteSignal) -> Self {
        Self { outlet, complete }
    }

    pub async fn send(&self, item: Item<T>) -> Result<(), SendAbort> {
        tokio::select! {
            biased;
            _ = self.outlet.token.cancelled() => Err(SendAbort::Cancelled),
            _ = self.complete.triggered() => Err(SendAbort::Completed),
            res = self.outlet.tx.send(item) => res.map_err(|_| SendAbort::Closed),
        }
    }

    pub async fn value(&self, value: T) -> Result<(), SendAbort> {
        self.send(Item::Value(value)).await
    }

    pub async fn error(&self, err: StreamError) -> Result<(), SendAbort> {
        self.send(Item::Error(err)).await
    }

    pub async fn send_all<I>(&self, values: I) -> Result<(), SendAbort>
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send,
    {
        for value in values {
            self.value(value).await?;
        }
        Ok(())
    }

    /// Sleep between production steps, waking early on cancel or complete.
    pub async fn idle(&self, duration: Duration) -> Result<(), SendAbort> {
        tokio::select! {
            biased;
            _ = self.outlet.token.cancelled() => Err(SendAbort::Cancelled),
            _ = self.complete.triggered() => Err(SendAbort::Completed),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    /// Wait until production should end, whichever way it is requested.
    pub async fn stopped(&self) {
        tokio::select! {
            _ = self.outlet.token.cancelled() => {}
            _ = self.complete.triggered() => {}
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.outlet.token.is_cancelled() || self.complete.is_triggered()
    }
}
