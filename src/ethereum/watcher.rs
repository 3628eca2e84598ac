//! Live event delivery on top of a transport log subscription.
//!
//! `EventStream` is pulled by the consumer; `WatchHandle` owns a task that
//! pushes into a caller-supplied channel. Both release the transport
//! subscription exactly once, whichever way they end.

use anyhow::anyhow;
use futures::Stream;
use std::future::poll_fn;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, warn};

use super::filter::EventDecoder;
use super::provider::{RawSubscription, Unsubscribe};
use super::{EventRecord, RawLog};
use crate::error::{BindError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Open,
    /// The transport failed; logs already received are still handed out
    Draining,
    Closed,
}

/// Pull-style live subscription to one event.
#[derive(Debug)]
pub struct EventStream {
    decoder: EventDecoder,
    logs: mpsc::Receiver<RawLog>,
    errors: mpsc::Receiver<anyhow::Error>,
    unsubscribe: Unsubscribe,
    state: SubscriptionState,
    fail: Option<BindError>,
}

impl EventStream {
    pub fn new(decoder: EventDecoder, subscription: RawSubscription) -> Self {
        let RawSubscription {
            logs,
            errors,
            unsubscribe,
        } = subscription;
        Self {
            decoder,
            logs,
            errors,
            unsubscribe,
            state: SubscriptionState::Open,
            fail: None,
        }
    }

    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    /// The error that ended the subscription, if any.
    pub fn error(&self) -> Option<&BindError> {
        self.fail.as_ref()
    }

    /// Next decoded event, or `None` once the subscription has ended.
    #[allow(clippy::should_implement_trait)]
    pub async fn next(&mut self) -> Option<EventRecord> {
        poll_fn(|cx| self.poll_event(cx)).await
    }

    /// Like `next`, but reports why the subscription ended.
    pub async fn recv(&mut self) -> Result<EventRecord> {
        match self.next().await {
            Some(record) => Ok(record),
            None => Err(self.fail.clone().unwrap_or(BindError::SubscriptionClosed)),
        }
    }

    /// Stop delivery now. Buffered logs are discarded.
    pub fn close(&mut self) {
        if self.state != SubscriptionState::Closed {
            debug!("Closing '{}' subscription", self.decoder.event().name);
        }
        self.finish(None);
        self.logs.close();
    }

    fn finish(&mut self, fail: Option<BindError>) {
        if self.fail.is_none() {
            self.fail = fail;
        }
        self.state = SubscriptionState::Closed;
        self.unsubscribe.unsubscribe();
    }

    fn deliver(&mut self, log: RawLog) -> Poll<Option<EventRecord>> {
        match self.decoder.decode(&log) {
            Ok(record) => Poll::Ready(Some(record)),
            Err(e) => {
                warn!("Dropping '{}' subscription: {}", self.decoder.event().name, e);
                self.finish(Some(e));
                Poll::Ready(None)
            }
        }
    }

    fn poll_event(&mut self, cx: &mut Context<'_>) -> Poll<Option<EventRecord>> {
        loop {
            match self.state {
                SubscriptionState::Closed => return Poll::Ready(None),
                SubscriptionState::Draining => {
                    return match self.logs.try_recv() {
                        Ok(log) => self.deliver(log),
                        Err(TryRecvError::Empty | TryRecvError::Disconnected) => {
                            self.finish(None);
                            Poll::Ready(None)
                        }
                    };
                }
                SubscriptionState::Open => {
                    match self.logs.poll_recv(cx) {
                        Poll::Ready(Some(log)) => return self.deliver(log),
                        Poll::Ready(None) => {
                            // a transport may report an error and close right after
                            let fail = self.errors.try_recv().ok().map(|err| {
                                warn!(
                                    "'{}' subscription failed: {:#}",
                                    self.decoder.event().name,
                                    err
                                );
                                BindError::transport(err)
                            });
                            if fail.is_none() {
                                debug!("'{}' subscription ended", self.decoder.event().name);
                            }
                            self.finish(fail);
                            return Poll::Ready(None);
                        }
                        Poll::Pending => {}
                    }

                    match self.errors.poll_recv(cx) {
                        Poll::Ready(Some(err)) => {
                            warn!(
                                "'{}' subscription failed: {:#}",
                                self.decoder.event().name,
                                err
                            );
                            self.fail = Some(BindError::transport(err));
                            self.state = SubscriptionState::Draining;
                            self.unsubscribe.unsubscribe();
                        }
                        _ => return Poll::Pending,
                    }
                }
            }
        }
    }
}

impl Stream for EventStream {
    type Item = EventRecord;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().poll_event(cx)
    }
}

/// Push-style live subscription: a task forwarding decoded events into a
/// sink until cancelled or the subscription fails. Dropping the handle
/// cancels the task.
#[derive(Debug)]
pub struct WatchHandle {
    token: CancellationToken,
    task: JoinHandle<Result<()>>,
    _cancel_on_drop: DropGuard,
}

impl WatchHandle {
    pub fn spawn(
        decoder: EventDecoder,
        subscription: RawSubscription,
        sink: mpsc::Sender<EventRecord>,
    ) -> Self {
        let token = CancellationToken::new();
        let task = tokio::spawn(forward(decoder, subscription, sink, token.clone()));
        Self {
            _cancel_on_drop: token.clone().drop_guard(),
            token,
            task,
        }
    }

    /// Stop the watcher. Safe to call any number of times.
    pub fn unsubscribe(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the watcher to end. Cancellation and a clean end of the
    /// transport stream are both `Ok`.
    pub async fn wait(self) -> Result<()> {
        let Self {
            task,
            _cancel_on_drop,
            ..
        } = self;
        match task.await {
            Ok(result) => result,
            Err(e) => Err(BindError::transport(anyhow!("watcher task failed: {}", e))),
        }
    }
}

async fn forward(
    decoder: EventDecoder,
    subscription: RawSubscription,
    sink: mpsc::Sender<EventRecord>,
    token: CancellationToken,
) -> Result<()> {
    let RawSubscription {
        mut logs,
        mut errors,
        mut unsubscribe,
    } = subscription;
    let event = decoder.event().name.clone();
    debug!("Watching '{}' events", event);

    let result = loop {
        tokio::select! {
            biased;

            _ = token.cancelled() => break Ok(()),
            log = logs.recv() => {
                let Some(log) = log else {
                    if let Ok(err) = errors.try_recv() {
                        break Err(BindError::transport(err));
                    }
                    debug!("'{}' log stream ended", event);
                    break Ok(());
                };
                let record = match decoder.decode(&log) {
                    Ok(record) => record,
                    Err(e) => break Err(e),
                };
                tokio::select! {
                    biased;

                    _ = token.cancelled() => break Ok(()),
                    Some(err) = errors.recv() => break Err(BindError::transport(err)),
                    sent = sink.send(record) => {
                        if sent.is_err() {
                            debug!("'{}' sink dropped", event);
                            break Ok(());
                        }
                    }
                }
            }
            Some(err) = errors.recv() => break Err(BindError::transport(err)),
        }
    };

    unsubscribe.unsubscribe();
    match &result {
        Ok(()) => debug!("Stopped watching '{}' events", event),
        Err(e) => warn!("Watcher for '{}' events failed: {}", event, e),
    }
    result
}
