//! Per-session logging capability
//!
//! The crate never installs a global subscriber. Each session carries the
//! [`Dispatch`] it was given (or one built from `log_level`, or the caller's
//! default captured at construction) and runs all of its background tasks
//! under it, inside an `ami{host, port}` span.

use crate::config::AmiSettings;
use std::future::Future;
use tokio::task::JoinHandle;
use tracing::instrument::WithSubscriber;
use tracing::{Dispatch, Instrument, Level, Span};

#[derive(Clone)]
pub(crate) struct Logger {
    dispatch: Dispatch,
    span: Span,
}

impl Logger {
    pub(crate) fn new(settings: &AmiSettings, dispatch: Option<Dispatch>) -> Self {
        let dispatch = dispatch.unwrap_or_else(|| dispatch_for(settings));
        let span = tracing::dispatcher::with_default(&dispatch, || {
            tracing::info_span!("ami", host = %settings.host, port = settings.port)
        });
        Self { dispatch, span }
    }

    /// Spawn `future` under this session's dispatcher and span.
    pub(crate) fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        tokio::spawn(
            future
                .instrument(
                    self.span
                        .clone(),
                )
                .with_subscriber(
                    self.dispatch
                        .clone(),
                ),
        )
    }

    /// Wrap `future` so it logs through this session when awaited in the
    /// caller's task.
    pub(crate) fn scope<F: Future>(&self, future: F) -> impl Future<Output = F::Output> {
        future
            .instrument(
                self.span
                    .clone(),
            )
            .with_subscriber(
                self.dispatch
                    .clone(),
            )
    }

    /// Run a synchronous closure under this session's dispatcher and span.
    pub(crate) fn in_scope<R>(&self, f: impl FnOnce() -> R) -> R {
        tracing::dispatcher::with_default(&self.dispatch, || {
            self.span
                .in_scope(f)
        })
    }
}

fn dispatch_for(settings: &AmiSettings) -> Dispatch {
    let level = settings
        .log_level
        .as_deref()
        .and_then(|level| {
            level
                .parse::<Level>()
                .ok()
        });
    match level {
        Some(level) => Dispatch::new(
            tracing_subscriber::fmt()
                .with_max_level(level)
                .with_target(false)
                .finish(),
        ),
        None => tracing::dispatcher::get_default(Dispatch::clone),
    }
}
