//! Progress streams for multi-item stages
//!
//! A stage runs on its own tokio task and pushes events into an unbounded
//! channel. The consumer reads them as a `Stream` that ends after the
//! `done` event. Dropping the stream does not stop the stage.

use super::PipelineResult;
use crate::domain::Language;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::debug;

/// Status carried by every progress event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    Processing,
    Generating,
    Translating,
    Complete,
    /// The item failed; `error` says why.
    Failed,
    /// Last event of every stream.
    Done,
}

/// One progress event. Unset fields are omitted from the JSON form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub status: ProgressStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paper_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<Language>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProgressEvent {
    fn bare(status: ProgressStatus) -> Self {
        Self {
            status,
            chapter: None,
            section: None,
            paper_id: None,
            lang: None,
            error: None,
        }
    }

    /// Event about a chapter, keyed by its printed label.
    pub fn chapter(status: ProgressStatus, label: impl Into<String>) -> Self {
        Self {
            chapter: Some(label.into()),
            ..Self::bare(status)
        }
    }

    /// Event about a paper section, keyed by step or section name.
    pub fn section(status: ProgressStatus, name: impl Into<String>) -> Self {
        Self {
            section: Some(name.into()),
            ..Self::bare(status)
        }
    }

    /// The end-of-stream sentinel. Carries no identifying field.
    pub fn done() -> Self {
        Self::bare(ProgressStatus::Done)
    }

    pub fn with_paper(mut self, paper_id: i64) -> Self {
        self.paper_id = Some(paper_id);
        self
    }

    pub fn with_lang(mut self, lang: Language) -> Self {
        self.lang = Some(lang);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn is_done(&self) -> bool {
        self.status == ProgressStatus::Done
    }

    /// Server-sent-event frame: `data: <json>\n\n`.
    pub fn to_sse_frame(&self) -> Result<String, serde_json::Error> {
        Ok(format!("data: {}\n\n", serde_json::to_string(self)?))
    }
}

/// Ordered progress events of one stage run.
pub type ProgressStream = Pin<Box<dyn Stream<Item = ProgressEvent> + Send>>;

/// Producer half handed to a running stage.
#[derive(Debug, Clone)]
pub struct ProgressSender {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ProgressSender {
    /// Send an event. A disconnected consumer is not an error; the stage
    /// keeps running.
    pub fn emit(&self, event: ProgressEvent) {
        if self.tx.send(event).is_err() {
            debug!("progress consumer disconnected");
        }
    }
}

/// Run `stage` on a new task and return its events as a stream.
///
/// The `done` event is sent after `stage` returns. Outside a tokio runtime
/// this fails with [`PipelineError::NoRuntime`](super::PipelineError::NoRuntime)
/// and `stage` is never called.
pub fn spawn_stage<F, Fut>(stage: F) -> PipelineResult<ProgressStream>
where
    F: FnOnce(ProgressSender) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let runtime = Handle::try_current()?;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let sender = ProgressSender { tx };
    let run = stage(sender.clone());

    runtime.spawn(async move {
        run.await;
        sender.emit(ProgressEvent::done());
    });

    Ok(Box::pin(async_stream::stream! {
        while let Some(event) = rx.recv().await {
            let done = event.is_done();
            yield event;
            if done {
                break;
            }
        }
    }))
}
