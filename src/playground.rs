//! Playground facade.
//!
//! [`Playground`] (constructed via [`PlaygroundBuilder`]) wires the pieces
//! together: the source buffer feeds the update scheduler, scheduled loads
//! are assembled and handed to the execution host, and everything the
//! host forwards off the isolation boundary lands in the log store.
//!
//! Two background tasks run per playground. The pump task drives the
//! scheduler (edits, run requests, debounce deadlines) and issues loads;
//! the relay task moves raw wire messages from the host into the log.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::assemble::{assemble, AssembleOptions, Theme};
use crate::clock::{Clock, SystemClock};
use crate::config::PlaygroundConfig;
use crate::error::{PersistError, PlaygroundError};
use crate::host::{ExecutionHost, SessionId};
use crate::project::{ProjectDraft, ProjectPatch, ProjectRecord, ProjectStore};
use crate::relay::{LogEntry, LogEvent, LogFilter, LogStore};
use crate::scheduler::{Scheduler, SchedulerAction};
use crate::source::{Fragment, SourceBuffer, SourceDocument};

enum PumpCommand {
    Run(SourceDocument),
    Flush,
    Shutdown,
}

/// Builder for configuring and starting a [`Playground`].
pub struct PlaygroundBuilder {
    config: PlaygroundConfig,
    initial: SourceDocument,
    clock: Arc<dyn Clock>,
    store: Option<Arc<dyn ProjectStore>>,
}

impl PlaygroundBuilder {
    pub fn config(mut self, config: PlaygroundConfig) -> Self {
        self.config = config;
        self
    }

    /// Document loaded into the buffer before the first edit.
    pub fn initial_document(mut self, doc: SourceDocument) -> Self {
        self.initial = doc;
        self
    }

    /// Time source for the debounce window. Defaults to the real clock.
    ///
    /// The pump sleeps on tokio's timer toward the deadlines this clock
    /// produces, so an injected clock must stay consistent with tokio
    /// time (e.g. a paused test runtime). `ManualClock` is for driving
    /// [`Scheduler`](crate::scheduler::Scheduler) directly in unit tests;
    /// advancing it here would not wake the pump.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Backend for save/open/fork. Without one the persistence calls fail
    /// with a backend error.
    pub fn project_store(mut self, store: Arc<dyn ProjectStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Spawn the host thread and background tasks and return the running
    /// playground. Must be called within a tokio runtime.
    pub fn start(self) -> Playground {
        let mut buffer = SourceBuffer::new(self.initial);
        let buffer_rx = buffer.subscribe();
        let buffer = Arc::new(Mutex::new(buffer));

        let log = Arc::new(LogStore::new());
        let preview = Arc::new(Mutex::new(String::new()));
        let (host, events) = ExecutionHost::spawn(self.config.host.clone());
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        let scheduler = Scheduler::new(self.config.run_policy.clone(), self.clock);
        tokio::spawn(pump(
            scheduler,
            buffer_rx,
            cmd_rx,
            host.clone(),
            Arc::clone(&log),
            Arc::clone(&preview),
            self.config.theme,
        ));
        tokio::spawn(relay(events, Arc::clone(&log)));

        Playground {
            buffer,
            log,
            preview,
            host,
            cmd_tx,
            store: self.store,
        }
    }
}

/// One live playground instance.
pub struct Playground {
    buffer: Arc<Mutex<SourceBuffer>>,
    log: Arc<LogStore>,
    preview: Arc<Mutex<String>>,
    host: ExecutionHost,
    cmd_tx: mpsc::UnboundedSender<PumpCommand>,
    store: Option<Arc<dyn ProjectStore>>,
}

impl Playground {
    pub fn builder() -> PlaygroundBuilder {
        PlaygroundBuilder {
            config: PlaygroundConfig::default(),
            initial: SourceDocument::default(),
            clock: Arc::new(SystemClock),
            store: None,
        }
    }

    /// Apply one edit. Returns the document snapshot after the edit; the
    /// scheduler decides when it actually loads.
    pub fn set_fragment(&self, fragment: Fragment, text: impl Into<String>) -> SourceDocument {
        self.buffer.lock().set_fragment(fragment, text)
    }

    /// Current buffer contents.
    pub fn document(&self) -> SourceDocument {
        self.buffer.lock().document()
    }

    /// Run the current document now, script included, bypassing any
    /// pending debounce window.
    pub fn request_run(&self) -> Result<(), PlaygroundError> {
        let doc = self.document();
        self.cmd_tx
            .send(PumpCommand::Run(doc))
            .map_err(|_| PlaygroundError::Closed)
    }

    /// Release a pending debounced load immediately. No-op when nothing
    /// is pending.
    pub fn flush_now(&self) -> Result<(), PlaygroundError> {
        self.cmd_tx
            .send(PumpCommand::Flush)
            .map_err(|_| PlaygroundError::Closed)
    }

    /// The most recently assembled preview document. Empty until the
    /// first load.
    pub fn preview_html(&self) -> String {
        self.preview.lock().clone()
    }

    pub fn log_entries(&self, filter: LogFilter) -> Vec<LogEntry> {
        self.log.list(filter)
    }

    pub fn clear_log(&self) {
        self.log.clear();
    }

    pub fn subscribe_log(&self) -> mpsc::UnboundedReceiver<LogEvent> {
        self.log.subscribe()
    }

    /// Shared handle to the log store, for drop counters and direct reads.
    pub fn log(&self) -> Arc<LogStore> {
        Arc::clone(&self.log)
    }

    /// Persist the current document as a new project.
    pub async fn save_project(&self, mut draft: ProjectDraft) -> Result<ProjectRecord, PlaygroundError> {
        draft.source = self.document();
        Ok(self.store()?.create(draft).await?)
    }

    /// Write the current document back into an existing project.
    pub async fn update_project(&self, id: Uuid) -> Result<ProjectRecord, PlaygroundError> {
        let patch = ProjectPatch {
            source: Some(self.document()),
            ..ProjectPatch::default()
        };
        Ok(self.store()?.update(id, patch).await?)
    }

    /// Open a stored project into the buffer. The change flows through the
    /// scheduler like any edit.
    pub async fn open_project(&self, id: Uuid) -> Result<ProjectRecord, PlaygroundError> {
        let record = self.store()?.get(id).await?;
        self.buffer.lock().replace(record.source.clone());
        Ok(record)
    }

    /// Fork a stored project and open the fork.
    pub async fn fork_project(
        &self,
        id: Uuid,
        new_owner: &str,
    ) -> Result<ProjectRecord, PlaygroundError> {
        let fork = self.store()?.fork(id, new_owner).await?;
        self.buffer.lock().replace(fork.source.clone());
        Ok(fork)
    }

    /// Stop the background tasks and the host thread. In-flight log
    /// entries already accepted remain readable.
    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(PumpCommand::Shutdown);
        self.host.shutdown();
    }

    fn store(&self) -> Result<&Arc<dyn ProjectStore>, PersistError> {
        self.store
            .as_ref()
            .ok_or_else(|| PersistError::Backend("no project store configured".into()))
    }
}

async fn pump(
    mut scheduler: Scheduler,
    mut buffer_rx: mpsc::UnboundedReceiver<SourceDocument>,
    mut cmd_rx: mpsc::UnboundedReceiver<PumpCommand>,
    host: ExecutionHost,
    log: Arc<LogStore>,
    preview: Arc<Mutex<String>>,
    theme: Theme,
) {
    let mut next_session: SessionId = 1;

    loop {
        let deadline = scheduler.next_deadline();
        let action = tokio::select! {
            // Edits are drained ahead of commands, so a flush or run sent
            // right after an edit always observes it.
            biased;
            doc = buffer_rx.recv() => match doc {
                Some(doc) => scheduler.on_change(doc),
                None => break,
            },
            cmd = cmd_rx.recv() => match cmd {
                Some(PumpCommand::Run(doc)) => scheduler.on_run_request(doc),
                Some(PumpCommand::Flush) => scheduler.flush_now(),
                Some(PumpCommand::Shutdown) | None => break,
            },
            // Arm-only when a load is pending; the deadline is checked
            // against the scheduler's own clock on wakeup.
            _ = sleep_until_deadline(deadline), if deadline.is_some() => scheduler.on_timer(),
        };

        if let SchedulerAction::Load {
            document,
            include_script,
        } = action
        {
            let html = assemble(
                &document,
                &AssembleOptions {
                    theme,
                    include_script,
                },
            );
            *preview.lock() = html.clone();

            let session = next_session;
            match host.load(html, session) {
                Ok(()) => {
                    next_session += 1;
                    log.begin_session(session);
                }
                Err(err) => {
                    // Nothing superseded the running session; its output
                    // keeps flowing until a load actually replaces it.
                    tracing::warn!(session, error = %err, "document load rejected");
                }
            }
        }
    }

    tracing::debug!("playground pump stopped");
}

async fn sleep_until_deadline(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        // Branch is disabled by the select condition; never completes.
        None => std::future::pending::<()>().await,
    }
}

async fn relay(mut events: mpsc::UnboundedReceiver<Value>, log: Arc<LogStore>) {
    while let Some(message) = events.recv().await {
        log.receive(&message);
    }
    tracing::debug!("playground relay stopped");
}
