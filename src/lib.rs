//! # Livepen — An Embeddable Live HTML/CSS/JS Playground Engine
//!
//! `livepen` turns three editable source fragments (markup, style, script)
//! into a continuously refreshed, sandboxed preview with a structured
//! console log. It provides:
//!
//! - **Source buffer**: Independent markup/style/script fragments with
//!   change notification.
//! - **Document assembler**: Deterministic single-document preview build
//!   with theming and safe script embedding.
//! - **Isolated execution**: The document's scripts run in a boa_engine
//!   context on a dedicated thread; each load fully replaces the previous
//!   one, discarding its timers and state.
//! - **Instrumentation**: In-guest console capture, uncaught error and
//!   unhandled rejection reporting, cooperative `setTimeout` support.
//! - **Update scheduling**: Debounced auto-run or explicit manual run.
//! - **Console log**: Validated, session-filtered, subscribable entries.
//! - **Projects**: Pluggable persistence for named, versioned documents.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use livepen::{Fragment, Playground};
//!
//! #[tokio::main]
//! async fn main() {
//!     let playground = Playground::builder().start();
//!     playground.set_fragment(Fragment::Markup, "<h1>hello</h1>");
//!     playground.set_fragment(Fragment::Script, "console.log('hello');");
//!     playground.flush_now().unwrap();
//!     // ... read playground.log_entries(Default::default()) once the
//!     // load has executed.
//!     playground.shutdown();
//! }
//! ```

pub mod assemble;
pub mod clock;
pub mod config;
pub mod error;
pub mod host;
pub mod playground;
pub mod project;
pub mod relay;
pub mod scheduler;
pub mod source;

pub use assemble::{assemble, AssembleOptions, Theme};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::PlaygroundConfig;
pub use error::{HostError, PersistError, PlaygroundError};
pub use host::{ExecutionHost, HostConfig, SessionId};
pub use playground::{Playground, PlaygroundBuilder};
pub use project::{
    InMemoryProjectStore, ProjectDraft, ProjectPatch, ProjectRecord, ProjectStore,
};
pub use relay::{LogEntry, LogEvent, LogFilter, LogKind, LogStore};
pub use scheduler::{RunPolicy, Scheduler, SchedulerAction};
pub use source::{Fragment, SourceBuffer, SourceDocument};
