//! Download engine
//!
//! - `queue`: priority queue shared by the workers
//! - `source`: byte sources (HTTP, or anything implementing `FileSource`)
//! - `transfer`: streams one file into its partial path
//! - `verify`: size and SHA-1 checks
//! - `mirror`: mirror rewriting and origin fallback
//! - `orchestrator`: runs, workers, pause/resume/cancel and events

mod mirror;
mod orchestrator;
mod queue;
mod source;
mod transfer;
pub mod verify;

pub use mirror::{MirrorPolicy, UrlRewrite};
pub use orchestrator::{DownloadOptions, DownloadOrchestrator, EVENT_CAPACITY};
pub use queue::{QueueEntry, TaskQueue};
pub use source::{ByteStream, FetchResponse, FileSource, HttpFileSource};
