//! Lodestone Core - accounts and game file downloads
//!
//! This crate provides the two engines behind Lodestone:
//! the Microsoft → Xbox Live → XSTS → Minecraft services login chain,
//! and a download orchestrator that turns a version descriptor into a
//! prioritized, verified and resumable set of file transfers.

pub mod auth;
pub mod builder;
pub mod descriptor;
pub mod engine;
mod error;
mod layout;

pub use auth::{
    AuthOptions, AuthOrchestrator, HttpTransport, MicrosoftAuthConfig, MojangAuthExchanger,
    ReqwestTransport, TokenExchangeClient, XboxAuthExchanger,
};
pub use builder::{BuildOptions, DownloadTaskBuilder};
pub use descriptor::{LocalVersionResolver, StaticVersionResolver, VersionDescriptor, VersionResolver};
pub use engine::{DownloadOptions, DownloadOrchestrator, FileSource, HttpFileSource, MirrorPolicy};
pub use error::*;
pub use layout::*;

/// User agent sent with every request
pub const USER_AGENT: &str = concat!("Lodestone/", env!("CARGO_PKG_VERSION"));
