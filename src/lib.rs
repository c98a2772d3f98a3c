//! docroute - a conversational router for a local document knowledge base.
//!
//! docroute takes one free-text utterance, finds the filesystem path it
//! mentions, classifies it into exactly one intent and hands the intent to
//! the matching collaborator. Content questions are answered from a
//! reciprocal-rank fusion of a semantic and a lexical ranking, folders can
//! be reorganized through a previewed and confirmed plan, and the
//! collection that questions are answered from can be switched at runtime.
//!
//! # Quick start
//!
//! ```no_run
//! use docroute::{DataDir, LocalServices, router::process_paths};
//!
//! # async fn run() -> docroute::Result<()> {
//! let services = LocalServices::open(DataDir::resolve(None)?)?;
//! let router = services.router(process_paths()?)?;
//!
//! let routed = router.route("ls ~/Documents").await?;
//! println!("{}", serde_json::to_string_pretty(&routed)?);
//! # Ok(())
//! # }
//! ```

pub mod chat;
pub mod collaborators;
pub mod collection;
pub mod config;
pub mod config_db;
pub mod data_dir;
pub mod doc_id;
pub mod entities;
pub mod error;
pub mod fusion;
pub mod health;
pub mod ingestion;
pub mod intent;
pub mod local;
pub mod local_fs;
pub mod mcp;
pub mod organizer;
pub mod path_extract;
pub mod responder;
pub mod router;
pub mod tantivy_index;
pub mod text_util;
pub mod utterance;
pub mod walker;

pub use collection::{ActiveCollection, CollectionId};
pub use config::Settings;
pub use config_db::ConfigDb;
pub use data_dir::DataDir;
pub use doc_id::DocumentId;
pub use error::{Error, Result};
pub use fusion::{FusedResult, HybridFuser};
pub use intent::Intent;
pub use local::LocalServices;
pub use router::{Outcome, Routed, Router};
pub use tantivy_index::SearchIndex;
