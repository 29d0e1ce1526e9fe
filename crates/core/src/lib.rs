//! Core library for b24bot
//!
//! This crate implements the **Functional Core** of b24bot, following the
//! Functional Core - Imperative Shell architectural pattern.
//!
//! # Architecture Overview
//!
//! - **`b24bot_core`** (this crate): markup conversion, truncation and payload
//!   transformations with zero I/O
//! - **`b24bot`**: HTTP calls to the Bitrix24 REST API, configuration and the CLI
//!
//! The only places the core waits on anything are the transpiler and the message
//! composer, which resolve files and users through a [`lookup::ResourceLookup`]
//! supplied by the shell. Tests pass an in-memory lookup instead.
//!
//! # Module Organization
//!
//! - [`bbcode`]: BBCode to the HTML subset accepted by the chat bot
//! - [`truncate`]: length-bounded truncation that keeps tags balanced
//! - [`lookup`]: contracts and result types for file and user lookups
//! - [`diagnostics`]: warnings raised while transpiling, reported to a caller-owned sink
//! - [`bitrix`]: Bitrix24 REST payloads and their transformations
//! - [`notification`]: bot messages for task events
//! - [`escape`]: HTML escaping helpers
//!
//! # Example Usage
//!
//! ```rust,ignore
//! use b24bot_core::bbcode::transpile;
//! use b24bot_core::diagnostics::Recorder;
//! use b24bot_core::truncate::{truncate, DEFAULT_MAX_LENGTH};
//!
//! let recorder = Recorder::new();
//! let html = transpile(Some("[B]Deploy[/B] [USER=5]Ann[/USER]"), &lookup, &recorder).await;
//! let message = truncate(&html, DEFAULT_MAX_LENGTH);
//! for warning in recorder.take() {
//!     eprintln!("{warning}");
//! }
//! ```

pub mod bbcode;
pub mod bitrix;
pub mod diagnostics;
pub mod escape;
pub mod lookup;
pub mod notification;
pub mod truncate;
