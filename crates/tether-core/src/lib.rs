//! # tether-core
//!
//! Foundation types for the tether session manager.
//!
//! This crate provides the vocabulary shared by the session and CLI crates:
//!
//! - **Errors**: [`errors::SessionError`] taxonomy via `thiserror`
//! - **Wire codec**: [`wire::encode_call`], [`wire::decode`] and the [`wire::Frame`] enum
//! - **Credentials**: [`credential::Credential`] with local expiry checks and JWT `exp` decoding
//! - **Close codes**: [`close_code::CloseClass`] classification of WebSocket closure codes
//! - **Logging**: [`logging::init_subscriber`] for binaries
//! - **Text**: UTF-8–safe truncation used when logging secrets and payloads
//!
//! ## Crate Position
//!
//! Foundation crate. Depended on by all other tether crates.

#![deny(unsafe_code)]

pub mod close_code;
pub mod credential;
pub mod errors;
pub mod logging;
pub mod text;
pub mod wire;

pub use close_code::CloseClass;
pub use credential::{Credential, CredentialError};
pub use errors::SessionError;
pub use wire::{Frame, RequestId};
