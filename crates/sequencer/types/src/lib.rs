//! Sequencer Domain Types
//!
//! A host application defines named, linear **sequences** of scripted steps
//! and runs them against a live environment. This crate holds everything
//! that describes a sequence; the engine that runs them lives in
//! `sequencer-engine`.
//!
//! # Key Concepts
//!
//! - **Token**: opaque capability handle. Used as owner token, security
//!   token and runner token.
//! - **ConfigStep**: an immutable attribute bag with an `action` and an
//!   optional `wait-after-action`.
//! - **ConfigSequence**: ordered steps plus a security token that only the
//!   owner can read.
//! - **ConfigSection**: named sequences owned by one token.
//! - **RunOptions**: initiator, ad-hoc placeholders, authorization keys and
//!   the singleton flag of one run.
//! - **StepValidator**: the seam through which an engine validates steps
//!   without the config tree ever referencing the engine.
//!
//! # Design Principles
//!
//! 1. Nothing invalid is observable: every config object validates at
//!    construction.
//! 2. Possession of a token is the only proof of identity.
//! 3. Config objects are shared read-only; a reload builds new objects.

#![deny(unsafe_code)]

mod definition;
mod errors;
mod options;
mod section;
mod sequence;
mod step;
mod token;
mod validator;

pub use definition::*;
pub use errors::*;
pub use options::*;
pub use section::*;
pub use sequence::*;
pub use step::*;
pub use token::*;
pub use validator::*;
