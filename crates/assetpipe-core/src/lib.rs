#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]

//! Asset pipeline engine.
//!
//! Turns a front-end source tree into a directory of content-hashed
//! artifacts: rules pick a transform pipeline per file, the module graph is
//! split into entry, shared, vendor and async bundles, and the results are
//! published atomically. The [`dev`] module keeps a session alive across
//! incremental rebuilds.

pub mod bundler;
pub mod compiler;
pub mod config;
pub mod css;
pub mod dev;
pub mod error;
pub mod version;

pub use bundler::{Artifact, ArtifactSet, BuildError, BuildReport, Builder};
pub use config::PipelineConfig;
pub use error::Error;
pub use version::VERSION;
