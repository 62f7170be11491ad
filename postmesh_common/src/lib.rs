//! # postmesh_common
//! Shared types, error definitions, and plug-in traits used throughout the
//! postmesh ecosystem (broker and client crates alike).

mod error;
pub use error::{Error, Result};

pub mod model;
pub use model::*;

pub mod hash;

pub mod traits;
pub use traits::*;
