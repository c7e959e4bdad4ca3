#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Shared model and leaf logic for the live Java editor pipeline.

pub mod class_name;
pub mod error;
pub mod model;

mod util;

pub use class_name::{extract_class_name, is_java_identifier};
pub use error::CycleError;
pub use model::*;
pub use ulid::Ulid;
pub use util::new_ulid;
