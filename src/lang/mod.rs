//! # Cinder value model
//!
//! Everything a running script can hold: scalars, the null singleton, the
//! ordered container and opaque host objects.
//!
//! ## Documentation conventions
//!
//! - `[ ... ]` denotes a Cinder array literal (a container keyed `0..n`).
//! - Type names in messages use [`TypeSymbol`](types::TypeSymbol) spelling.

pub mod container;
pub mod types;
pub mod value;
