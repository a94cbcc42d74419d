//! Token entity, cache identity, and capacity-bounded storage strategies.

pub mod key;
pub mod strategy;
pub mod token;

pub use key::*;
pub use strategy::*;
pub use token::*;
