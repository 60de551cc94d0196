#![deny(clippy::await_holding_refcell_ref)]

#[macro_use]
pub mod common;
pub mod control;

#[cfg(test)]
pub(crate) mod tests;

pub use common::data_structures::{Map, Set};
pub use common::ids::{AttemptId, ProfileId, StageAttemptId, StageId};

pub type Error = common::error::ExAllocError;
pub type Result<T> = std::result::Result<T, Error>;
