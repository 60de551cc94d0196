#[macro_use]
pub mod ids;

pub mod data_structures;
pub mod error;
pub mod rpc;
pub mod utils;
