#[macro_use]
extern crate serde;

mod census;
mod entity;
mod envelope;
mod error;
mod gateway;
mod identifier;
mod identity;
mod mem_gateway;
mod orchestrator;
mod process;
mod results;
mod serde_hex;
mod signed;
mod util;

pub use census::*;
pub use entity::*;
pub use envelope::*;
pub use error::*;
pub use gateway::*;
pub use identifier::*;
pub use identity::*;
pub use mem_gateway::*;
pub use orchestrator::*;
pub use process::*;
pub use results::*;
pub use serde_hex::*;
pub use signed::*;
pub use util::*;

#[cfg(test)]
mod tests;
