//! Message passing and the collectives built on it.

pub mod collective;
pub mod communicator;
pub mod wire;

pub use communicator::{CommTag, Communicator, LocalComm, NoComm};
