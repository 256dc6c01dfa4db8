pub mod channel;
pub mod codec;
pub mod command;
pub mod config;
pub mod device;
pub mod error;
pub mod line;
pub mod outcome;
pub mod regcalc;
pub mod response;
pub mod transport;

// Re-export the main types for easy access
pub use command::Command;
pub use config::LinkConfig;
pub use device::Smu;
pub use error::{Result, SmuError};
pub use outcome::{Outcome, Skip};
