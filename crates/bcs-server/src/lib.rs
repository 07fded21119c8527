//! The console command server: dispatches commands, scripts and evaluations
//! onto worker threads over a shared interpreter, tracks the derived
//! script/scan status, and owns the pause, interrupt and abort controls.

pub mod config;
pub mod devices;
pub mod error;
mod panic_stop;
mod registry;
pub mod server;
mod status;
pub mod stub;
pub mod worker;

#[cfg(any(feature = "test-fixtures", test))]
pub mod fixtures;

pub use config::ServerConfig;
pub use devices::DeviceRegistry;
pub use error::ServerError;
pub use server::{CommandServer, CommandServerBuilder};
pub use stub::StubInterpreter;
pub use worker::{check_for_interruption, check_for_pauses, current_authorisation_level};
