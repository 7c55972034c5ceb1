// Library exports for the vigil worker-pool supervisor

pub mod alert;
pub mod cli;
pub mod config;
pub mod daemon;
pub mod error;
pub mod health;
pub mod ipc;
pub mod maintenance;
pub mod process;
pub mod state;
pub mod supervisor;
pub mod watchdog;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;
