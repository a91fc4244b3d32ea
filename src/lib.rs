pub mod config;
pub mod error;
pub mod launcher;
pub mod status;  // port + 1 locator
pub mod supervisor;
