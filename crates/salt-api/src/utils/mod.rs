pub mod daemon;
pub mod log;
pub mod verify;
