pub mod session;
pub mod tasks;
