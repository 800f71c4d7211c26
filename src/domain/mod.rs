pub mod change;
pub mod store;
pub mod task;
