pub mod merge;
pub mod task_sync;
pub mod view;
