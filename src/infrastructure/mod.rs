pub mod sqlite_store;
