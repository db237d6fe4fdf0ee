/// Database model definitions.
pub mod models;
/// Players, boxes, sessions and progress persistence.
pub mod session_store;
/// Storage abstraction layer for database operations.
pub mod storage;
