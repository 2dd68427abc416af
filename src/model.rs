pub mod adapter;
pub mod clipboard;
pub mod dd;
pub mod document;
pub mod store;
pub mod undo;
pub mod versioned;
