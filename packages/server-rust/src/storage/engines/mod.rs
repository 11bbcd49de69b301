//! Storage engine implementations.

pub mod hashmap;

pub use hashmap::HashMapStorage;
