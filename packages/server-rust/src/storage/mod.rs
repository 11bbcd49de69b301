//! In-process data-mapping layer.
//!
//! Layers, innermost first:
//!
//! - [`StorageEngine`]: table-oriented row storage with atomic write batches
//! - [`query::execute`]: evaluation of a [`Select`](tenantry_core::Select) tree
//! - [`UnitOfWork`]: per-request change tracking with two interception
//!   points, [`ReadInterceptor`] and [`FlushInterceptor`]
//! - [`Database`]: shared handle that wires the above together

pub mod database;
pub mod engine;
pub mod engines;
pub mod interceptor;
pub mod query;
pub mod row;
pub mod unit_of_work;

pub use database::*;
pub use engine::*;
pub use engines::HashMapStorage;
pub use interceptor::*;
pub use row::*;
pub use unit_of_work::*;
