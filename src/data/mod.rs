//! In-memory counter data: value kinds and the keyed store

pub mod store;
pub mod value;

pub use store::KeyedDataStore;
pub use value::{DataType, Histogram, HitCount, MetricValue};
