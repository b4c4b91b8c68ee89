//! Object storage on an embedded transactional key-value store.
//!
//! [`kv::KvStore`] wraps the database. [`store::ObjectStore`] builds
//! buckets and objects on top of it, [`multipart`] adds multipart uploads,
//! and [`reader::ObjectReader`] streams stored content back out.

pub mod kv;
pub mod multipart;
pub mod object;
pub mod reader;
pub mod store;

pub use kv::KvStore;
pub use object::{BucketInfo, MultipartUpload, Object};
pub use reader::{ByteRange, ObjectReader};
pub use store::ObjectStore;
