//! Object storage for ReMerge uploads.
//!
//! Only URL issuance lives here: clients upload and the pipeline's external
//! providers download directly from the bucket through presigned URLs.

pub mod client;
pub mod error;
pub mod memory;

pub use client::{ObjectUrls, S3Client, S3Config};
pub use error::{StorageError, StorageResult};
pub use memory::StaticObjectUrls;
