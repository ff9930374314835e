#![warn(missing_docs)]
#![doc = include_str!("../README.md")]
#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod bucket_array;
pub mod size_policy;

pub use bucket_array::Bucket;
pub use bucket_array::BucketCursor;
pub use bucket_array::GroupedBucketArray;
pub use bucket_array::Node;
