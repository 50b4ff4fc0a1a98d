pub mod allocator;
pub mod bucket;
pub mod dedup;
pub mod multibucket;

pub use allocator::{allocate, best_fit, padding_cost, BucketAllocator};
pub use bucket::{Bucket, BucketState, PaddedBatch, PAD_VALUE};
pub use dedup::{SequenceDeduplicator, PLACEHOLDER_ID};
pub use multibucket::{Multibucket, MultibucketBatch, Slot};
