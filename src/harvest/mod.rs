pub mod dedup;
pub mod filter;
pub mod photos;
pub mod pipeline;

pub use dedup::{Admission, DedupGate};
pub use filter::FilterChain;
pub use photos::PhotoStore;
pub use pipeline::{HarvestPipeline, HarvestSettings};
