pub mod document_filter;
pub mod pipeline;

pub use document_filter::{matches, sort_documents};
pub use pipeline::run_pipeline;
