mod extractor;
mod fetcher;

pub use extractor::{SourceExtractor, SourceRule};
pub use fetcher::PageFetcher;
