//! 수집 모듈.

pub mod candle_ingest;
pub mod crawl_guard;
pub mod dart_jobs;
pub mod dedup;
pub mod judal_crawl;
pub mod news_pipeline;
pub mod normalize;
pub mod universe;

pub use candle_ingest::{filter_new_bars, CandleService, CandleSource};
pub use crawl_guard::{CrawlCoordinator, CrawlInFlight, CrawlRunner, CrawlStatus};
pub use dart_jobs::DartJobs;
pub use dedup::{DedupDecision, Deduplicator, TitleSimilarityDeduplicator};
pub use judal_crawl::{crawl_date_today, CrawlSource, ThemeCrawler};
pub use news_pipeline::NewsProcessor;
pub use normalize::{canonicalize_url, normalize, NormalizeError};
pub use universe::{market_today, CrawledStockUniverse, UniverseBuilder};
