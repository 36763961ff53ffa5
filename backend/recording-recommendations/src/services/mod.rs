pub mod aggregator;
pub mod candidates;
pub mod ranker;
pub mod raw;

pub use aggregator::{aggregate, RecommendationBundles};
pub use candidates::{restrict_candidates, ActiveUsers};
pub use ranker::{ItemCatalog, ListenHistory, RecommendationRanker};
pub use raw::generate_raw_recommendations;
