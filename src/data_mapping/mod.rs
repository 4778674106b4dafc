pub mod engine;
pub mod matcher;

pub use engine::{CanonicalIdentity, IdentityNormalizer, default_key};
pub use matcher::PatternMatcher;
