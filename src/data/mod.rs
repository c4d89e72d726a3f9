pub mod accessor;
pub mod cache;
pub mod github;
pub mod manifold;
pub mod types;
