pub mod model;
pub mod request;

pub use model::Market;
pub use request::CreationRequest;
