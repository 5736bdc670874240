pub mod error;
pub mod extractor;
pub mod handlers;
pub mod routes;

pub use error::*;
pub use extractor::*;
pub use handlers::*;
pub use routes::*;
