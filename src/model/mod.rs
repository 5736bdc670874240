pub mod normalize;
pub mod request;
pub mod response;

pub use normalize::*;
pub use request::*;
pub use response::*;
