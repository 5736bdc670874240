pub mod memory;
pub mod mongo;
pub mod traits;

pub use memory::*;
pub use mongo::*;
pub use traits::*;
