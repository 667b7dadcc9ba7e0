pub mod entities;
pub mod protocol;
pub mod repositories;
pub mod results;
pub mod value_objects;

pub use coordinator_core::{CoordinatorError, CoordinatorResult};
pub use entities::*;
pub use protocol::*;
pub use repositories::*;
pub use results::*;
pub use value_objects::*;
