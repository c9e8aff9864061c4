pub mod error;
pub mod ids;
pub mod label;
pub mod model;
pub mod range;
pub mod types;

pub use error::*;
pub use ids::*;
pub use label::*;
pub use model::*;
pub use range::*;
pub use types::*;
