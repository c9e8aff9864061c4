pub mod config;
pub mod doctor;
pub mod engine;
pub mod listing;
pub mod pipeline;
pub mod templates;
pub mod util;

pub use config::*;
pub use doctor::*;
pub use engine::*;
pub use listing::*;
pub use pipeline::*;
pub use util::*;
