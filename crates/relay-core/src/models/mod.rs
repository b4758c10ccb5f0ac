pub mod agent;
pub mod context;
pub mod execution;
pub mod gate;
pub mod step;

pub use agent::*;
pub use context::*;
pub use execution::*;
pub use gate::*;
pub use step::*;
