pub mod decision;
pub mod measurement;
pub mod plan;
pub mod price;
pub mod settings;
pub mod state;
pub mod status;

pub use decision::*;
pub use measurement::*;
pub use plan::*;
pub use price::*;
pub use settings::*;
pub use state::*;
pub use status::*;
