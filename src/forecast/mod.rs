pub mod analysis;
pub mod prices;

pub use analysis::*;
pub use prices::*;
