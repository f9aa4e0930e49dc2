pub mod charger;
pub mod inverter;
pub mod plug;
pub mod settings;

pub use charger::*;
pub use inverter::*;
pub use plug::*;
pub use settings::*;
