pub mod factory;
#[cfg(feature = "modbus")]
pub mod modbus;

pub use factory::DeviceFactory;
