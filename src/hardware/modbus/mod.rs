pub mod inverter;

pub use inverter::ModbusInverter;
