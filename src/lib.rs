pub mod api;
pub mod config;
pub mod controller;
pub mod domain;
pub mod forecast;
pub mod hardware;
pub mod modbus;
pub mod telemetry;
