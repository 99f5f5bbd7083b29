//! Bridge between a Honeywell Galaxy alarm panel, exposed over MQTT by a
//! vmod gateway, and a host that consumes stateful entities.

pub mod config;
pub mod discovery;
pub mod entities;
pub mod mqtt;
pub mod platform;
pub mod services;
pub mod topics;
