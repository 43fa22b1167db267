// Library for tests to access modules

pub mod broker;
pub mod config;
pub mod control_loop;
pub mod docker_runtime;
pub mod error;
pub mod fleet_controller;
pub mod fleet_inspector;
pub mod image_refresher;
pub mod kafka_offsets;
pub mod lag_monitor;
pub mod models;
pub mod policy;
pub mod runtime;
