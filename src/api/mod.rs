//! Construction-time configuration: a builder (`SettingEngine`) plus the
//! coordinator factory that consumes it.

pub mod setting_engine;

pub use setting_engine::SettingEngine;
