//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter     | Implements      | Connects to                  |
//! |-------------|-----------------|------------------------------|
//! | `bluedroid` | PeripheralStack | Bluedroid GATT server + GAP  |
//!
//! The `ScriptHost` port is implemented by the embedding engine binding.

pub mod bluedroid;
