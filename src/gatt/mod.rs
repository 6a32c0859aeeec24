//! GATT server core: descriptor model, script-object parser, attribute
//! table builder and the cross-context callback bridge.
//!
//! ```text
//!  script objects ──parser──▶ ServiceTree ──table──▶ AttributeTable[]
//!                                  ▲                        │
//!                                  └──── bridge ◀── stack callbacks
//! ```

pub mod att;
pub mod bridge;
pub mod model;
pub mod parser;
pub mod table;
