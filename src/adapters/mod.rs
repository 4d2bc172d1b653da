//! Adapters — concrete implementations of the hexagonal port traits.
//!
//! | Adapter    | Implements | Connects to                              |
//! |------------|------------|------------------------------------------|
//! | `flash`    | FlashPort  | Host NOR model / ESP-IDF data partition   |
//! | `log_sink` | EventSink  | Serial log output                         |

pub mod flash;
pub mod log_sink;
