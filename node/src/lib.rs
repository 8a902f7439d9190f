mod app;
mod key;

// for main.rs
pub use app::run;

pub use key::{node_key, ConsensusKey, KeyError, ED25519_KEY_TYPE};
