pub mod cancellation;
pub mod clock;
pub mod config;
pub mod directory;
pub mod error;
pub mod events;
pub mod geo;
pub mod matching;
pub mod registry;
pub mod relay;
pub mod session;
pub mod storage;
