pub mod api;
pub mod cli;
pub mod clock;
pub mod error;
pub mod node;
pub mod registry;
pub mod settings;
pub mod transport;
