pub mod health;
pub mod non_streaming;
pub mod relay;

pub use non_streaming::handle_non_streaming;
