pub mod handler;
pub mod signals;
pub mod state;
pub mod subscriber;

pub use handler::LogHandler;
pub use state::SessionState;
pub use subscriber::Subscriber;
