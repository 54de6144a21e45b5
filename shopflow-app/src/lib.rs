pub mod state;
pub mod scenario;

pub use state::AppState;
