pub mod handlers;
pub mod server;

pub use handlers::{PageState, SERVER_ID};
pub use server::{build_router, spawn_server};
