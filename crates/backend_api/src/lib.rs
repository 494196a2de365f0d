pub mod broadcaster;
pub mod error;
pub mod handlers;
pub mod line_auth;
pub mod live;
pub mod repository;
pub mod router;
pub mod server;
pub mod service;
pub mod session;
pub mod state;

pub use broadcaster::{BroadcastReport, Broadcaster, Outbound};
pub use error::{ApiError, Result};
pub use line_auth::LineAuthProvider;
pub use repository::{KaimemoRepository, MemoryKaimemoRepository, NotionKaimemoRepository};
pub use router::create_router;
pub use server::{init_tracing, run_server};
pub use service::KaimemoService;
pub use session::SessionStore;
pub use state::AppState;
