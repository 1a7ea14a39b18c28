pub mod config;
pub mod core;
pub mod dry_run;
pub mod error;
pub mod log;
pub mod orchestration;
pub mod plan;
pub mod session;
pub mod storage;

pub use error::{Error, Result};
pub use session::{SessionHandle, SessionId, SessionManager};
