pub mod classify;
pub mod compiler;
pub mod dialect;
pub mod limits;
pub mod local;
pub mod materialize;
pub mod retry;
pub mod types;
pub mod warehouse;
