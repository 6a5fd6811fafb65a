pub mod config;
pub mod error;
pub mod ledger;
pub mod matcher;
pub mod menu;
pub mod session;
pub mod storage;

pub use error::Error;

pub use rollcall_vision::{Detection, EncodedFace, Embedding, FaceEncoder};
