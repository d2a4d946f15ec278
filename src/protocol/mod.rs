pub mod codec;
pub mod error;
pub mod frame;
pub mod session;
pub mod wire;
