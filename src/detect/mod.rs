//! Vehicle detection capability.
//!
//! The collector treats detection as an opaque scoring function over a
//! decoded frame. Concrete backends are swappable; the ONNX backend lives
//! behind the `backend-tract` feature so the default build carries no model
//! toolchain.

pub mod backend;
pub mod backends;
pub mod result;

pub use backend::DetectorBackend;
pub use backends::build_backend;
pub use result::Detection;
