//! Types and math shared between the browser shell runtime and the native
//! headless host.

pub mod instance;
pub mod math;

pub use instance::{FrameUniforms, Instance, GRASS};
