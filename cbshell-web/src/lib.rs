//! Citybound browser shell runtime
//!
//! Loads the simulation engine asynchronously, owns the shared state tree
//! composed from the domain modules, drives the frame loop and routes pointer
//! input through the 3D camera. Uncaught failures are captured into an
//! append-only diagnostic log instead of ending the session.
//!
//! Everything except the browser host in `app` is plain Rust and runs
//! natively, which is how the `cbshell` CLI replays sessions headlessly.

#[cfg(target_arch = "wasm32")]
mod app;
pub mod camera;
pub mod diagnostics;
pub mod engine;
mod error;
pub mod frame;
pub mod input;
pub mod module;
pub mod renderer;
pub mod scheduler;
pub mod settings;
pub mod shell;
pub mod state;
#[cfg(test)]
mod test_support;

pub use error::ShellError;
pub use shell::Shell;

#[cfg(target_arch = "wasm32")]
use wasm_bindgen::prelude::*;

/// Entry point, called when the WASM module loads.
#[cfg(target_arch = "wasm32")]
#[wasm_bindgen(start)]
pub fn start() {
    console_error_panic_hook::set_once();
    if console_log::init_with_level(log::Level::Info).is_err() {
        return;
    }
    log::info!("Citybound shell runtime initialized");
}

#[cfg(target_arch = "wasm32")]
pub use app::{boot, JsEngine, ShellHandle};
