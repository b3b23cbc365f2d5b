//! CCPlayer core - headless media playback engine
//!
//! The engine turns a media location into a running pipeline: decoders fill
//! bounded buffers, a playback loop drains them into an audio sampler and a
//! video renderer, and a command executor drives it all through a small
//! state machine. Decoders and samplers come from a [`decoder::Backend`]
//! registered once per process with [`init`], or passed explicitly to
//! [`player::MediaPlayer::with_backend`].

pub mod audio;
pub mod decoder;
pub mod pipeline;
pub mod player;
pub mod renderer;
pub mod utils;

pub use player::{MediaPlayer, PlayerEvent, PlayerSettings, PlayerState};
pub use utils::error::{CCPlayerError, Result};

use decoder::Backend;
use once_cell::sync::OnceCell;
use std::sync::Arc;

static BACKEND: OnceCell<Arc<dyn Backend>> = OnceCell::new();

/// Register the process-wide backend
///
/// Must run before [`MediaPlayer::new`]. Registering the same backend again
/// succeeds; registering a different one fails.
pub fn init(backend: Arc<dyn Backend>) -> Result<()> {
    let registered = BACKEND.get_or_init(|| Arc::clone(&backend));
    // Compare data pointers only; vtables may differ across codegen units.
    if Arc::as_ptr(registered) as *const () == Arc::as_ptr(&backend) as *const () {
        log::info!("Engine backend initialized");
        Ok(())
    } else {
        Err(CCPlayerError::Config(
            "A different engine backend is already initialized".to_string(),
        ))
    }
}

/// The backend registered with [`init`]
pub fn backend() -> Option<Arc<dyn Backend>> {
    BACKEND.get().cloned()
}
