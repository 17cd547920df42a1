use cbshell_shared::FrameUniforms;

use crate::diagnostics::CapturedError;
use crate::frame::RenderLayer;
use crate::scheduler::DrawStatus;

/// Everything one draw needs, borrowed from the coordinator for the
/// duration of the call.
#[derive(Debug, Clone, Copy)]
pub struct FrameDraw<'a> {
    pub layers: &'a [RenderLayer],
    pub uniforms: FrameUniforms,
    pub clear_color: [f32; 4],
}

/// Opaque draw capability.
pub trait Renderer {
    fn render_frame(&mut self, frame: &FrameDraw<'_>) -> Result<DrawStatus, CapturedError>;
}
