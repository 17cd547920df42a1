use glam::Vec2;

use crate::camera::{MouseButtons, Projection};
use crate::frame::{Dispatch, FrameContributions, ShapeEvent, ShapeEventKind, ShapeKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerKind {
    Down,
    Move,
    Up,
}

/// Browser pointer event, in CSS pixels relative to the canvas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerInput {
    pub kind: PointerKind,
    pub position: Vec2,
    pub buttons: MouseButtons,
}

/// Routes pointer input to the shapes of the current frame.
///
/// Only a shape *key* survives between frames: a capturing shape is looked
/// up again in whatever frame is current when the next event arrives.
#[derive(Debug, Default)]
pub struct InputRouter {
    captured: Option<ShapeKey>,
    pointer: Vec2,
}

impl InputRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn captured(&self) -> Option<&ShapeKey> {
        self.captured.as_ref()
    }

    pub fn pointer(&self) -> Vec2 {
        self.pointer
    }

    /// Dispatch `input` to at most one shape and return its key.
    pub fn route<E>(
        &mut self,
        input: PointerInput,
        projection: &Projection,
        frame: &FrameContributions<E>,
        dispatch: &Dispatch<'_, E>,
    ) -> Option<ShapeKey> {
        self.pointer = input.position;
        let world = projection.project_2d_to_3d(input.position);
        let hit = || world.and_then(|w| frame.topmost_hit(w.truncate()));

        let (kind, shape) = match input.kind {
            PointerKind::Down => {
                let shape = hit()?;
                self.captured = Some(shape.key.clone());
                (ShapeEventKind::PointerDown, shape)
            }
            PointerKind::Move => match self.captured.as_ref().and_then(|key| frame.shape(key)) {
                Some(shape) => (ShapeEventKind::Drag, shape),
                None => {
                    if let Some(lost) = self.captured.take() {
                        log::debug!("Dropping pointer capture of {}/{}", lost.owner, lost.id);
                    }
                    (ShapeEventKind::Hover, hit()?)
                }
            },
            PointerKind::Up => {
                let captured = self.captured.take();
                let shape = captured.as_ref().and_then(|key| frame.shape(key));
                (ShapeEventKind::PointerUp, shape.or_else(hit)?)
            }
        };

        let event = ShapeEvent {
            kind,
            key: shape.key.clone(),
            world,
            screen: input.position,
            buttons: input.buttons,
        };
        (shape.handler)(&event, dispatch);
        Some(event.key)
    }
}
