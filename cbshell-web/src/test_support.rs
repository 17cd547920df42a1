//! Fakes shared by the unit tests.

use std::cell::RefCell;
use std::rc::Rc;

use glam::Vec2;

use crate::diagnostics::CapturedError;
use crate::engine::Engine;
use crate::frame::{Dispatch, FrameBuilder, HitRegion, RenderLayer, ShapeEvent, ShapeEventKind};
use crate::module::DomainModule;
use crate::renderer::{FrameDraw, Renderer};
use crate::scheduler::DrawStatus;
use crate::settings::SettingSpec;
use crate::state::{ModuleState, SetSharedState, SharedState};

#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    Start,
    SetIntent(String, Vec<Vec2>, bool),
    MoveGesturePoint(String, usize, Vec2, bool),
    StartNewGesture(String, Vec<Vec2>),
    InsertControlPoint(String, Vec2, bool),
    SplitGesture(String, Vec2, bool),
    SetNLanes(String, u32, u32, bool),
}

#[derive(Debug, Default)]
pub struct RecordingEngine {
    calls: RefCell<Vec<EngineCall>>,
}

impl RecordingEngine {
    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.borrow().clone()
    }

    fn record(&self, call: EngineCall) {
        self.calls.borrow_mut().push(call);
    }
}

impl Engine for RecordingEngine {
    type Intent = Vec<Vec2>;

    fn start(&self) {
        self.record(EngineCall::Start);
    }

    fn set_intent(
        &self,
        _project_id: &str,
        gesture_id: &str,
        intent: &Vec<Vec2>,
        done_adding: bool,
    ) {
        self.record(EngineCall::SetIntent(gesture_id.into(), intent.clone(), done_adding));
    }

    fn move_gesture_point(
        &self,
        _project_id: &str,
        gesture_id: &str,
        point_idx: usize,
        position: Vec2,
        done_moving: bool,
    ) {
        let gesture_id = gesture_id.to_string();
        self.record(EngineCall::MoveGesturePoint(gesture_id, point_idx, position, done_moving));
    }

    fn start_new_gesture(&self, _project_id: &str, gesture_id: &str, intent: &Vec<Vec2>) {
        self.record(EngineCall::StartNewGesture(gesture_id.into(), intent.clone()));
    }

    fn with_control_point_added(
        &self,
        intent: &Vec<Vec2>,
        point: Vec2,
        add_to_end: bool,
    ) -> Vec<Vec2> {
        let mut next = intent.clone();
        if add_to_end {
            next.push(point);
        } else {
            next.insert(0, point);
        }
        next
    }

    fn insert_control_point(
        &self,
        _project_id: &str,
        gesture_id: &str,
        point: Vec2,
        done_inserting: bool,
    ) {
        self.record(EngineCall::InsertControlPoint(gesture_id.into(), point, done_inserting));
    }

    fn split_gesture(
        &self,
        _project_id: &str,
        gesture_id: &str,
        point: Vec2,
        done_splitting: bool,
    ) {
        self.record(EngineCall::SplitGesture(gesture_id.into(), point, done_splitting));
    }

    fn set_n_lanes(
        &self,
        _project_id: &str,
        gesture_id: &str,
        forward: u32,
        backward: u32,
        done_changing: bool,
    ) {
        self.record(EngineCall::SetNLanes(gesture_id.into(), forward, backward, done_changing));
    }
}

/// Renderer that remembers what it was asked to draw.
#[derive(Debug, Clone)]
pub struct CountingRenderer {
    pub draws: Rc<RefCell<Vec<Vec<String>>>>,
    pub status: DrawStatus,
    pub fail_with: Option<String>,
}

impl Default for CountingRenderer {
    fn default() -> Self {
        Self {
            draws: Rc::default(),
            status: DrawStatus::Completed,
            fail_with: None,
        }
    }
}

impl CountingRenderer {
    pub fn draw_count(&self) -> usize {
        self.draws.borrow().len()
    }
}

impl Renderer for CountingRenderer {
    fn render_frame(&mut self, frame: &FrameDraw<'_>) -> Result<DrawStatus, CapturedError> {
        if let Some(message) = &self.fail_with {
            return Err(CapturedError::new(message.clone()));
        }
        let keys = frame.layers.iter().map(|layer| layer.key.clone()).collect();
        self.draws.borrow_mut().push(keys);
        Ok(self.status)
    }
}

/// Opaque subtree of [`CounterModule`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Counter(pub Vec<u32>);

impl Counter {
    pub fn pushed(&self, value: u32) -> Counter {
        let mut values = self.0.clone();
        values.push(value);
        Counter(values)
    }
}

/// One layer plus one pickable circle per stored value, spaced 20 units
/// apart along x. Dragging a circle moves gesture point `i` in the engine.
pub struct CounterModule;

impl DomainModule<RecordingEngine> for CounterModule {
    fn name(&self) -> &str {
        "counter"
    }

    fn initial_state(&self) -> Rc<dyn ModuleState> {
        Rc::new(Counter::default())
    }

    fn settings_spec(&self) -> Vec<(&str, SettingSpec)> {
        vec![("step", SettingSpec::new(1.0, "Step", 1.0, 10.0, 1.0))]
    }

    fn bind_inputs(&self, _state: &SharedState, set_state: &SetSharedState) {
        set_state.update(|s| s.with_ui_mode(Some("counter".into())));
    }

    fn build(&self, state: &SharedState, frame: &mut FrameBuilder<RecordingEngine>) {
        frame.layer(RenderLayer::new("counter"));
        let Some(counter) = state.module::<Counter>("counter") else {
            return;
        };
        for (i, _) in counter.0.iter().enumerate() {
            let region = HitRegion::Circle {
                center: Vec2::new(i as f32 * 20.0, 0.0),
                radius: 5.0,
            };
            frame.shape(
                format!("point-{i}"),
                region,
                move |event: &ShapeEvent, dispatch: &Dispatch<'_, RecordingEngine>| {
                    let Some(engine) = dispatch.engine() else {
                        return;
                    };
                    let position = event.world.map(|w| w.truncate()).unwrap_or_default();
                    match event.kind {
                        ShapeEventKind::Drag => {
                            engine.move_gesture_point("p", "g", i, position, false)
                        }
                        ShapeEventKind::PointerUp => {
                            engine.move_gesture_point("p", "g", i, position, true)
                        }
                        _ => {}
                    }
                },
            );
        }
    }
}
