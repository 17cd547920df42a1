//! Native stand-ins for what the browser provides: an engine that records
//! the calls it receives, a renderer that only traces draws, and a few
//! demo domain modules to exercise the shell.

use std::cell::RefCell;
use std::rc::Rc;

use cbshell_shared::Instance;
use cbshell_web::diagnostics::CapturedError;
use cbshell_web::engine::Engine;
use cbshell_web::frame::{
    Dispatch, FrameBuilder, HitRegion, MeshId, RenderLayer, ShapeEvent, ShapeEventKind,
};
use cbshell_web::module::DomainModule;
use cbshell_web::renderer::{FrameDraw, Renderer};
use cbshell_web::scheduler::DrawStatus;
use cbshell_web::settings::SettingSpec;
use cbshell_web::state::{ModuleState, SharedState};
use glam::{Vec2, Vec3};

const PROJECT: &str = "project-1";

// ─── Engine ──────────────────────────────────────────────────────────

/// Printable log of engine calls, shared with whoever inspects it.
#[derive(Debug, Clone, Default)]
pub struct CallLog(Rc<RefCell<Vec<String>>>);

impl CallLog {
    pub fn lines(&self) -> Vec<String> {
        self.0.borrow().clone()
    }

    fn push(&self, line: String) {
        log::debug!("engine <- {line}");
        self.0.borrow_mut().push(line);
    }
}

fn fmt_point(p: Vec2) -> String {
    format!("({:.1}, {:.1})", p.x, p.y)
}

/// Engine whose intents are plain control point lists.
#[derive(Debug)]
pub struct RecordingEngine {
    log: CallLog,
}

impl RecordingEngine {
    pub fn new(log: CallLog) -> Self {
        Self { log }
    }
}

impl Engine for RecordingEngine {
    type Intent = Vec<Vec2>;

    fn start(&self) {
        self.log.push("start()".into());
    }

    fn set_intent(
        &self,
        project_id: &str,
        gesture_id: &str,
        intent: &Vec<Vec2>,
        done_adding: bool,
    ) {
        self.log.push(format!(
            "set_intent({project_id}, {gesture_id}, {} points, done={done_adding})",
            intent.len()
        ));
    }

    fn move_gesture_point(
        &self,
        project_id: &str,
        gesture_id: &str,
        point_idx: usize,
        position: Vec2,
        done_moving: bool,
    ) {
        self.log.push(format!(
            "move_gesture_point({project_id}, {gesture_id}, {point_idx}, {}, done={done_moving})",
            fmt_point(position)
        ));
    }

    fn start_new_gesture(&self, project_id: &str, gesture_id: &str, intent: &Vec<Vec2>) {
        self.log.push(format!(
            "start_new_gesture({project_id}, {gesture_id}, {} points)",
            intent.len()
        ));
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
        project_id: &str,
        gesture_id: &str,
        point: Vec2,
        done_inserting: bool,
    ) {
        self.log.push(format!(
            "insert_control_point({project_id}, {gesture_id}, {}, done={done_inserting})",
            fmt_point(point)
        ));
    }

    fn split_gesture(&self, project_id: &str, gesture_id: &str, point: Vec2, done_splitting: bool) {
        self.log.push(format!(
            "split_gesture({project_id}, {gesture_id}, {}, done={done_splitting})",
            fmt_point(point)
        ));
    }

    fn set_n_lanes(
        &self,
        project_id: &str,
        gesture_id: &str,
        forward: u32,
        backward: u32,
        done_changing: bool,
    ) {
        self.log.push(format!(
            "set_n_lanes({project_id}, {gesture_id}, {forward}, {backward}, done={done_changing})"
        ));
    }
}

// ─── Renderer ────────────────────────────────────────────────────────

/// Counts draws and remembers the last frame's layer keys.
#[derive(Debug, Default)]
pub struct TraceRenderer {
    pub draws: u64,
    pub last_layers: Vec<String>,
    pub last_device_size: (u32, u32),
}

impl Renderer for TraceRenderer {
    fn render_frame(&mut self, frame: &FrameDraw<'_>) -> Result<DrawStatus, CapturedError> {
        self.draws += 1;
        self.last_layers = frame
            .layers
            .iter()
            .map(|layer| format!("{}/{}", layer.owner, layer.key))
            .collect();
        self.last_device_size = frame.uniforms.device_size();
        Ok(DrawStatus::Completed)
    }
}

// ─── Modules ─────────────────────────────────────────────────────────

/// Demo modules in paint order.
pub fn modules() -> Vec<Box<dyn DomainModule<RecordingEngine>>> {
    vec![
        Box::new(PlanningModule),
        Box::new(GroundLayer {
            name: "landuse",
            color: [0.85, 0.8, 0.7],
        }),
        Box::new(GroundLayer {
            name: "vegetation",
            color: [0.4, 0.6, 0.3],
        }),
        Box::new(TransportModule),
    ]
}

/// Subtree of the planning module: one gesture's control points.
#[derive(Debug, Clone, PartialEq)]
pub struct Planning {
    pub gesture_id: String,
    pub points: Vec<Vec2>,
}

impl Default for Planning {
    fn default() -> Self {
        Self {
            gesture_id: "gesture-1".into(),
            points: vec![Vec2::ZERO, Vec2::new(20.0, 0.0), Vec2::new(40.0, 0.0)],
        }
    }
}

/// Shows one gesture's control points and lets them be dragged.
pub struct PlanningModule;

impl PlanningModule {
    pub const NAME: &'static str = "planning";
}

impl DomainModule<RecordingEngine> for PlanningModule {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn initial_state(&self) -> Rc<dyn ModuleState> {
        Rc::new(Planning::default())
    }

    fn settings_spec(&self) -> Vec<(&str, SettingSpec)> {
        vec![(
            "controlPointRadius",
            SettingSpec::new(5.0, "Control Point Radius", 1.0, 20.0, 1.0),
        )]
    }

    fn build(&self, state: &SharedState, frame: &mut FrameBuilder<RecordingEngine>) {
        let Some(planning) = state.module::<Planning>(Self::NAME) else {
            return;
        };
        let radius = state
            .settings
            .get(Self::NAME, "controlPointRadius")
            .unwrap_or(5.0) as f32;

        let instances: Vec<Instance> = planning
            .points
            .iter()
            .map(|p| Instance::at(p.extend(0.0), [0.2, 0.4, 0.9]))
            .collect();
        frame.layer(RenderLayer::new("controlPoints").decal().batch(MeshId(1), instances));

        for (idx, center) in planning.points.iter().enumerate() {
            let gesture_id = planning.gesture_id.clone();
            frame.shape(
                format!("control-point-{idx}"),
                HitRegion::Circle {
                    center: *center,
                    radius,
                },
                move |event: &ShapeEvent, dispatch: &Dispatch<'_, RecordingEngine>| {
                    let Some(world) = event.world else {
                        return;
                    };
                    let position = world.truncate();
                    let done = match event.kind {
                        ShapeEventKind::Drag => false,
                        ShapeEventKind::PointerUp => true,
                        _ => return,
                    };
                    dispatch.set_state.try_update(move |s| {
                        s.update_module::<Planning>(PlanningModule::NAME, |planning| {
                            let mut next = planning.clone();
                            if let Some(point) = next.points.get_mut(idx) {
                                *point = position;
                            }
                            next
                        })
                    });
                    if let Some(engine) = dispatch.engine() {
                        engine.move_gesture_point(PROJECT, &gesture_id, idx, position, done);
                    }
                },
            );
        }
    }
}

/// Subtree of the transport module: lanes on the demo road.
#[derive(Debug, Clone, PartialEq)]
pub struct Transport {
    pub lanes_forward: u32,
    pub lanes_backward: u32,
}

impl Default for Transport {
    fn default() -> Self {
        Self {
            lanes_forward: 1,
            lanes_backward: 1,
        }
    }
}

/// A single road; pressing on it previews one more forward lane, releasing
/// commits it.
pub struct TransportModule;

impl TransportModule {
    pub const NAME: &'static str = "transport";
    const ROAD_ID: &'static str = "road-1";

    fn road() -> Vec<Vec2> {
        vec![Vec2::new(-100.0, 60.0), Vec2::new(100.0, 60.0)]
    }
}

impl DomainModule<RecordingEngine> for TransportModule {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn initial_state(&self) -> Rc<dyn ModuleState> {
        Rc::new(Transport::default())
    }

    fn build(&self, state: &SharedState, frame: &mut FrameBuilder<RecordingEngine>) {
        let Some(transport) = state.module::<Transport>(Self::NAME) else {
            return;
        };
        let road = Self::road();
        let lanes = transport.lanes_forward + transport.lanes_backward;
        let instances: Vec<Instance> = road
            .windows(2)
            .map(|seg| {
                let dir = (seg[1] - seg[0]).normalize_or_zero();
                Instance::new(((seg[0] + seg[1]) * 0.5).extend(0.0), dir, [0.3, 0.3, 0.3])
            })
            .collect();
        frame.layer(RenderLayer::new("lanes").batch(MeshId(2), instances));

        let forward = transport.lanes_forward;
        let backward = transport.lanes_backward;
        frame.shape(
            Self::ROAD_ID,
            HitRegion::Band {
                path: road,
                half_width: 3.0 * lanes as f32,
            },
            move |event: &ShapeEvent, dispatch: &Dispatch<'_, RecordingEngine>| {
                let done = match event.kind {
                    ShapeEventKind::PointerDown => false,
                    ShapeEventKind::PointerUp => true,
                    _ => return,
                };
                if let Some(engine) = dispatch.engine() {
                    engine.set_n_lanes(PROJECT, Self::ROAD_ID, forward + 1, backward, done);
                }
                if done {
                    dispatch.set_state.try_update(move |s| {
                        s.update_module::<Transport>(TransportModule::NAME, |t| Transport {
                            lanes_forward: forward + 1,
                            ..t.clone()
                        })
                    });
                }
            },
        );
    }
}

/// Layer-only module: one flat decal under everything else.
pub struct GroundLayer {
    pub name: &'static str,
    pub color: [f32; 3],
}

impl DomainModule<RecordingEngine> for GroundLayer {
    fn name(&self) -> &str {
        self.name
    }

    fn initial_state(&self) -> Rc<dyn ModuleState> {
        Rc::new(())
    }

    fn build(&self, _state: &SharedState, frame: &mut FrameBuilder<RecordingEngine>) {
        let patch = [Instance::at(Vec3::ZERO, self.color)];
        frame.layer(RenderLayer::new("ground").decal().batch(MeshId(0), patch));
    }
}
