use std::cell::RefCell;
use std::collections::BTreeSet;
use std::future::Future;
use std::rc::Rc;

use cbshell_shared::GRASS;
use glam::Vec2;

use crate::camera::{
    self, CameraSettings, CameraState, MouseMoveInput, PendingInput, WheelInput, CAMERA,
};
use crate::diagnostics::{CapturedError, ErrorCategory};
use crate::engine::{Engine, EngineError, EngineLoader};
use crate::error::ShellError;
use crate::frame::{Dispatch, FrameContributions, ShapeKey};
use crate::input::{InputRouter, PointerInput, PointerKind};
use crate::module::{build_pass, DomainModule};
use crate::renderer::{FrameDraw, Renderer};
use crate::scheduler::{DrawStatus, FrameScheduler, FrameStats, SchedulerState, TickDecision};
use crate::settings::{self, SettingsRegistry, SettingsSource, RENDERING, RETINA_FACTOR};
use crate::state::{ModuleState, SetSharedState, SharedState, StateStore};

const DEFAULT_RETINA_FACTOR: f32 = 2.0;

/// The coordinator: owns the state store, the engine handle, the scheduler
/// and the last frame's contributions. Drawing itself is delegated to `R`.
pub struct Shell<E: Engine, R: Renderer> {
    store: StateStore,
    modules: Vec<Box<dyn DomainModule<E>>>,
    registry: SettingsRegistry,
    loader: EngineLoader<E>,
    scheduler: FrameScheduler,
    router: InputRouter,
    frame: FrameContributions<E>,
    renderer: R,
    reported: Vec<(ErrorCategory, CapturedError)>,
    frame_number: u64,
}

impl<E: Engine + 'static, R: Renderer> Shell<E, R> {
    /// Merge the settings schema, load persisted values and seed every
    /// module's initial subtree. `modules` order is paint order.
    pub fn new(
        modules: Vec<Box<dyn DomainModule<E>>>,
        renderer: R,
        settings_source: &dyn SettingsSource,
    ) -> Result<Self, ShellError> {
        let mut seen = BTreeSet::new();
        for module in &modules {
            if !seen.insert(module.name()) {
                return Err(ShellError::DuplicateModule(module.name().to_string()));
            }
        }

        let mut registry = SettingsRegistry::new();
        registry.register(CAMERA, camera::settings_spec())?;
        registry.register(RENDERING, settings::rendering_spec())?;
        for module in &modules {
            let spec = module.settings_spec();
            if !spec.is_empty() {
                registry.register(module.name(), spec)?;
            }
        }
        let settings = registry.load(settings_source);

        let mut state = SharedState::new(settings, CameraState::default());
        for module in &modules {
            state.seed_module(module.name(), module.initial_state())?;
        }

        log::info!(
            "Shell created with {} domain modules: {}",
            modules.len(),
            modules.iter().map(|m| m.name()).collect::<Vec<_>>().join(", ")
        );

        Ok(Self {
            store: StateStore::new(state),
            modules,
            registry,
            loader: EngineLoader::new(),
            scheduler: FrameScheduler::new(),
            router: InputRouter::new(),
            frame: FrameContributions::default(),
            renderer,
            reported: Vec::new(),
            frame_number: 0,
        })
    }

    // ─── Lifecycle ───────────────────────────────────────────────────

    /// Bind every module's input handlers. The engine is not wired yet.
    pub fn mount(&mut self) -> Result<(), ShellError> {
        self.scheduler.mount()?;
        let set_state = self.store.setter();
        for module in &self.modules {
            module.bind_inputs(self.store.state(), &set_state);
        }
        self.flush();
        Ok(())
    }

    pub fn begin_engine_load(&mut self) -> Result<(), ShellError> {
        self.loader.begin()
    }

    /// Store the engine, start it and let the scheduler run. A failed load
    /// is reported as [`ErrorCategory::EngineLoad`]; the shell keeps going
    /// without an engine.
    pub fn resolve_engine(&mut self, result: Result<E, EngineError>) -> Result<(), ShellError> {
        if self.scheduler.state() != SchedulerState::WaitingForEngine {
            return Err(ShellError::InvalidTransition {
                from: self.scheduler.state(),
                event: "start",
            });
        }
        match self.loader.resolve(result) {
            Ok(_) => self.scheduler.engine_ready(),
            Err(ShellError::EngineLoad(EngineError::Load(message))) => {
                self.report(ErrorCategory::EngineLoad, CapturedError::new(message));
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Load the engine from `engine` and resolve the shell with it.
    pub async fn boot<F>(shell: Rc<RefCell<Self>>, engine: F) -> Result<(), ShellError>
    where
        F: Future<Output = Result<E, EngineError>>,
    {
        shell.borrow_mut().begin_engine_load()?;
        let result = engine.await;
        shell.borrow_mut().resolve_engine(result)
    }

    // ─── Frame ───────────────────────────────────────────────────────

    /// One host animation frame: apply queued updates, settle the camera,
    /// run the build pass and draw.
    pub fn on_frame(&mut self) -> TickDecision {
        self.flush();
        let decision = self.scheduler.begin_tick(self.store.state().rendering.enabled);
        if decision != TickDecision::Run {
            return decision;
        }
        self.frame_number += 1;

        if self.store.state().camera.pending != PendingInput::default() {
            let camera_settings = CameraSettings::from_settings(&self.store.state().settings);
            self.store
                .update(|s| s.with_camera(s.camera.settled(&camera_settings)));
        }

        let state = self.store.state();
        self.frame = build_pass(&self.modules, state);

        let retina_factor = state
            .settings
            .get(RENDERING, RETINA_FACTOR)
            .map_or(DEFAULT_RETINA_FACTOR, |v| v as f32);
        let [r, g, b] = GRASS;
        let draw = FrameDraw {
            layers: self.frame.layers(),
            uniforms: state.camera.projection().uniforms(retina_factor),
            clear_color: [r, g, b, 1.0],
        };
        let status = match self.renderer.render_frame(&draw) {
            Ok(status) => status,
            Err(err) => {
                self.report(ErrorCategory::Uncaught, err);
                DrawStatus::Completed
            }
        };
        self.scheduler.draw_issued(status);
        decision
    }

    pub fn acknowledge_draw(&mut self) {
        self.scheduler.acknowledge_draw();
    }

    // ─── Input ───────────────────────────────────────────────────────

    pub fn on_wheel(&mut self, wheel: WheelInput) {
        self.submit(move |s| s.with_camera(s.camera.with_wheel(wheel)));
    }

    pub fn on_mouse_move(&mut self, input: MouseMoveInput) -> Option<ShapeKey> {
        self.submit(move |s| s.with_camera(s.camera.with_mouse_move(input)));
        self.on_pointer(PointerInput {
            kind: PointerKind::Move,
            position: input.position,
            buttons: input.buttons,
        })
    }

    /// Route a pointer event to the current frame's shapes.
    pub fn on_pointer(&mut self, input: PointerInput) -> Option<ShapeKey> {
        self.flush();
        let set_state = self.store.setter();
        let state = self.store.state();
        let projection = state.camera.projection();
        let dispatch = Dispatch::new(state, &set_state, self.loader.handle());
        let routed = self.router.route(input, &projection, &self.frame, &dispatch);
        self.flush();
        routed
    }

    pub fn resize(&mut self, viewport: Vec2) {
        self.submit(move |s| s.with_camera(s.camera.with_viewport(viewport)));
    }

    pub fn set_rendering_enabled(&mut self, enabled: bool) {
        self.submit(move |s| s.with_rendering_enabled(enabled));
    }

    pub fn set_networking_turns(&mut self, turns: String) {
        self.submit(move |s| s.with_networking_turns(turns));
    }

    /// Replace a module's subtree from outside the module (the engine side).
    pub fn replace_module_state(&mut self, name: &str, value: Rc<dyn ModuleState>) {
        let name = name.to_string();
        self.store
            .setter()
            .try_update(move |s| s.replace_module(&name, value));
        self.flush();
    }

    pub fn set_settings_open(&mut self, open: bool) {
        self.submit(move |s| s.with_settings_open(open));
    }

    /// Change one setting, checked against its declaration.
    pub fn update_setting(
        &mut self,
        module: &str,
        option: &str,
        value: f64,
    ) -> Result<(), ShellError> {
        let spec = self
            .registry
            .spec(module, option)
            .ok_or_else(|| {
                ShellError::UpdateRejected(format!("unknown setting {module}.{option}"))
            })?;
        if !spec.accepts(value) {
            return Err(ShellError::UpdateRejected(format!(
                "{module}.{option} = {value} is outside {}..{}",
                spec.min, spec.max
            )));
        }
        let (module, option) = (module.to_string(), option.to_string());
        self.submit(move |s| s.with_settings(s.settings.with_value(&module, &option, value)));
        Ok(())
    }

    fn submit(&mut self, f: impl FnOnce(&SharedState) -> SharedState + 'static) {
        self.store.setter().update(f);
        self.flush();
    }

    /// Apply queued updates; rejected ones are reported.
    pub fn flush(&mut self) {
        for err in self.store.flush() {
            self.report(ErrorCategory::Uncaught, CapturedError::new(err.to_string()));
        }
    }

    // ─── Errors ──────────────────────────────────────────────────────

    pub fn report(&mut self, category: ErrorCategory, error: CapturedError) {
        self.reported.push((category, error));
    }

    /// Errors waiting to be handed to the capture pipeline.
    pub fn take_reported_errors(&mut self) -> Vec<(ErrorCategory, CapturedError)> {
        std::mem::take(&mut self.reported)
    }

    // ─── Accessors ───────────────────────────────────────────────────

    pub fn state(&self) -> &SharedState {
        self.store.state()
    }

    pub fn revision(&self) -> u64 {
        self.store.revision()
    }

    pub fn set_state(&self) -> SetSharedState {
        self.store.setter()
    }

    /// `None` until the engine has loaded and started.
    pub fn engine(&self) -> Option<Rc<E>> {
        self.loader.handle().cloned()
    }

    pub fn engine_failed(&self) -> bool {
        self.loader.failed()
    }

    pub fn settings_registry(&self) -> &SettingsRegistry {
        &self.registry
    }

    pub fn scheduler_state(&self) -> SchedulerState {
        self.scheduler.state()
    }

    pub fn frame_stats(&self) -> FrameStats {
        self.scheduler.stats()
    }

    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    pub fn frame(&self) -> &FrameContributions<E> {
        &self.frame
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut R {
        &mut self.renderer
    }
}
