use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use cbshell_shared::Instance;
use glam::Vec2;
use js_sys::{Array, Float32Array, Function, Object, Promise, Reflect};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::{spawn_local, JsFuture};
use web_sys::{
    Document, Element, ErrorEvent, EventTarget, MouseEvent, PromiseRejectionEvent, WheelEvent,
};

use crate::camera::{MouseButtons, MouseMoveInput, WheelInput};
use crate::diagnostics::{CapturedError, ErrorCapture, ErrorCategory, StackTraceSymbolicator};
use crate::engine::{Engine, EngineError};
use crate::frame::{
    Dispatch, FrameBuilder, HitRegion, MeshId, RenderLayer, ShapeEvent, ShapeEventKind,
};
use crate::input::{PointerInput, PointerKind};
use crate::module::DomainModule;
use crate::renderer::{FrameDraw, Renderer};
use crate::scheduler::DrawStatus;
use crate::settings::{PersistedSettings, SettingSpec, SettingsError, SettingsSource, TomlSettings};
use crate::shell::Shell;
use crate::state::{ModuleState, SetSharedState, SharedState};

const SETTINGS_KEY: &str = "cbSettings";

thread_local! {
    /// The mounted app, if any. Set once by [`boot`].
    static MOUNTED: RefCell<Option<Weak<App>>> = const { RefCell::new(None) };
}

// ─── JS helpers ──────────────────────────────────────────────────────

fn prop(target: &JsValue, key: &str) -> JsValue {
    Reflect::get(target, &JsValue::from_str(key)).unwrap_or(JsValue::UNDEFINED)
}

fn prop_f32(target: &JsValue, key: &str) -> Option<f32> {
    prop(target, key).as_f64().map(|v| v as f32)
}

fn set(target: &Object, key: &str, value: &JsValue) {
    let _ = Reflect::set(target, &JsValue::from_str(key), value);
}

fn vec2(value: &JsValue) -> Option<Vec2> {
    let pair = value.dyn_ref::<Array>()?;
    Some(Vec2::new(pair.get(0).as_f64()? as f32, pair.get(1).as_f64()? as f32))
}

fn points(value: &JsValue) -> Vec<Vec2> {
    value
        .dyn_ref::<Array>()
        .map(|array| array.iter().filter_map(|p| vec2(&p)).collect())
        .unwrap_or_default()
}

fn js_point(point: Vec2) -> Array {
    Array::of2(&JsValue::from_f64(point.x.into()), &JsValue::from_f64(point.y.into()))
}

/// Call `target[name](...args)`. `Ok(None)` if there is no such method.
fn call_method(target: &JsValue, name: &str, args: &Array) -> Result<Option<JsValue>, JsValue> {
    match prop(target, name).dyn_into::<Function>() {
        Ok(method) => method.apply(target, args).map(Some),
        Err(_) => Ok(None),
    }
}

fn captured(value: &JsValue) -> CapturedError {
    match value.dyn_ref::<js_sys::Error>() {
        Some(error) => CapturedError {
            message: String::from(error.message()),
            stack: prop(value, "stack").as_string(),
        },
        None => CapturedError::new(value.as_string().unwrap_or_else(|| format!("{value:?}"))),
    }
}

/// Errors raised by JS callbacks outside any place that could return them.
type ErrorSink = Rc<RefCell<Vec<CapturedError>>>;

// ─── Engine ──────────────────────────────────────────────────────────

#[wasm_bindgen]
extern "C" {
    /// API object of the simulation engine module.
    #[derive(Debug, Clone)]
    pub type JsEngine;

    #[wasm_bindgen(method, catch, js_name = start)]
    fn js_start(this: &JsEngine) -> Result<(), JsValue>;

    #[wasm_bindgen(method, catch, js_name = set_intent)]
    fn js_set_intent(
        this: &JsEngine,
        project_id: &str,
        gesture_id: &str,
        intent: &JsValue,
        done_adding: bool,
    ) -> Result<(), JsValue>;

    #[wasm_bindgen(method, catch, js_name = move_gesture_point)]
    fn js_move_gesture_point(
        this: &JsEngine,
        project_id: &str,
        gesture_id: &str,
        point_idx: u32,
        position: &Array,
        done_moving: bool,
    ) -> Result<(), JsValue>;

    #[wasm_bindgen(method, catch, js_name = start_new_gesture)]
    fn js_start_new_gesture(
        this: &JsEngine,
        project_id: &str,
        gesture_id: &str,
        intent: &JsValue,
    ) -> Result<(), JsValue>;

    #[wasm_bindgen(method, catch, js_name = with_control_point_added)]
    fn js_with_control_point_added(
        this: &JsEngine,
        intent: &JsValue,
        point: &Array,
        add_to_end: bool,
    ) -> Result<JsValue, JsValue>;

    #[wasm_bindgen(method, catch, js_name = insert_control_point)]
    fn js_insert_control_point(
        this: &JsEngine,
        project_id: &str,
        gesture_id: &str,
        point: &Array,
        done_inserting: bool,
    ) -> Result<(), JsValue>;

    #[wasm_bindgen(method, catch, js_name = split_gesture)]
    fn js_split_gesture(
        this: &JsEngine,
        project_id: &str,
        gesture_id: &str,
        point: &Array,
        done_splitting: bool,
    ) -> Result<(), JsValue>;

    #[wasm_bindgen(method, catch, js_name = set_n_lanes)]
    fn js_set_n_lanes(
        this: &JsEngine,
        project_id: &str,
        gesture_id: &str,
        n_lanes_forward: u32,
        n_lanes_backward: u32,
        done_changing: bool,
    ) -> Result<(), JsValue>;
}

fn engine_call(name: &str, result: Result<(), JsValue>) {
    if let Err(e) = result {
        log::error!("Engine call {name} failed: {}", captured(&e));
    }
}

impl Engine for JsEngine {
    type Intent = JsValue;

    fn start(&self) {
        engine_call("start", self.js_start());
    }

    fn set_intent(&self, project_id: &str, gesture_id: &str, intent: &JsValue, done_adding: bool) {
        engine_call("set_intent", self.js_set_intent(project_id, gesture_id, intent, done_adding));
    }

    fn move_gesture_point(
        &self,
        project_id: &str,
        gesture_id: &str,
        point_idx: usize,
        position: Vec2,
        done_moving: bool,
    ) {
        let position = js_point(position);
        let idx = point_idx as u32;
        let result =
            self.js_move_gesture_point(project_id, gesture_id, idx, &position, done_moving);
        engine_call("move_gesture_point", result);
    }

    fn start_new_gesture(&self, project_id: &str, gesture_id: &str, intent: &JsValue) {
        engine_call("start_new_gesture", self.js_start_new_gesture(project_id, gesture_id, intent));
    }

    fn with_control_point_added(&self, intent: &JsValue, point: Vec2, add_to_end: bool) -> JsValue {
        self.js_with_control_point_added(intent, &js_point(point), add_to_end)
            .unwrap_or_else(|e| {
                log::error!("Engine call with_control_point_added failed: {}", captured(&e));
                intent.clone()
            })
    }

    fn insert_control_point(
        &self,
        project_id: &str,
        gesture_id: &str,
        point: Vec2,
        done_inserting: bool,
    ) {
        let point = js_point(point);
        let result = self.js_insert_control_point(project_id, gesture_id, &point, done_inserting);
        engine_call("insert_control_point", result);
    }

    fn split_gesture(&self, project_id: &str, gesture_id: &str, point: Vec2, done_splitting: bool) {
        let point = js_point(point);
        let result = self.js_split_gesture(project_id, gesture_id, &point, done_splitting);
        engine_call("split_gesture", result);
    }

    fn set_n_lanes(
        &self,
        project_id: &str,
        gesture_id: &str,
        n_lanes_forward: u32,
        n_lanes_backward: u32,
        done_changing: bool,
    ) {
        let result = self.js_set_n_lanes(
            project_id,
            gesture_id,
            n_lanes_forward,
            n_lanes_backward,
            done_changing,
        );
        engine_call("set_n_lanes", result);
    }
}

// ─── Domain modules ──────────────────────────────────────────────────

/// A domain module implemented in JS:
/// `{name, initialState, settingsSpec?, bindInputs?(setState), build?(subtree),
/// onShapeEvent?(subtree, event, engine)}`.
struct JsModule {
    name: Rc<str>,
    object: JsValue,
    settings: Vec<(String, SettingSpec)>,
    errors: ErrorSink,
}

impl JsModule {
    fn from_js(object: JsValue, errors: ErrorSink) -> Result<Self, JsValue> {
        let name = prop(&object, "name")
            .as_string()
            .ok_or_else(|| JsValue::from_str("domain module without a name"))?;
        let settings = Self::parse_settings(&prop(&object, "settingsSpec"));
        Ok(Self {
            name: Rc::from(name),
            object,
            settings,
            errors,
        })
    }

    fn parse_settings(spec: &JsValue) -> Vec<(String, SettingSpec)> {
        let Some(spec) = spec.dyn_ref::<Object>() else {
            return Vec::new();
        };
        Object::entries(spec)
            .iter()
            .filter_map(|entry| {
                let entry: Array = entry.unchecked_into();
                let option = entry.get(0).as_string()?;
                let record = entry.get(1);
                let number = |key| prop(&record, key).as_f64();
                Some((
                    option,
                    SettingSpec::new(
                        number("default")?,
                        prop(&record, "description").as_string().unwrap_or_default(),
                        number("min")?,
                        number("max")?,
                        number("step")?,
                    ),
                ))
            })
            .collect()
    }

    fn subtree(&self, state: &SharedState) -> JsValue {
        state
            .module::<JsValue>(&self.name)
            .cloned()
            .unwrap_or(JsValue::UNDEFINED)
    }

    fn parse_layer(value: &JsValue) -> Option<RenderLayer> {
        let mut layer = RenderLayer::new(prop(value, "key").as_string()?);
        if prop(value, "decal").is_truthy() {
            layer = layer.decal();
        }
        if let Some(batches) = prop(value, "batches").dyn_ref::<Array>() {
            for batch in batches.iter() {
                let mesh = MeshId(prop(&batch, "mesh").as_f64().unwrap_or_default() as u32);
                let instances = prop(&batch, "instances");
                let Some(floats) = instances.dyn_ref::<Float32Array>() else {
                    continue;
                };
                let floats = floats.to_vec();
                match bytemuck::try_cast_slice::<f32, Instance>(&floats) {
                    Ok(instances) => layer = layer.batch(mesh, instances.to_vec()),
                    Err(e) => log::warn!("Skipping batch of layer {}: {e}", layer.key),
                }
            }
        }
        Some(layer)
    }

    fn parse_region(value: &JsValue) -> Option<HitRegion> {
        let circle = prop(value, "circle");
        if !circle.is_undefined() {
            return Some(HitRegion::Circle {
                center: Vec2::new(prop_f32(&circle, "x")?, prop_f32(&circle, "y")?),
                radius: prop_f32(&circle, "radius")?,
            });
        }
        let polygon = prop(value, "polygon");
        if !polygon.is_undefined() {
            return Some(HitRegion::Polygon(points(&polygon)));
        }
        let band = prop(value, "band");
        if !band.is_undefined() {
            return Some(HitRegion::Band {
                path: points(&prop(&band, "path")),
                half_width: prop_f32(&band, "halfWidth")?,
            });
        }
        None
    }

    fn shape_event(event: &ShapeEvent) -> JsValue {
        let object = Object::new();
        let kind = match event.kind {
            ShapeEventKind::PointerDown => "down",
            ShapeEventKind::Drag => "drag",
            ShapeEventKind::PointerUp => "up",
            ShapeEventKind::Hover => "hover",
        };
        set(&object, "kind", &JsValue::from_str(kind));
        set(&object, "id", &JsValue::from_str(&event.key.id));
        let world = match event.world {
            Some(w) => Float32Array::from(&w.to_array()[..]).into(),
            None => JsValue::NULL,
        };
        set(&object, "world", &world);
        set(&object, "screen", &js_point(event.screen));
        set(&object, "buttons", &JsValue::from(event.buttons.0));
        object.into()
    }
}

impl DomainModule<JsEngine> for JsModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn initial_state(&self) -> Rc<dyn ModuleState> {
        Rc::new(prop(&self.object, "initialState"))
    }

    fn settings_spec(&self) -> Vec<(&str, SettingSpec)> {
        self.settings
            .iter()
            .map(|(option, spec)| (option.as_str(), spec.clone()))
            .collect()
    }

    /// Hands JS a `setState(subtreeOrUpdater)` function bound to this
    /// module's subtree.
    fn bind_inputs(&self, _state: &SharedState, set_state: &SetSharedState) {
        let name = Rc::clone(&self.name);
        let set_state = set_state.clone();
        let setter = Closure::<dyn FnMut(JsValue)>::new(move |next: JsValue| {
            let name = Rc::clone(&name);
            match next.dyn_into::<Function>() {
                Ok(updater) => set_state.try_update(move |s| {
                    let current = s.module::<JsValue>(&name).cloned().unwrap_or(JsValue::UNDEFINED);
                    let next = updater
                        .call1(&JsValue::NULL, &current)
                        .map_err(|e| crate::ShellError::UpdateRejected(captured(&e).message))?;
                    Ok(s.with_module(&name, next))
                }),
                Err(value) => set_state.update(move |s| s.with_module(&name, value)),
            }
        });
        let args = Array::of1(setter.as_ref());
        if let Err(e) = call_method(&self.object, "bindInputs", &args) {
            self.errors.borrow_mut().push(captured(&e));
        }
        // Lives as long as the page.
        setter.forget();
    }

    fn build(&self, state: &SharedState, frame: &mut FrameBuilder<JsEngine>) {
        let output = match call_method(&self.object, "build", &Array::of1(&self.subtree(state))) {
            Ok(Some(output)) => output,
            Ok(None) => return,
            Err(e) => {
                self.errors.borrow_mut().push(captured(&e));
                return;
            }
        };
        if let Some(layers) = prop(&output, "layers").dyn_ref::<Array>() {
            for layer in layers.iter().filter_map(|l| Self::parse_layer(&l)) {
                frame.layer(layer);
            }
        }
        let Some(shapes) = prop(&output, "shapes").dyn_ref::<Array>().cloned() else {
            return;
        };
        for shape in shapes.iter() {
            let id = prop(&shape, "id").as_string();
            let (Some(id), Some(region)) = (id, Self::parse_region(&shape)) else {
                continue;
            };
            let name = Rc::clone(&self.name);
            let object = self.object.clone();
            let errors = Rc::clone(&self.errors);
            frame.shape(id, region, move |event: &ShapeEvent, dispatch: &Dispatch<'_, JsEngine>| {
                let subtree = dispatch
                    .state
                    .module::<JsValue>(&name)
                    .cloned()
                    .unwrap_or(JsValue::UNDEFINED);
                let engine: JsValue = match dispatch.engine() {
                    Some(engine) => JsValue::from((**engine).clone()),
                    None => JsValue::UNDEFINED,
                };
                let args = Array::of3(&subtree, &Self::shape_event(event), &engine);
                match call_method(&object, "onShapeEvent", &args) {
                    Ok(Some(next)) if !next.is_undefined() => {
                        let name = Rc::clone(&name);
                        dispatch.set_state.update(move |s| s.with_module(&name, next));
                    }
                    Ok(_) => {}
                    Err(e) => errors.borrow_mut().push(captured(&e)),
                }
            });
        }
    }
}

// ─── Renderer ────────────────────────────────────────────────────────

/// JS renderer exposing
/// `renderFrame(layers, view, perspective, width, height, retinaFactor, clearColor)`.
/// Returning a promise keeps the draw in flight until it settles.
pub struct JsRenderer {
    target: JsValue,
    acknowledged: Rc<Cell<bool>>,
}

impl JsRenderer {
    fn layers(layers: &[RenderLayer]) -> Array {
        layers
            .iter()
            .map(|layer| {
                let object = Object::new();
                set(&object, "key", &JsValue::from_str(&layer.key));
                set(&object, "owner", &JsValue::from_str(&layer.owner));
                set(&object, "decal", &JsValue::from_bool(layer.decal));
                let batches: Array = layer
                    .batches
                    .iter()
                    .map(|batch| {
                        let b = Object::new();
                        set(&b, "mesh", &JsValue::from(batch.mesh.0));
                        let floats = bytemuck::cast_slice::<Instance, f32>(&batch.instances);
                        set(&b, "instances", &Float32Array::from(floats));
                        JsValue::from(b)
                    })
                    .collect();
                set(&object, "batches", &batches);
                JsValue::from(object)
            })
            .collect()
    }
}

impl Renderer for JsRenderer {
    fn render_frame(&mut self, frame: &FrameDraw<'_>) -> Result<DrawStatus, CapturedError> {
        let u = &frame.uniforms;
        let args = Array::new();
        args.push(&Self::layers(frame.layers));
        args.push(&Float32Array::from(bytemuck::cast_slice::<[f32; 4], f32>(&u.view)));
        args.push(&Float32Array::from(bytemuck::cast_slice::<[f32; 4], f32>(&u.perspective)));
        args.push(&JsValue::from(u.viewport[0]));
        args.push(&JsValue::from(u.viewport[1]));
        args.push(&JsValue::from(u.retina_factor));
        args.push(&Float32Array::from(&frame.clear_color[..]));

        let result = call_method(&self.target, "renderFrame", &args).map_err(|e| captured(&e))?;
        match result.and_then(|value| value.dyn_into::<Promise>().ok()) {
            Some(promise) => {
                let acknowledged = Rc::clone(&self.acknowledged);
                spawn_local(async move {
                    if let Err(e) = JsFuture::from(promise).await {
                        log::error!("Draw failed: {}", captured(&e));
                    }
                    acknowledged.set(true);
                });
                Ok(DrawStatus::Pending)
            }
            None => Ok(DrawStatus::Completed),
        }
    }
}

// ─── Settings ────────────────────────────────────────────────────────

/// Persisted settings kept as TOML text in `localStorage`.
struct LocalStorageSettings;

impl SettingsSource for LocalStorageSettings {
    fn load(&self) -> Result<PersistedSettings, SettingsError> {
        let storage = web_sys::window()
            .and_then(|w| w.local_storage().ok().flatten())
            .ok_or_else(|| SettingsError::Read("localStorage unavailable".into()))?;
        let text = storage
            .get_item(SETTINGS_KEY)
            .map_err(|e| SettingsError::Read(captured(&e).message))?;
        TomlSettings::new(text.unwrap_or_default()).load()
    }
}

// ─── Diagnostic panel ────────────────────────────────────────────────

type Capture = ErrorCapture<StackTraceSymbolicator>;

/// Mirrors the diagnostic log into `#errors` / `#errorsloading`.
struct Panel {
    capture: Rc<Capture>,
    rendered: Cell<usize>,
}

impl Panel {
    fn render(&self) {
        let Some(document) = web_sys::window().and_then(|w| w.document()) else {
            return;
        };
        let log = self.capture.log();
        if let Some(loading) = document.get_element_by_id("errorsloading") {
            loading.set_class_name(if log.loading() { "" } else { "loaded" });
        }
        let Some(errors) = document.get_element_by_id("errors") else {
            return;
        };
        if log.errors_happened() {
            errors.set_class_name("errorsHappened");
        }
        let records = log.records();
        for record in records.iter().skip(self.rendered.get()) {
            let _ = append_text(&document, &errors, "h2", &record.header());
            for frame in &record.stack_frames {
                let _ = append_text(&document, &errors, "div", &frame.to_string());
            }
            if let Some(note) = record.note {
                let _ = append_text(&document, &errors, "div", note);
            }
        }
        self.rendered.set(records.len());
    }
}

fn append_text(
    document: &Document,
    parent: &Element,
    tag: &str,
    text: &str,
) -> Result<(), JsValue> {
    let element = document.create_element(tag)?;
    element.set_text_content(Some(text));
    parent.append_child(&element)?;
    Ok(())
}

// ─── App ─────────────────────────────────────────────────────────────

type BrowserShell = Shell<JsEngine, JsRenderer>;

struct App {
    shell: Rc<RefCell<BrowserShell>>,
    set_state: SetSharedState,
    capture: Rc<Capture>,
    panel: Rc<Panel>,
    js_errors: ErrorSink,
    acknowledged: Rc<Cell<bool>>,
    running: Cell<bool>,
}

impl App {
    fn report(&self, category: ErrorCategory, error: CapturedError) {
        let task = self.capture.capture(category, error);
        let panel = Rc::clone(&self.panel);
        spawn_local(async move {
            task.await;
            panel.render();
        });
        self.panel.render();
    }

    /// Hand every error collected since the last frame to the capture
    /// pipeline.
    fn pump_errors(&self) {
        let reported = match self.shell.try_borrow_mut() {
            Ok(mut shell) => shell.take_reported_errors(),
            Err(_) => Vec::new(),
        };
        for (category, error) in reported {
            self.report(category, error);
        }
        let js_errors = std::mem::take(&mut *self.js_errors.borrow_mut());
        for error in js_errors {
            self.report(ErrorCategory::Uncaught, error);
        }
        for error in self.capture.drain_panics() {
            self.report(ErrorCategory::Uncaught, error);
        }
    }

    fn frame(&self) {
        with_shell(&self.shell, "frame", |shell| {
            if self.acknowledged.replace(false) {
                shell.acknowledge_draw();
            }
            shell.on_frame();
        });
        self.pump_errors();
    }
}

/// Run `f` on the shell unless it is already borrowed further up the
/// stack, in which case the event is dropped.
fn with_shell(shell: &RefCell<BrowserShell>, event: &str, f: impl FnOnce(&mut BrowserShell)) {
    match shell.try_borrow_mut() {
        Ok(mut shell) => f(&mut shell),
        Err(_) => log::warn!("Shell busy, dropping {event}"),
    }
}

/// Chain a hook after the capture hook that gets the panic onto the panel
/// without waiting for the next frame.
fn install_panel_hook() {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        previous(info);
        spawn_local(async {
            let app = MOUNTED.with(|mounted| mounted.borrow().as_ref().and_then(Weak::upgrade));
            if let Some(app) = app {
                app.pump_errors();
            }
        });
    }));
}

fn listen(
    target: &EventTarget,
    event: &str,
    handler: impl FnMut(web_sys::Event) + 'static,
) -> Result<(), JsValue> {
    let closure = Closure::<dyn FnMut(web_sys::Event)>::new(handler);
    target.add_event_listener_with_callback(event, closure.as_ref().unchecked_ref())?;
    closure.forget();
    Ok(())
}

fn install_error_listeners(app: &Rc<App>, window: &web_sys::Window) -> Result<(), JsValue> {
    let on_error = Rc::clone(app);
    listen(window, "error", move |event| {
        let Some(event) = event.dyn_ref::<ErrorEvent>() else {
            return;
        };
        let error = event.error();
        let caught = if error.is_undefined() || error.is_null() {
            CapturedError::new(event.message())
        } else {
            captured(&error)
        };
        on_error.report(ErrorCategory::Uncaught, caught);
    })?;

    let on_rejection = Rc::clone(app);
    listen(window, "unhandledrejection", move |event| {
        if let Some(event) = event.dyn_ref::<PromiseRejectionEvent>() {
            on_rejection.report(ErrorCategory::UnhandledRejection, captured(&event.reason()));
        }
    })
}

fn install_input_listeners(
    app: &Rc<App>,
    canvas: &EventTarget,
    window: &web_sys::Window,
) -> Result<(), JsValue> {
    let shell = Rc::clone(&app.shell);
    listen(canvas, "wheel", move |event| {
        if let Some(wheel) = event.dyn_ref::<WheelEvent>() {
            wheel.prevent_default();
            let input = WheelInput {
                delta: Vec2::new(wheel.delta_x() as f32, wheel.delta_y() as f32),
                shift: wheel.shift_key(),
            };
            with_shell(&shell, "wheel", |shell| shell.on_wheel(input));
        }
    })?;

    let shell = Rc::clone(&app.shell);
    listen(canvas, "mousemove", move |event| {
        if let Some(mouse) = event.dyn_ref::<MouseEvent>() {
            let input = MouseMoveInput {
                position: Vec2::new(mouse.offset_x() as f32, mouse.offset_y() as f32),
                movement: Vec2::new(mouse.movement_x() as f32, mouse.movement_y() as f32),
                buttons: MouseButtons(mouse.buttons()),
            };
            with_shell(&shell, "mousemove", |shell| {
                shell.on_mouse_move(input);
            });
        }
    })?;

    for (name, kind) in [("mousedown", PointerKind::Down), ("mouseup", PointerKind::Up)] {
        let shell = Rc::clone(&app.shell);
        listen(canvas, name, move |event| {
            if let Some(mouse) = event.dyn_ref::<MouseEvent>() {
                let input = PointerInput {
                    kind,
                    position: Vec2::new(mouse.offset_x() as f32, mouse.offset_y() as f32),
                    buttons: MouseButtons(mouse.buttons()),
                };
                with_shell(&shell, name, |shell| {
                    shell.on_pointer(input);
                });
            }
        })?;
    }

    // Right-drag rotates the camera.
    listen(canvas, "contextmenu", |event| event.prevent_default())?;

    let shell = Rc::clone(&app.shell);
    let resize_window = window.clone();
    listen(window, "resize", move |_| {
        if let Some(size) = window_size(&resize_window) {
            with_shell(&shell, "resize", |shell| shell.resize(size));
        }
    })
}

fn window_size(window: &web_sys::Window) -> Option<Vec2> {
    Some(Vec2::new(
        window.inner_width().ok()?.as_f64()? as f32,
        window.inner_height().ok()?.as_f64()? as f32,
    ))
}

fn start_frame_loop(app: Rc<App>) {
    let callback: Rc<RefCell<Option<Closure<dyn FnMut(f64)>>>> = Rc::new(RefCell::new(None));
    let next = Rc::clone(&callback);
    *callback.borrow_mut() = Some(Closure::new(move |_time: f64| {
        if !app.running.get() {
            next.borrow_mut().take();
            return;
        }
        if let Some(cb) = next.borrow().as_ref() {
            request_frame(cb);
        }
        app.frame();
    }));
    if let Some(cb) = callback.borrow().as_ref() {
        request_frame(cb);
    }
}

fn request_frame(callback: &Closure<dyn FnMut(f64)>) {
    if let Some(window) = web_sys::window() {
        let _ = window.request_animation_frame(callback.as_ref().unchecked_ref());
    }
}

/// Handle returned to the page. The engine calls back into the shell
/// through it, possibly while the shell is mid-frame, so every call only
/// queues an update for the next flush.
#[wasm_bindgen]
pub struct ShellHandle {
    app: Rc<App>,
}

#[wasm_bindgen]
impl ShellHandle {
    /// Replace a domain module's subtree.
    pub fn update_module(&self, name: String, subtree: JsValue) {
        self.app
            .set_state
            .try_update(move |s| s.replace_module(&name, Rc::new(subtree)));
    }

    pub fn set_networking_turns(&self, turns: String) {
        self.app
            .set_state
            .update(move |s| s.with_networking_turns(turns));
    }

    pub fn set_rendering_enabled(&self, enabled: bool) {
        self.app
            .set_state
            .update(move |s| s.with_rendering_enabled(enabled));
    }

    pub fn resize(&self, width: f32, height: f32) {
        let viewport = Vec2::new(width, height);
        self.app
            .set_state
            .update(move |s| s.with_camera(s.camera.with_viewport(viewport)));
    }

    /// Open or close the settings menu.
    pub fn set_settings_open(&self, open: bool) {
        with_shell(&self.app.shell, "set_settings_open", |shell| {
            shell.set_settings_open(open);
        });
    }

    /// Change one setting. Fails for an unknown option or an out-of-range
    /// value.
    pub fn update_setting(&self, module: &str, option: &str, value: f64) -> Result<(), JsValue> {
        let mut shell = self
            .app
            .shell
            .try_borrow_mut()
            .map_err(|_| JsValue::from_str("Shell busy"))?;
        shell
            .update_setting(module, option, value)
            .map_err(|e| JsValue::from_str(&e.to_string()))
    }

    /// Stop the frame loop and remove the panic hook.
    pub fn teardown(&self) {
        self.app.running.set(false);
        self.app.capture.teardown();
    }
}

/// Mount the shell on `canvas_id`, then load the engine from `engine`.
///
/// `modules` is the ordered list of JS domain modules; `renderer` draws.
#[wasm_bindgen]
pub fn boot(
    canvas_id: &str,
    engine: Promise,
    modules: Array,
    renderer: JsValue,
) -> Result<ShellHandle, JsValue> {
    if MOUNTED.with(|mounted| mounted.borrow().is_some()) {
        return Err("Shell already booted".into());
    }
    let window = web_sys::window().ok_or("No window")?;
    let document = window.document().ok_or("No document")?;
    let canvas = document
        .get_element_by_id(canvas_id)
        .ok_or("Canvas not found")?;

    let origin = window.location().origin().ok();
    let capture = ErrorCapture::new(StackTraceSymbolicator::new(origin));
    capture.install();
    install_panel_hook();

    let js_errors = ErrorSink::default();
    let modules = modules
        .iter()
        .map(|object| {
            JsModule::from_js(object, Rc::clone(&js_errors))
                .map(|m| Box::new(m) as Box<dyn DomainModule<JsEngine>>)
        })
        .collect::<Result<Vec<_>, _>>()?;

    let acknowledged = Rc::new(Cell::new(false));
    let renderer = JsRenderer {
        target: renderer,
        acknowledged: Rc::clone(&acknowledged),
    };
    let mut shell = Shell::new(modules, renderer, &LocalStorageSettings)
        .map_err(|e| JsValue::from_str(&e.to_string()))?;
    if let Some(size) = window_size(&window) {
        shell.resize(size);
    }
    shell.mount().map_err(|e| JsValue::from_str(&e.to_string()))?;

    let app = Rc::new(App {
        set_state: shell.set_state(),
        shell: Rc::new(RefCell::new(shell)),
        panel: Rc::new(Panel {
            capture: Rc::clone(&capture),
            rendered: Cell::new(0),
        }),
        capture,
        js_errors,
        acknowledged,
        running: Cell::new(true),
    });
    MOUNTED.with(|mounted| *mounted.borrow_mut() = Some(Rc::downgrade(&app)));

    install_error_listeners(&app, &window)?;
    install_input_listeners(&app, &canvas, &window)?;

    let loading = Rc::clone(&app);
    spawn_local(async move {
        let load = async {
            JsFuture::from(engine)
                .await
                .map(JsValue::unchecked_into::<JsEngine>)
                .map_err(|e| EngineError::Load(captured(&e).message))
        };
        if let Err(e) = Shell::boot(Rc::clone(&loading.shell), load).await {
            log::error!("Engine boot failed: {e}");
        }
        loading.pump_errors();
    });

    start_frame_loop(Rc::clone(&app));
    log::info!("Shell mounted on #{canvas_id}");
    Ok(ShellHandle { app })
}
