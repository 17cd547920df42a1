use std::any::Any;
use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::rc::Rc;

use crate::camera::CameraState;
use crate::error::ShellError;
use crate::settings::Settings;

/// Opaque state subtree owned by one domain module.
///
/// Implemented for every `'static` type that is `Debug + PartialEq`, so a
/// module can keep any plain value as its subtree while the shell only ever
/// compares and replaces it.
pub trait ModuleState: Any + fmt::Debug {
    fn as_any(&self) -> &dyn Any;
    fn eq_state(&self, other: &dyn ModuleState) -> bool;
}

impl<T: Any + fmt::Debug + PartialEq> ModuleState for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn eq_state(&self, other: &dyn ModuleState) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .is_some_and(|other| other == self)
    }
}

// ─── Shell-owned subtrees ────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SystemStatus {
    pub networking_turns: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderingState {
    pub enabled: bool,
}

impl Default for RenderingState {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MenuState {
    pub settings_open: bool,
}

// ─── Shared State ────────────────────────────────────────────────────

/// The single application-state tree.
///
/// Never mutated in place: every change produces a new tree. Cloning is
/// cheap because module subtrees are reference counted.
#[derive(Clone, Debug)]
pub struct SharedState {
    modules: BTreeMap<String, Rc<dyn ModuleState>>,
    pub system: SystemStatus,
    pub rendering: RenderingState,
    pub camera: CameraState,
    pub menu: MenuState,
    pub settings: Settings,
    pub ui_mode: Option<String>,
}

impl SharedState {
    pub fn new(settings: Settings, camera: CameraState) -> Self {
        Self {
            modules: BTreeMap::new(),
            system: SystemStatus::default(),
            rendering: RenderingState::default(),
            camera,
            menu: MenuState::default(),
            settings,
            ui_mode: None,
        }
    }

    pub(crate) fn seed_module(
        &mut self,
        name: &str,
        state: Rc<dyn ModuleState>,
    ) -> Result<(), ShellError> {
        if self.modules.contains_key(name) {
            return Err(ShellError::DuplicateModule(name.to_string()));
        }
        self.modules.insert(name.to_string(), state);
        Ok(())
    }

    /// Typed view of a module subtree.
    pub fn module<T: 'static>(&self, name: &str) -> Option<&T> {
        self.modules
            .get(name)
            .and_then(|state| state.as_ref().as_any().downcast_ref::<T>())
    }

    pub fn module_state(&self, name: &str) -> Option<&Rc<dyn ModuleState>> {
        self.modules.get(name)
    }

    /// New tree with the subtree `name` replaced wholesale.
    pub fn with_module<T: ModuleState>(&self, name: &str, value: T) -> SharedState {
        self.with_module_state(name, Rc::new(value))
    }

    pub fn with_module_state(&self, name: &str, value: Rc<dyn ModuleState>) -> SharedState {
        let mut next = self.clone();
        next.modules.insert(name.to_string(), value);
        next
    }

    /// New tree with the existing subtree `name` replaced by `value`.
    pub fn replace_module(
        &self,
        name: &str,
        value: Rc<dyn ModuleState>,
    ) -> Result<SharedState, ShellError> {
        if !self.modules.contains_key(name) {
            return Err(ShellError::MissingModule(name.to_string()));
        }
        Ok(self.with_module_state(name, value))
    }

    /// New tree with `f` applied to the typed subtree `name`.
    pub fn update_module<T: ModuleState>(
        &self,
        name: &str,
        f: impl FnOnce(&T) -> T,
    ) -> Result<SharedState, ShellError> {
        let current = self
            .module::<T>(name)
            .ok_or_else(|| ShellError::MissingModule(name.to_string()))?;
        Ok(self.with_module(name, f(current)))
    }

    pub fn with_camera(&self, camera: CameraState) -> SharedState {
        SharedState {
            camera,
            ..self.clone()
        }
    }

    pub fn with_rendering_enabled(&self, enabled: bool) -> SharedState {
        SharedState {
            rendering: RenderingState { enabled },
            ..self.clone()
        }
    }

    pub fn with_settings_open(&self, open: bool) -> SharedState {
        SharedState {
            menu: MenuState { settings_open: open },
            ..self.clone()
        }
    }

    pub fn with_ui_mode(&self, mode: Option<String>) -> SharedState {
        SharedState {
            ui_mode: mode,
            ..self.clone()
        }
    }

    pub fn with_networking_turns(&self, turns: impl Into<String>) -> SharedState {
        SharedState {
            system: SystemStatus {
                networking_turns: turns.into(),
            },
            ..self.clone()
        }
    }

    pub fn with_settings(&self, settings: Settings) -> SharedState {
        SharedState {
            settings,
            ..self.clone()
        }
    }
}

impl PartialEq for SharedState {
    fn eq(&self, other: &Self) -> bool {
        self.system == other.system
            && self.rendering == other.rendering
            && self.camera == other.camera
            && self.menu == other.menu
            && self.settings == other.settings
            && self.ui_mode == other.ui_mode
            && self.modules.len() == other.modules.len()
            && self.modules.iter().all(|(name, state)| {
                other
                    .modules
                    .get(name)
                    .is_some_and(|o| Rc::ptr_eq(state, o) || state.eq_state(o.as_ref()))
            })
    }
}

// ─── Store ───────────────────────────────────────────────────────────

type Updater = Box<dyn FnOnce(&SharedState) -> Result<SharedState, ShellError>>;

/// Cloneable handle for submitting updates from input handlers, engine
/// callbacks and shape handlers. Updates are applied in submission order the
/// next time the store is flushed.
#[derive(Clone, Default)]
pub struct SetSharedState {
    queue: Rc<RefCell<VecDeque<Updater>>>,
}

impl SetSharedState {
    pub fn update(&self, f: impl FnOnce(&SharedState) -> SharedState + 'static) {
        self.queue.borrow_mut().push_back(Box::new(move |s| Ok(f(s))));
    }

    pub fn try_update(
        &self,
        f: impl FnOnce(&SharedState) -> Result<SharedState, ShellError> + 'static,
    ) {
        self.queue.borrow_mut().push_back(Box::new(f));
    }

    pub fn pending(&self) -> usize {
        self.queue.borrow().len()
    }
}

impl fmt::Debug for SetSharedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SetSharedState")
            .field("pending", &self.pending())
            .finish()
    }
}

/// Owner of the shared tree. Only replaces it wholesale.
pub struct StateStore {
    current: SharedState,
    revision: u64,
    setter: SetSharedState,
}

impl StateStore {
    pub fn new(initial: SharedState) -> Self {
        Self {
            current: initial,
            revision: 0,
            setter: SetSharedState::default(),
        }
    }

    pub fn state(&self) -> &SharedState {
        &self.current
    }

    /// Bumped on every applied update; consumers re-render when it changes.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn setter(&self) -> SetSharedState {
        self.setter.clone()
    }

    pub fn update(&mut self, f: impl FnOnce(&SharedState) -> SharedState) {
        let next = f(&self.current);
        self.replace(next);
    }

    /// Applies `f` unless it fails, in which case the tree is left untouched.
    pub fn try_update(
        &mut self,
        f: impl FnOnce(&SharedState) -> Result<SharedState, ShellError>,
    ) -> Result<(), ShellError> {
        let next = f(&self.current)?;
        self.replace(next);
        Ok(())
    }

    /// Apply every queued update in submission order. Returns the errors of
    /// rejected updates.
    pub fn flush(&mut self) -> Vec<ShellError> {
        let mut rejected = Vec::new();
        loop {
            let Some(updater) = self.setter.queue.borrow_mut().pop_front() else {
                break;
            };
            if let Err(err) = self.try_update(updater) {
                log::warn!("State update rejected: {err}");
                rejected.push(err);
            }
        }
        rejected
    }

    fn replace(&mut self, next: SharedState) {
        self.current = next;
        self.revision += 1;
    }
}
