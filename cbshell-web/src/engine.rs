use std::rc::Rc;

use glam::Vec2;
use thiserror::Error;

use crate::error::ShellError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("engine failed to load: {0}")]
    Load(String),
}

/// Capability interface of the simulation engine.
///
/// All world-mutating calls are fire-and-forget. The `done*` flags mark an
/// edit as in progress (`false`) or committed (`true`); they are forwarded
/// untouched.
pub trait Engine {
    /// Opaque gesture intent owned by the engine.
    type Intent: Clone;

    fn start(&self);

    fn set_intent(
        &self,
        project_id: &str,
        gesture_id: &str,
        intent: &Self::Intent,
        done_adding: bool,
    );

    fn move_gesture_point(
        &self,
        project_id: &str,
        gesture_id: &str,
        point_idx: usize,
        position: Vec2,
        done_moving: bool,
    );

    fn start_new_gesture(&self, project_id: &str, gesture_id: &str, intent: &Self::Intent);

    /// Pure: returns a new intent with `point` added.
    fn with_control_point_added(
        &self,
        intent: &Self::Intent,
        point: Vec2,
        add_to_end: bool,
    ) -> Self::Intent;

    fn insert_control_point(
        &self,
        project_id: &str,
        gesture_id: &str,
        point: Vec2,
        done_inserting: bool,
    );

    fn split_gesture(&self, project_id: &str, gesture_id: &str, point: Vec2, done_splitting: bool);

    fn set_n_lanes(
        &self,
        project_id: &str,
        gesture_id: &str,
        n_lanes_forward: u32,
        n_lanes_backward: u32,
        done_changing: bool,
    );
}

#[derive(Debug)]
pub enum LoadState<E> {
    Idle,
    Loading,
    Ready(Rc<E>),
    Failed(EngineError),
}

/// Obtains the engine handle exactly once.
#[derive(Debug)]
pub struct EngineLoader<E> {
    state: LoadState<E>,
}

impl<E> Default for EngineLoader<E> {
    fn default() -> Self {
        Self {
            state: LoadState::Idle,
        }
    }
}

impl<E: Engine> EngineLoader<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &LoadState<E> {
        &self.state
    }

    pub fn begin(&mut self) -> Result<(), ShellError> {
        match self.state {
            LoadState::Idle => {
                self.state = LoadState::Loading;
                log::info!("Loading simulation engine...");
                Ok(())
            }
            _ => Err(ShellError::EngineAlreadyLoading),
        }
    }

    /// Store the outcome of the load. On success the engine is started before
    /// the handle becomes visible through [`EngineLoader::handle`].
    pub fn resolve(&mut self, result: Result<E, EngineError>) -> Result<Rc<E>, ShellError> {
        if !matches!(self.state, LoadState::Loading) {
            return Err(ShellError::EngineNotLoading);
        }
        match result {
            Ok(engine) => {
                let handle = Rc::new(engine);
                self.state = LoadState::Ready(Rc::clone(&handle));
                handle.start();
                log::info!("Simulation engine started");
                Ok(handle)
            }
            Err(err) => {
                log::error!("{err}");
                self.state = LoadState::Failed(err.clone());
                Err(err.into())
            }
        }
    }

    pub fn handle(&self) -> Option<&Rc<E>> {
        match &self.state {
            LoadState::Ready(handle) => Some(handle),
            _ => None,
        }
    }

    pub fn failed(&self) -> bool {
        matches!(self.state, LoadState::Failed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{EngineCall, RecordingEngine};

    #[test]
    fn test_no_handle_before_resolve() {
        let mut loader = EngineLoader::<RecordingEngine>::new();
        assert!(loader.handle().is_none());
        loader.begin().unwrap();
        assert!(loader.handle().is_none());
    }

    #[test]
    fn test_resolve_starts_exactly_once() {
        let mut loader = EngineLoader::new();
        loader.begin().unwrap();
        let handle = loader.resolve(Ok(RecordingEngine::default())).unwrap();
        assert_eq!(handle.calls(), vec![EngineCall::Start]);

        let second = loader.resolve(Ok(RecordingEngine::default()));
        assert_eq!(second.unwrap_err(), ShellError::EngineNotLoading);
        assert_eq!(handle.calls(), vec![EngineCall::Start]);
        assert!(Rc::ptr_eq(loader.handle().unwrap(), &handle));
    }

    #[test]
    fn test_begin_twice_rejected() {
        let mut loader = EngineLoader::<RecordingEngine>::new();
        loader.begin().unwrap();
        assert_eq!(loader.begin().unwrap_err(), ShellError::EngineAlreadyLoading);
    }

    #[test]
    fn test_resolve_without_begin_rejected() {
        let mut loader = EngineLoader::new();
        let result = loader.resolve(Ok(RecordingEngine::default()));
        assert_eq!(result.unwrap_err(), ShellError::EngineNotLoading);
    }

    #[test]
    fn test_failed_load() {
        let mut loader = EngineLoader::<RecordingEngine>::new();
        loader.begin().unwrap();
        let err = loader
            .resolve(Err(EngineError::Load("404 cb_browser_ui.wasm".into())))
            .unwrap_err();
        assert!(matches!(err, ShellError::EngineLoad(_)));
        assert!(loader.failed());
        assert!(loader.handle().is_none());
    }
}
