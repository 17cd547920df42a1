use std::rc::Rc;

use crate::frame::{FrameBuilder, FrameContributions};
use crate::settings::SettingSpec;
use crate::state::{ModuleState, SetSharedState, SharedState};

/// An independently developed subsystem owning one subtree of the shared
/// state and contributing layers and shapes every frame.
pub trait DomainModule<E> {
    /// Key of this module's subtree and settings table.
    fn name(&self) -> &str;

    fn initial_state(&self) -> Rc<dyn ModuleState>;

    fn settings_spec(&self) -> Vec<(&str, SettingSpec)> {
        Vec::new()
    }

    /// Called once when the shell mounts.
    fn bind_inputs(&self, _state: &SharedState, _set_state: &SetSharedState) {}

    /// Contribute this frame's layers and shapes. Must only read `state`.
    fn build(&self, _state: &SharedState, _frame: &mut FrameBuilder<E>) {}
}

/// Run every module's `build` once, in declaration order.
pub fn build_pass<E>(
    modules: &[Box<dyn DomainModule<E>>],
    state: &SharedState,
) -> FrameContributions<E> {
    let mut builder = FrameBuilder::new();
    for module in modules {
        builder.set_owner(module.name());
        module.build(state, &mut builder);
    }
    builder.finish()
}
