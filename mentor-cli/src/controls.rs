//! Control enablement state machine.
//!
//! Replaces ambient polling of the view with explicit events: the app feeds
//! in state changes (model loaded, error text present, generation started or
//! ended) and reads back which controls are currently enabled.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    ModelLoaded,
    /// Whether the error box currently holds any text.
    ErrorPresence(bool),
    GenerationStarted,
    /// Any terminal event: finish, failure, or user stop.
    GenerationEnded,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ControlsState {
    model_loaded: bool,
    error_present: bool,
    generating: bool,
}

impl ControlsState {
    pub fn apply(&mut self, event: ControlEvent) {
        match event {
            ControlEvent::ModelLoaded => self.model_loaded = true,
            ControlEvent::ErrorPresence(present) => self.error_present = present,
            ControlEvent::GenerationStarted => self.generating = true,
            ControlEvent::GenerationEnded => self.generating = false,
        }
    }

    /// Ask is available once a model is loaded, there is an error to ask
    /// about, and no generation is outstanding.
    pub fn ask_enabled(&self) -> bool {
        self.model_loaded && self.error_present && !self.generating
    }

    /// Stop is only meaningful while a generation is outstanding.
    pub fn stop_enabled(&self) -> bool {
        self.generating
    }

    /// Clear follows Ask's visibility, as in the original UI.
    pub fn clear_enabled(&self) -> bool {
        self.model_loaded && self.error_present
    }

    pub fn is_generating(&self) -> bool {
        self.generating
    }

    pub fn model_loaded(&self) -> bool {
        self.model_loaded
    }
}
