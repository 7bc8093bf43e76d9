/// Instruction returned by a callback, applied by the loop after any output
/// bytes returned alongside it have been queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Action {
    /// Keep going.
    #[default]
    None,
    /// Close the connection the callback was invoked for.
    Close,
    /// Stop the whole server: every loop closes its connections and exits.
    Shutdown,
}

impl Action {
    pub fn is_none(self) -> bool {
        self == Action::None
    }
}
