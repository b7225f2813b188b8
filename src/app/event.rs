//! Window-system agnostic events fed to the layer stack.

/// Platform key code as reported by the windowing layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyCode(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// The drawable surface changed size, in physical pixels.
    Resized { width: u32, height: u32 },
    KeyPressed(KeyCode),
    KeyReleased(KeyCode),
    /// The user asked to close the application.
    Quit,
}
