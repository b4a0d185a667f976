use viz_marshal::{FullScreenMode, WindowGeometry, WindowStyle};

use crate::error::ScriptError;

/// Headless stand-in for a native window: it tracks what a real window
/// would show without drawing anything.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowState {
    pub title: String,
    pub geometry: WindowGeometry,
    pub style: WindowStyle,
    pub visible: bool,
    pub editor_visible: bool,
    pub full_screen: bool,
    pub user_full_screen_toggle: bool,
    open: bool,
}

impl WindowState {
    pub fn new(title: impl Into<String>, geometry: WindowGeometry, style: WindowStyle) -> Self {
        WindowState {
            title: title.into(),
            geometry,
            style,
            visible: true,
            editor_visible: false,
            full_screen: false,
            user_full_screen_toggle: false,
            open: true,
        }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn close(&mut self) {
        self.open = false;
        self.visible = false;
        self.editor_visible = false;
    }

    pub fn ensure_open(&self) -> Result<(), ScriptError> {
        if self.open {
            Ok(())
        } else {
            Err(ScriptError::Closed)
        }
    }

    pub fn set_visible(&mut self, visible: bool) -> Result<(), ScriptError> {
        self.ensure_open()?;
        self.visible = visible;
        Ok(())
    }

    pub fn set_editor_visible(&mut self, visible: bool) -> Result<(), ScriptError> {
        self.ensure_open()?;
        self.editor_visible = visible;
        Ok(())
    }

    pub fn set_geometry(&mut self, geometry: WindowGeometry) -> Result<(), ScriptError> {
        self.ensure_open()?;
        self.geometry = geometry;
        Ok(())
    }

    pub fn set_full_screen(&mut self, mode: FullScreenMode) -> Result<(), ScriptError> {
        self.ensure_open()?;
        self.full_screen = mode.enable;
        self.user_full_screen_toggle = mode.user_toggle;
        Ok(())
    }
}
