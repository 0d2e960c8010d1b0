//! Engine configuration

use std::time::Duration;

/// Options for the viewport loader
#[derive(Debug, Clone, PartialEq)]
pub struct LoaderConfig {
    /// Rows fetched beyond each edge of the visible area (default: 50)
    pub row_buffer: u32,
    /// Columns fetched beyond each edge of the visible area (default: 10)
    pub col_buffer: u16,
    /// Loaded ranges kept per sheet before they collapse into one bounding
    /// rectangle (default: 10)
    pub max_ranges: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            row_buffer: 50,
            col_buffer: 10,
            max_ranges: 10,
        }
    }
}

/// Options for an [`Engine`](crate::Engine)
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Viewport loader options
    pub loader: LoaderConfig,
    /// Quiet period after the last edit before pending saves are due (default: 2s)
    pub save_debounce: Duration,
    /// Passes one flush may run while new dirty cells keep arriving (default: 16)
    pub max_flush_passes: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            loader: LoaderConfig::default(),
            save_debounce: Duration::from_secs(2),
            max_flush_passes: 16,
        }
    }
}
