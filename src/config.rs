// Window, buffer and lock-directory options.

use std::path::PathBuf;

use crate::error::{Error, Result};

/// Smallest window ever used, regardless of configuration.
pub const MIN_WINDOW: usize = 16 * 1024;
/// Largest configurable window; keeps every window well inside the
/// format's 16 MiB hard limit.
pub const MAX_WINDOW: usize = 8 * 1024 * 1024;
pub const DEFAULT_WINDOW_FRACTION: f64 = 0.01;
pub const DEFAULT_BUFFER_SIZE: usize = 200_000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WindowSize {
    /// Fixed byte count, already clamped to `[MIN_WINDOW, MAX_WINDOW]`.
    Absolute(usize),
    /// Fraction of the source length in `(0, 1]`.
    Relative(f64),
}

#[derive(Debug, Clone)]
pub struct Options {
    pub window: WindowSize,
    /// Chunk size for scratch copies.
    pub buffer_size: usize,
    /// Where lock files live. Every process sharing chains must agree.
    pub lock_dir: PathBuf,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            window: WindowSize::Relative(DEFAULT_WINDOW_FRACTION),
            buffer_size: DEFAULT_BUFFER_SIZE,
            lock_dir: default_lock_dir(),
        }
    }
}

pub fn default_lock_dir() -> PathBuf {
    std::env::temp_dir().join("deltafs-locks")
}

impl Options {
    /// Build options from the two mutually exclusive window settings.
    pub fn from_window_args(abs: Option<u64>, rel: Option<f64>) -> Result<Self> {
        let mut opts = Self::default();
        match (abs, rel) {
            (Some(_), Some(_)) => {
                return Err(Error::Config(
                    "absolute and relative window sizes are mutually exclusive".into(),
                ));
            }
            (Some(bytes), None) => {
                let bytes = usize::try_from(bytes)
                    .unwrap_or(MAX_WINDOW)
                    .clamp(MIN_WINDOW, MAX_WINDOW);
                opts.window = WindowSize::Absolute(bytes);
                opts.buffer_size = bytes;
            }
            (None, Some(frac)) => {
                if !(frac > 0.0 && frac <= 1.0) {
                    return Err(Error::Config(format!(
                        "relative window size {frac} is outside (0, 1]"
                    )));
                }
                opts.window = WindowSize::Relative(frac);
            }
            (None, None) => {}
        }
        Ok(opts)
    }

    pub fn with_lock_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.lock_dir = dir.into();
        self
    }

    /// Window (and source block) size for a source of `source_len` bytes.
    pub fn window_size(&self, source_len: u64) -> usize {
        let wanted = match self.window {
            WindowSize::Absolute(bytes) => bytes,
            WindowSize::Relative(frac) => (source_len as f64 * frac) as usize,
        };
        wanted.clamp(MIN_WINDOW, MAX_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let o = Options::from_window_args(None, None).unwrap();
        assert_eq!(o.window, WindowSize::Relative(0.01));
        assert_eq!(o.buffer_size, DEFAULT_BUFFER_SIZE);
        assert_eq!(o.window_size(0), MIN_WINDOW);
        assert_eq!(o.window_size(100 * 1024 * 1024), 1_048_576);
        assert_eq!(o.window_size(u64::MAX), MAX_WINDOW);
    }

    #[test]
    fn both_window_settings_rejected() {
        assert!(matches!(
            Options::from_window_args(Some(1 << 20), Some(0.5)),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn relative_must_be_a_fraction() {
        for bad in [0.0, -0.1, 1.5, f64::NAN] {
            assert!(Options::from_window_args(None, Some(bad)).is_err(), "{bad}");
        }
        assert!(Options::from_window_args(None, Some(1.0)).is_ok());
    }

    #[test]
    fn absolute_is_clamped_and_sizes_the_buffer() {
        let o = Options::from_window_args(Some(100), None).unwrap();
        assert_eq!(o.window, WindowSize::Absolute(MIN_WINDOW));
        assert_eq!(o.buffer_size, MIN_WINDOW);
        let o = Options::from_window_args(Some(1 << 30), None).unwrap();
        assert_eq!(o.window_size(10), MAX_WINDOW);
    }
}
