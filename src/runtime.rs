//! Process-wide ONNX Runtime environment.
//!
//! Every session in the process shares one environment. Binaries call
//! [`init`] at startup and keep the guard alive while models are in use;
//! model construction also makes sure the library is loaded, so library users
//! who skip `init` still get a typed error instead of a panic.

use ort::environment::Environment;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::LoadError;

static ACTIVE_GUARDS: AtomicUsize = AtomicUsize::new(0);

#[cfg(target_os = "windows")]
const DEFAULT_DYLIB: &str = "onnxruntime.dll";
#[cfg(any(target_os = "macos", target_os = "ios"))]
const DEFAULT_DYLIB: &str = "libonnxruntime.dylib";
#[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "ios")))]
const DEFAULT_DYLIB: &str = "libonnxruntime.so";

/// Holds a handle on the shared environment; dropping it ends this user's
/// claim on the runtime.
#[must_use = "dropping the guard tears the runtime down"]
pub struct RuntimeGuard {
    env: Arc<Environment>,
}

impl RuntimeGuard {
    pub fn environment(&self) -> &Environment {
        &self.env
    }
}

/// Load the ONNX Runtime library and create the shared environment.
///
/// The library is taken from `dylib` when given, else `ORT_DYLIB_PATH`, else
/// the platform's default library name.
pub fn init(dylib: Option<&Path>) -> Result<RuntimeGuard, LoadError> {
    let env = acquire(dylib)?;
    let active = ACTIVE_GUARDS.fetch_add(1, Ordering::SeqCst) + 1;
    tracing::info!(active, "Inference runtime initialized");
    Ok(RuntimeGuard { env })
}

/// Whether any [`RuntimeGuard`] is currently alive
pub fn is_initialized() -> bool {
    ACTIVE_GUARDS.load(Ordering::SeqCst) > 0
}

/// Make sure the library is loaded and the environment exists, without
/// taking a guard. Cheap once the library has been loaded.
pub(crate) fn ensure_initialized(dylib: Option<&Path>) -> Result<(), LoadError> {
    acquire(dylib).map(|_| ())
}

fn acquire(dylib: Option<&Path>) -> Result<Arc<Environment>, LoadError> {
    let path = dylib_path(dylib);

    let builder = ort::init_from(&path).map_err(|e| LoadError::Runtime(e.to_string()))?;
    if !builder.with_name("fers").commit() {
        tracing::debug!("Inference environment already configured, reusing it");
    }

    Environment::current().map_err(|e| LoadError::Runtime(e.to_string()))
}

fn dylib_path(configured: Option<&Path>) -> PathBuf {
    if let Some(path) = configured {
        return path.to_path_buf();
    }
    match std::env::var_os("ORT_DYLIB_PATH") {
        Some(path) if !path.is_empty() => PathBuf::from(path),
        _ => PathBuf::from(DEFAULT_DYLIB),
    }
}

impl Drop for RuntimeGuard {
    fn drop(&mut self) {
        let remaining = ACTIVE_GUARDS.fetch_sub(1, Ordering::SeqCst) - 1;
        tracing::info!(remaining, "Inference runtime released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configured_dylib_wins() {
        let path = Path::new("/opt/ort/libonnxruntime.so");
        assert_eq!(dylib_path(Some(path)), path);
    }

    #[test]
    fn test_missing_library_is_an_error() {
        // Once a real library is loaded, later loads succeed regardless of path
        if std::env::var_os("ORT_DYLIB_PATH").is_some() {
            return;
        }

        let result = init(Some(Path::new("/nonexistent/libonnxruntime.so")));
        assert!(matches!(result, Err(LoadError::Runtime(_))));
    }

    #[test]
    fn test_init_drop_init() {
        if std::env::var_os("ORT_DYLIB_PATH").is_none() {
            return;
        }

        let first = init(None).unwrap();
        assert!(is_initialized());
        drop(first);

        let second = init(None).unwrap();
        assert!(is_initialized());
        drop(second);
    }
}
