use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Model file not found: {0}")]
    MissingModel(String),
    #[error("Failed to create session: {0}")]
    SessionCreation(String),
}

/// ONNX Runtime wrapper
#[derive(Debug, Default, Clone, Copy)]
pub struct OnnxRuntime;

impl OnnxRuntime {
    pub fn new() -> Self {
        Self
    }

    /// Create a new session from a model file (CPU-only)
    pub fn create_session<P: AsRef<Path>>(&self, model_path: P) -> Result<Session, RuntimeError> {
        let model_path = model_path.as_ref();
        if !model_path.is_file() {
            return Err(RuntimeError::MissingModel(model_path.display().to_string()));
        }

        log::info!("Using CPU execution provider");

        let builder = Session::builder()
            .map_err(|e| RuntimeError::SessionCreation(e.to_string()))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| RuntimeError::SessionCreation(e.to_string()))?;

        let session = builder.commit_from_file(model_path).map_err(|e| {
            RuntimeError::SessionCreation(format!(
                "Failed to load model from {:?}: {}",
                model_path, e
            ))
        })?;

        log::info!("Loaded ONNX model: {:?}", model_path);
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_model_is_reported_before_loading() {
        let runtime = OnnxRuntime::new();
        let result = runtime.create_session("models/does-not-exist.onnx");
        assert!(matches!(result, Err(RuntimeError::MissingModel(_))));
    }

    #[test]
    #[ignore] // Requires model file
    fn test_session_creation() {
        let runtime = OnnxRuntime::new();
        let session = runtime.create_session("models/openpose_coco.onnx");
        assert!(session.is_ok());
    }
}
