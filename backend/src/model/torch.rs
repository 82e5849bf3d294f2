use std::path::Path;
use std::sync::Mutex;

use ndarray::Array4;
use tch::{CModule, Device, Kind, Tensor};

use super::{Classifier, ClassifierLoader, InferenceError, ModelError};
use crate::pipeline::config::ModelConfig;

/// Loads TorchScript modules: the configured sub-networks first, then the head.
pub struct TorchLoader {
    device: Device,
}

impl Default for TorchLoader {
    fn default() -> Self {
        Self {
            device: Device::cuda_if_available(),
        }
    }
}

impl TorchLoader {
    fn load_module(&self, path: &Path) -> Result<Mutex<CModule>, ModelError> {
        if !path.exists() {
            return Err(ModelError::MissingResource(path.to_path_buf()));
        }
        let module =
            CModule::load_on_device(path, self.device).map_err(|e| ModelError::Malformed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        log::info!("Loaded TorchScript module {}", path.display());
        Ok(Mutex::new(module))
    }
}

impl ClassifierLoader for TorchLoader {
    fn load(&self, config: &ModelConfig) -> Result<Box<dyn Classifier>, ModelError> {
        let stages = config
            .subnetworks
            .iter()
            .chain(std::iter::once(&config.path))
            .map(|path| self.load_module(path))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Box::new(TorchClassifier {
            stages,
            device: self.device,
            apply_softmax: config.apply_softmax,
        }))
    }
}

pub struct TorchClassifier {
    stages: Vec<Mutex<CModule>>,
    device: Device,
    apply_softmax: bool,
}

impl Classifier for TorchClassifier {
    fn infer(&self, input: &Array4<f32>) -> Result<Vec<f32>, InferenceError> {
        let shape: Vec<i64> = input.shape().iter().map(|d| *d as i64).collect();
        let data = input
            .as_slice()
            .ok_or_else(|| InferenceError::Preprocessing("input is not contiguous".into()))?;
        let mut tensor = Tensor::from_slice(data).view(shape.as_slice()).to_device(self.device);

        tch::no_grad(|| -> Result<(), InferenceError> {
            for stage in &self.stages {
                let module = stage
                    .lock()
                    .map_err(|_| InferenceError::Backend("model lock poisoned".into()))?;
                tensor = module
                    .forward_ts(&[&tensor])
                    .map_err(|e| InferenceError::Backend(e.to_string()))?;
            }
            Ok(())
        })?;

        if self.apply_softmax {
            tensor = tensor.softmax(-1, Kind::Float);
        }
        let output_flat = tensor
            .to_kind(Kind::Float)
            .to_device(Device::Cpu)
            .view([-1]);
        let num_elements = output_flat.size()[0] as usize;
        let mut output_vec = vec![0.0f32; num_elements];
        output_flat.copy_data(&mut output_vec, num_elements);
        Ok(output_vec)
    }
}
