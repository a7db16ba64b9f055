use ndarray::Array4;
use std::path::Path;
use std::sync::Mutex;
use tch::nn::ModuleT;
use tch::{CModule, Device, Kind, Tensor};

use super::{Classifier, InferenceError};

pub struct TorchScriptModel {
    module: Mutex<CModule>,
    device: Device,
}

impl TorchScriptModel {
    pub fn load(path: &Path) -> Result<Self, InferenceError> {
        let device = Device::cuda_if_available();
        let module = CModule::load_on_device(path, device)
            .map_err(|e| InferenceError::ModelLoad(format!("{}: {}", path.display(), e)))?;
        log::info!("Loaded TorchScript model from {} on {:?}", path.display(), device);
        Ok(Self {
            module: Mutex::new(module),
            device,
        })
    }
}

impl Classifier for TorchScriptModel {
    fn logits(&self, input: &Array4<f32>) -> Result<Vec<f32>, InferenceError> {
        let shape: Vec<i64> = input.shape().iter().map(|d| *d as i64).collect();
        let data: Vec<f32> = input.iter().copied().collect();
        let tensor = Tensor::from_slice(&data).view(shape.as_slice()).to_device(self.device);

        let module = self
            .module
            .lock()
            .map_err(|_| InferenceError::Execution("model lock poisoned".to_string()))?;
        let output = tch::no_grad(|| module.forward_t(&tensor, false));

        let flat = output.to_kind(Kind::Float).to_device(Device::Cpu).view([-1]);
        let len = flat.size()[0] as usize;
        let mut logits = vec![0.0f32; len];
        flat.copy_data(&mut logits, len);
        Ok(logits)
    }
}
