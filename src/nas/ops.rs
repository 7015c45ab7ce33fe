//! Super-network Operations
//!
//! The [`Op`] trait is the single capability the finalizer needs from an
//! operation: collapse itself into an [`OpDesc`] and report a rank. Ops that
//! must always survive finalization report no rank.

use std::fmt;

use ndarray::ArrayD;

use super::desc::{OpDesc, ParamMap, TrainableState};
use crate::device::Device;
use crate::error::Result;

/// A trainable tensor and the device it is resident on
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    value: ArrayD<f64>,
    device: Device,
}

impl Parameter {
    /// Create a host-resident parameter
    pub fn new(value: ArrayD<f64>) -> Self {
        Self {
            value,
            device: Device::Cpu,
        }
    }

    pub fn value(&self) -> &ArrayD<f64> {
        &self.value
    }

    pub fn value_mut(&mut self) -> &mut ArrayD<f64> {
        &mut self.value
    }

    pub fn device(&self) -> Device {
        self.device
    }

    /// Move the parameter to `device`
    pub fn to(&mut self, device: Device) {
        self.device = device;
    }

    /// Detached copy of the parameter under `name`
    pub fn snapshot(&self, name: &str) -> TrainableState {
        TrainableState::capture(name, &self.value)
    }
}

/// An operation of the super-network
pub trait Op: fmt::Debug + Send {
    /// Op name
    fn name(&self) -> &str;

    /// Collapse the op into its finalized descriptor and rank.
    ///
    /// `None` marks the op as required; `Some(rank)` makes it compete with
    /// its siblings, higher ranks first.
    fn finalize(&self) -> Result<(OpDesc, Option<f64>)>;

    /// Trainable parameters owned by this op
    fn parameters(&self) -> Vec<&Parameter> {
        Vec::new()
    }

    /// Mutable access to the parameters, used for device relocation
    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        Vec::new()
    }
}

/// A single concrete operation with named weights.
///
/// Always finalizes to itself with no rank.
#[derive(Debug, Clone)]
pub struct FixedOp {
    name: String,
    params: ParamMap,
    in_len: usize,
    weights: Vec<(String, Parameter)>,
}

impl FixedOp {
    /// Create a new op
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: ParamMap::new(),
            in_len: 1,
            weights: Vec::new(),
        }
    }

    /// Identity connection
    pub fn skip() -> Self {
        Self::new("skip_connect")
    }

    /// Zero op; never selected by a mixed op
    pub fn none() -> Self {
        Self::new("none")
    }

    /// Convolution with a dense weight of shape `[ch_out, ch_in, k, k]`
    pub fn conv(name: impl Into<String>, ch_in: usize, ch_out: usize, kernel_size: usize) -> Self {
        Self::new(name)
            .with_param("ch_in", ch_in)
            .with_param("ch_out", ch_out)
            .with_param("kernel_size", kernel_size)
            .with_weight(
                "weight",
                ArrayD::zeros(vec![ch_out, ch_in, kernel_size, kernel_size]),
            )
    }

    /// Set a hyperparameter
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Set the number of inputs
    pub fn with_in_len(mut self, in_len: usize) -> Self {
        self.in_len = in_len;
        self
    }

    /// Add a named weight
    pub fn with_weight(mut self, name: impl Into<String>, value: ArrayD<f64>) -> Self {
        self.weights.push((name.into(), Parameter::new(value)));
        self
    }

    /// Look up a weight by name
    pub fn weight(&self, name: &str) -> Option<&Parameter> {
        self.weights.iter().find(|(n, _)| n == name).map(|(_, p)| p)
    }

    /// Mutable lookup of a weight by name
    pub fn weight_mut(&mut self, name: &str) -> Option<&mut Parameter> {
        self.weights.iter_mut().find(|(n, _)| n == name).map(|(_, p)| p)
    }
}

impl Op for FixedOp {
    fn name(&self) -> &str {
        &self.name
    }

    fn finalize(&self) -> Result<(OpDesc, Option<f64>)> {
        let trainables = self
            .weights
            .iter()
            .map(|(name, param)| param.snapshot(name))
            .collect();

        let desc = OpDesc {
            name: self.name.clone(),
            params: self.params.clone(),
            in_len: self.in_len,
            trainables,
        };
        Ok((desc, None))
    }

    fn parameters(&self) -> Vec<&Parameter> {
        self.weights.iter().map(|(_, p)| p).collect()
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        self.weights.iter_mut().map(|(_, p)| p).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_op_is_required() {
        let op = FixedOp::conv("conv_3x3", 4, 8, 3).with_param("stride", 1);
        let (desc, rank) = op.finalize().unwrap();

        assert!(rank.is_none());
        assert_eq!(desc.name, "conv_3x3");
        assert_eq!(desc.params["ch_out"], serde_json::json!(8));
        assert_eq!(desc.trainables.len(), 1);
        assert_eq!(desc.trainables[0].shape, vec![8, 4, 3, 3]);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let mut op = FixedOp::new("linear").with_weight("weight", ArrayD::zeros(vec![2, 2]));
        let (desc, _) = op.finalize().unwrap();

        op.weight_mut("weight").unwrap().value_mut().fill(7.0);

        assert!(desc.trainables[0].values.iter().all(|&v| v == 0.0));
        assert!(op.weight("weight").unwrap().value().iter().all(|&v| v == 7.0));
    }

    #[test]
    fn test_parameter_relocation() {
        let mut op = FixedOp::conv("conv_1x1", 2, 2, 1);
        for param in op.parameters_mut() {
            param.to(Device::Cuda(0));
        }
        assert!(op.parameters().iter().all(|p| p.device() == Device::Cuda(0)));
    }

    #[test]
    fn test_parameterless_ops() {
        assert!(FixedOp::skip().parameters().is_empty());
        assert_eq!(FixedOp::none().name(), "none");
    }
}
