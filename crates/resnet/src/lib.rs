//! Headless ResNet backbones for burn, with torchvision ImageNet weights.

mod block;
mod config;
mod resnet;
pub mod weights;

pub use block::{BasicBlock, Bottleneck, Downsample, LayerBlock};
pub use config::{BackboneConfig, BlockKind};
pub use resnet::{ResNet, ResNetRecord};
pub use weights::{Weights, WeightsMeta};
