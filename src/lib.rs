//! MaskCam - face-tracked mask overlay for your webcam
//!
//! Captures camera input, detects one face's landmarks via ONNX Runtime,
//! and composites a randomly chosen glasses or crown image over the
//! mirrored preview, repositioned every frame.

pub mod app;
pub mod camera;
pub mod config;
pub mod face;
pub mod mask;
pub mod overlay;

pub use app::App;
