#![forbid(unsafe_code)]

//! Polygon-masked particle overlays rendered on the CPU.
//!
//! The caller draws polygonal mask regions over a background image, assigns
//! each a compass flow direction, and ticks the simulation once per animation
//! frame; particles are seeded inside their mask and move according to a
//! selected motion preset (flow, swirl, bounce, random walk). File loading,
//! pointer input and frame export stay with the caller; the core consumes
//! decoded images and produces RGBA8 frames.

pub mod assets;
pub mod core;
pub mod direction;
pub mod error;
pub mod geometry;
pub mod mask;
pub mod overlay;
pub mod particle;
pub mod render;

pub use assets::{PreparedImage, decode_image};
pub use crate::core::{Affine, BezPath, Canvas, Circle, Point, Rect, Rgba8, Vec2};
pub use direction::Compass;
pub use error::{MaskflowError, MaskflowResult};
pub use geometry::{bounding_box, point_in_polygon};
pub use mask::{Mask, MaskAuthoring};
pub use overlay::Overlay;
pub use particle::{Particle, ParticleSystem, Preset, Settings, SettingsPatch};
pub use render::{CpuRenderer, DrawOp, FrameRgba, Scene, build_scene};
