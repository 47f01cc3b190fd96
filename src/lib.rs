//! Pose denoising and sampling with a learned pose manifold.
//!
//! A frozen distance field scores how far a body pose is from the manifold of
//! plausible poses. [denoise::MotionDenoiser] uses it as a prior to clean up
//! noisy motion sequences, and [sample::PoseProjectionSampler] projects random
//! poses onto the manifold.

pub mod body_model;
pub mod common;
pub mod config;
pub mod denoise;
pub mod error;
pub mod export;
pub mod math;
pub mod model;
pub mod motion;
pub mod params;
pub mod quaternion;
pub mod sample;
pub mod schedule;
