//! Montage playback for skeletal animation.
//!
//! A [`Montage`] arranges clips on named slot tracks, splits its timeline
//! into linkable sections and carries notifies and branching points.
//! [`MontagePlayer`] owns the playing instances of one animated object and
//! [`SlotNode`] blends their output over a source pose.

#![forbid(unsafe_code)]

mod error;
mod math;
mod model;
mod runtime;

#[cfg(feature = "json")]
pub mod json;

pub use error::*;
pub use math::*;
pub use model::*;
pub use runtime::*;

#[cfg(all(test, feature = "json"))]
mod json_tests;
