// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! helm-math: 2D vector math for robot geometry
//!
//! Field-relative geometry helpers shared by drive code and path following.
//! The coordinate convention puts +y forward and +x right, so angles are
//! measured from the +y axis.

pub mod vec2;

pub use vec2::Vec2;
