// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! 2D vector type used for drivetrain and field geometry

use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign, Div, DivAssign, Mul, MulAssign, Neg, Sub, SubAssign};

/// A 2D vector of `f64` components.
///
/// Angles are measured from the +y axis (robot-forward), so `angle` of
/// `(0, 1)` is zero and `(1, 0)` is a quarter turn.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f64,
    pub y: f64,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean length of the vector
    pub fn length(self) -> f64 {
        self.dot(self).sqrt()
    }

    /// Angle from the +y axis, in radians
    pub fn angle(self) -> f64 {
        self.x.atan2(self.y)
    }

    /// Rotate counter-clockwise by the given angle in radians
    pub fn rotate_radians(self, radians: f64) -> Self {
        let c = radians.cos();
        let s = radians.sin();
        Vec2::new(self.x * c - self.y * s, self.x * s + self.y * c)
    }

    /// Rotate counter-clockwise by the given angle in degrees
    pub fn rotate_degrees(self, degrees: f64) -> Self {
        self.rotate_radians(degrees.to_radians())
    }

    pub fn dot(self, other: Vec2) -> f64 {
        self.x * other.x + self.y * other.y
    }

    /// Unit vector in the same direction. Undefined for the zero vector.
    pub fn normalized(self) -> Self {
        self / self.length()
    }

    /// Clockwise normal of the vector
    pub fn perpendicular(self) -> Self {
        Vec2::new(self.y, -self.x)
    }

    pub fn mirror_x_axis(self) -> Self {
        Vec2::new(-self.x, self.y)
    }

    pub fn mirror_y_axis(self) -> Self {
        Vec2::new(self.x, -self.y)
    }
}

impl Add for Vec2 {
    type Output = Vec2;

    fn add(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl AddAssign for Vec2 {
    fn add_assign(&mut self, rhs: Vec2) {
        *self = *self + rhs;
    }
}

impl Sub for Vec2 {
    type Output = Vec2;

    fn sub(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl SubAssign for Vec2 {
    fn sub_assign(&mut self, rhs: Vec2) {
        *self = *self - rhs;
    }
}

impl Neg for Vec2 {
    type Output = Vec2;

    fn neg(self) -> Vec2 {
        self * -1.0
    }
}

impl Mul<f64> for Vec2 {
    type Output = Vec2;

    fn mul(self, scalar: f64) -> Vec2 {
        Vec2::new(self.x * scalar, self.y * scalar)
    }
}

impl Mul<Vec2> for f64 {
    type Output = Vec2;

    fn mul(self, vector: Vec2) -> Vec2 {
        vector * self
    }
}

impl MulAssign<f64> for Vec2 {
    fn mul_assign(&mut self, scalar: f64) {
        *self = *self * scalar;
    }
}

impl Div<f64> for Vec2 {
    type Output = Vec2;

    fn div(self, scalar: f64) -> Vec2 {
        Vec2::new(self.x / scalar, self.y / scalar)
    }
}

impl DivAssign<f64> for Vec2 {
    fn div_assign(&mut self, scalar: f64) {
        *self = *self / scalar;
    }
}

impl std::fmt::Display for Vec2 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

#[cfg(test)]
#[path = "vec2_tests.rs"]
mod tests;
