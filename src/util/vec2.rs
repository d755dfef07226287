use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign, Mul, Sub, SubAssign};

/// 2D vector for map positions and movement.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    #[inline]
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    #[inline]
    pub fn length(&self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    #[inline]
    pub fn length_sq(&self) -> f32 {
        self.x * self.x + self.y * self.y
    }

    pub fn normalize(&self) -> Self {
        let len = self.length();
        if len > 0.0 {
            Self {
                x: self.x / len,
                y: self.y / len,
            }
        } else {
            Self::ZERO
        }
    }

    #[inline]
    pub fn distance_to(&self, other: Vec2) -> f32 {
        (*self - other).length()
    }

    #[inline]
    pub fn distance_sq_to(&self, other: Vec2) -> f32 {
        (*self - other).length_sq()
    }

    /// Step from `self` toward `target` by at most `max_step`.
    /// Arrives exactly at the target when it is closer than the step.
    pub fn step_toward(&self, target: Vec2, max_step: f32) -> Self {
        let to_target = target - *self;
        let dist = to_target.length();
        if dist <= max_step || dist <= f32::EPSILON {
            target
        } else {
            *self + to_target.normalize() * max_step
        }
    }

    pub fn clamp_to(&self, min: Vec2, max: Vec2) -> Self {
        Self {
            x: self.x.clamp(min.x, max.x),
            y: self.y.clamp(min.y, max.y),
        }
    }
}

impl Add for Vec2 {
    type Output = Vec2;
    #[inline]
    fn add(self, other: Vec2) -> Vec2 {
        Vec2::new(self.x + other.x, self.y + other.y)
    }
}

impl AddAssign for Vec2 {
    #[inline]
    fn add_assign(&mut self, other: Vec2) {
        self.x += other.x;
        self.y += other.y;
    }
}

impl Sub for Vec2 {
    type Output = Vec2;
    #[inline]
    fn sub(self, other: Vec2) -> Vec2 {
        Vec2::new(self.x - other.x, self.y - other.y)
    }
}

impl SubAssign for Vec2 {
    #[inline]
    fn sub_assign(&mut self, other: Vec2) {
        self.x -= other.x;
        self.y -= other.y;
    }
}

impl Mul<f32> for Vec2 {
    type Output = Vec2;
    #[inline]
    fn mul(self, scalar: f32) -> Vec2 {
        Vec2::new(self.x * scalar, self.y * scalar)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length() {
        let v = Vec2::new(3.0, 4.0);
        assert_eq!(v.length(), 5.0);
        assert_eq!(v.length_sq(), 25.0);
    }

    #[test]
    fn test_normalize() {
        let v = Vec2::new(10.0, 0.0).normalize();
        assert_eq!(v, Vec2::new(1.0, 0.0));
        assert_eq!(Vec2::ZERO.normalize(), Vec2::ZERO);
    }

    #[test]
    fn test_distance() {
        let a = Vec2::new(1.0, 1.0);
        let b = Vec2::new(4.0, 5.0);
        assert_eq!(a.distance_to(b), 5.0);
    }

    #[test]
    fn test_step_toward_overshoot_clamps_to_target() {
        let from = Vec2::new(0.0, 0.0);
        let target = Vec2::new(1.0, 0.0);
        assert_eq!(from.step_toward(target, 5.0), target);
    }

    #[test]
    fn test_step_toward_partial() {
        let from = Vec2::new(0.0, 0.0);
        let target = Vec2::new(10.0, 0.0);
        let stepped = from.step_toward(target, 2.0);
        assert!((stepped.x - 2.0).abs() < 1e-5);
        assert_eq!(stepped.y, 0.0);
    }

    #[test]
    fn test_clamp_to() {
        let v = Vec2::new(-5.0, 100.0);
        let clamped = v.clamp_to(Vec2::ZERO, Vec2::new(64.0, 64.0));
        assert_eq!(clamped, Vec2::new(0.0, 64.0));
    }
}
