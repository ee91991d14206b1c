// Point - world coordinate value type shared by terrain and path queries

use std::fmt;
use std::ops::{Add, Mul, Sub};

/// A world-space position or offset (x, y, z).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Point { x, y, z }
    }

    pub fn length(&self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Unit vector pointing the same way. A zero point yields NaN components.
    pub fn direction(&self) -> Point {
        let length = self.length();
        Point::new(self.x / length, self.y / length, self.z / length)
    }

    /// Planar heading of the direction in radians, within [0, 2π)
    pub fn direction_orientation(&self) -> f32 {
        let dir = self.direction();
        let mut orientation = (dir.y as f64).atan2(dir.x as f64);
        if orientation < 0.0 {
            orientation += 2.0 * std::f64::consts::PI;
        }
        orientation as f32
    }

    /// World (x, y, z) to navmesh axis order (y, z, x)
    pub fn to_detour(&self) -> [f32; 3] {
        [self.y, self.z, self.x]
    }

    /// Navmesh axis order (y, z, x) back to world (x, y, z)
    pub fn from_detour(v: [f32; 3]) -> Point {
        Point::new(v[2], v[0], v[1])
    }
}

impl Add for Point {
    type Output = Point;

    fn add(self, rhs: Point) -> Point {
        Point::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Point {
    type Output = Point;

    fn sub(self, rhs: Point) -> Point {
        Point::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f32> for Point {
    type Output = Point;

    fn mul(self, scale: f32) -> Point {
        Point::new(self.x * scale, self.y * scale, self.z * scale)
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "X: {} | Y: {} | Z: {}", self.x, self.y, self.z)
    }
}
