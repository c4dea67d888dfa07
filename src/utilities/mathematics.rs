pub type Vector2 = glam::Vec2;
pub type Vector3 = glam::Vec3;

/// The tolerance for positions and normals until they are considered equal.
pub const POSITION_TOLERANCE: f32 = 0.0015;
/// The tolerance for texture coordinates and bone weights until they are considered equal.
pub const TEXTURE_TOLERANCE: f32 = 0.0025;

#[derive(Clone, Copy, Debug)]
pub struct BoundingBox {
    pub minimum: Vector3,
    pub maximum: Vector3,
}

impl Default for BoundingBox {
    /// Starts inverted so the first added point defines the box.
    fn default() -> Self {
        Self {
            minimum: Vector3::MAX,
            maximum: Vector3::MIN,
        }
    }
}

impl BoundingBox {
    pub fn is_valid(&self) -> bool {
        self.minimum.x <= self.maximum.x && self.minimum.y <= self.maximum.y && self.minimum.z <= self.maximum.z
    }

    pub fn add_point(&mut self, point: Vector3) {
        if !self.is_valid() {
            self.minimum = point;
            self.maximum = point;
            return;
        }

        self.minimum.x = self.minimum.x.min(point.x);
        self.minimum.y = self.minimum.y.min(point.y);
        self.minimum.z = self.minimum.z.min(point.z);

        self.maximum.x = self.maximum.x.max(point.x);
        self.maximum.y = self.maximum.y.max(point.y);
        self.maximum.z = self.maximum.z.max(point.z);
    }

    pub fn center(&self) -> Vector3 {
        (self.minimum + self.maximum) * 0.5
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounding_box_grows_from_invalid() {
        let mut bounds = BoundingBox::default();
        assert!(!bounds.is_valid());

        bounds.add_point(Vector3::new(1.0, 2.0, 3.0));
        bounds.add_point(Vector3::new(-1.0, 0.0, 5.0));

        assert!(bounds.is_valid());
        assert_eq!(bounds.minimum, Vector3::new(-1.0, 0.0, 3.0));
        assert_eq!(bounds.maximum, Vector3::new(1.0, 2.0, 5.0));
        assert_eq!(bounds.center(), Vector3::new(0.0, 1.0, 4.0));
    }
}
