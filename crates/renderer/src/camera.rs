use glam::Mat4;

/// Source of the view and projection matrices for the scene passes.
pub trait Camera {
    fn projection_matrix(&self) -> Mat4;
    fn view_matrix(&self) -> Mat4;

    /// `projection × view`, the order the scene shaders expect.
    fn view_projection(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }
}

impl<C: Camera + ?Sized> Camera for &C {
    fn projection_matrix(&self) -> Mat4 {
        (**self).projection_matrix()
    }

    fn view_matrix(&self) -> Mat4 {
        (**self).view_matrix()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Vec3, Vec4};

    struct Fixed {
        projection: Mat4,
        view: Mat4,
    }

    impl Camera for Fixed {
        fn projection_matrix(&self) -> Mat4 {
            self.projection
        }

        fn view_matrix(&self) -> Mat4 {
            self.view
        }
    }

    #[test]
    fn view_projection_applies_view_first() {
        let camera = Fixed {
            projection: Mat4::from_scale(Vec3::new(2.0, 2.0, 1.0)),
            view: Mat4::from_translation(Vec3::new(1.0, 0.0, 0.0)),
        };
        let point = camera.view_projection() * Vec4::new(0.0, 0.0, 0.0, 1.0);
        // translate then scale: x = (0 + 1) * 2
        assert!((point.x - 2.0).abs() < 1e-6);
    }
}
