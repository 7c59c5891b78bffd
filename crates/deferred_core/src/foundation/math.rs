//! Math utilities and types
//!
//! Matrices are column-major `f32` (nalgebra storage order), which is also the layout
//! shaders expect for `mat4` uniform members, so a matrix can be copied byte-for-byte
//! into a parameter buffer.

pub use nalgebra::{Matrix4, Vector3, Vector4};

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// 4D vector type
pub type Vec4 = Vector4<f32>;

/// 4x4 matrix type
pub type Mat4 = Matrix4<f32>;

/// 3D point type
pub type Point3 = nalgebra::Point3<f32>;

/// Size in bytes of one [`Mat4`]
pub const MAT4_SIZE: usize = std::mem::size_of::<[f32; 16]>();

/// Extension trait for Mat4 with projection helpers
pub trait Mat4Ext {
    /// Create a right-handed look-at view matrix
    fn look_at(eye: Vec3, target: Vec3, up: Vec3) -> Mat4;

    /// Create a right-handed orthographic projection mapping depth to `[0, 1]`
    fn orthographic(left: f32, right: f32, bottom: f32, top: f32, near: f32, far: f32) -> Mat4;

    /// Negate the Y scale so clip-space Y points down
    fn flip_y(self) -> Mat4;

    /// Column-major bytes of the matrix
    fn as_bytes(&self) -> &[u8];
}

impl Mat4Ext for Mat4 {
    fn look_at(eye: Vec3, target: Vec3, up: Vec3) -> Mat4 {
        let forward = (target - eye).normalize();
        let right = forward.cross(&up).normalize();
        let camera_up = right.cross(&forward);

        let translation = Mat4::new(
            1.0, 0.0, 0.0, -eye.x,
            0.0, 1.0, 0.0, -eye.y,
            0.0, 0.0, 1.0, -eye.z,
            0.0, 0.0, 0.0, 1.0,
        );

        let rotation = Mat4::new(
            right.x, right.y, right.z, 0.0,
            camera_up.x, camera_up.y, camera_up.z, 0.0,
            -forward.x, -forward.y, -forward.z, 0.0,
            0.0, 0.0, 0.0, 1.0,
        );

        rotation * translation
    }

    fn orthographic(left: f32, right: f32, bottom: f32, top: f32, near: f32, far: f32) -> Mat4 {
        let width = right - left;
        let height = top - bottom;
        let depth = far - near;

        Mat4::new(
            2.0 / width, 0.0, 0.0, -(right + left) / width,
            0.0, 2.0 / height, 0.0, -(top + bottom) / height,
            0.0, 0.0, -1.0 / depth, -near / depth,
            0.0, 0.0, 0.0, 1.0,
        )
    }

    fn flip_y(mut self) -> Mat4 {
        self[(1, 1)] *= -1.0;
        self
    }

    fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(self.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_look_at_moves_eye_to_origin() {
        let eye = Vec3::new(3.0, 4.0, 5.0);
        let view = Mat4::look_at(eye, Vec3::zeros(), Vec3::y());

        let transformed = view * Vec4::new(eye.x, eye.y, eye.z, 1.0);
        assert_relative_eq!(transformed, Vec4::new(0.0, 0.0, 0.0, 1.0), epsilon = 1e-4);
    }

    #[test]
    fn test_look_at_target_is_in_front() {
        let view = Mat4::look_at(Vec3::new(0.0, 0.0, 10.0), Vec3::zeros(), Vec3::y());
        let target = view * Vec4::new(0.0, 0.0, 0.0, 1.0);

        // Right-handed view space looks down -Z
        assert_relative_eq!(target.z, -10.0, epsilon = 1e-5);
    }

    #[test]
    fn test_orthographic_maps_box_to_unit_depth() {
        let projection = Mat4::orthographic(-2.0, 2.0, -1.0, 1.0, 0.0, 10.0);

        let near_corner = projection * Vec4::new(-2.0, -1.0, 0.0, 1.0);
        assert_relative_eq!(near_corner, Vec4::new(-1.0, -1.0, 0.0, 1.0), epsilon = 1e-6);

        let far_corner = projection * Vec4::new(2.0, 1.0, -10.0, 1.0);
        assert_relative_eq!(far_corner, Vec4::new(1.0, 1.0, 1.0, 1.0), epsilon = 1e-6);
    }

    #[test]
    fn test_flip_y_only_touches_y_scale() {
        let projection = Mat4::orthographic(-1.0, 1.0, -1.0, 1.0, 0.0, 1.0);
        let flipped = projection.flip_y();

        assert_relative_eq!(flipped[(1, 1)], -projection[(1, 1)]);
        assert_relative_eq!(flipped[(0, 0)], projection[(0, 0)]);
        assert_relative_eq!(flipped[(2, 2)], projection[(2, 2)]);
    }

    #[test]
    fn test_bytes_are_column_major() {
        let translation = Mat4::new_translation(&Vec3::new(7.0, 8.0, 9.0));
        let bytes = translation.as_bytes();
        assert_eq!(bytes.len(), MAT4_SIZE);

        let floats: &[f32] = bytemuck::cast_slice(bytes);
        assert_eq!(&floats[12..15], &[7.0, 8.0, 9.0]);
    }
}
