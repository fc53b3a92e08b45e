//! Math utilities and types
//!
//! Provides the math types consumed by batch preparation.

pub use nalgebra::{Matrix3, Matrix4, Vector3, Vector4};

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// 4D vector type
pub type Vec4 = Vector4<f32>;

/// 3x3 matrix type
pub type Mat3 = Matrix3<f32>;

/// 4x4 matrix type
pub type Mat4 = Matrix4<f32>;

/// Affine 3x4 matrix stored row-major, the upper three rows of a 4x4 transform
pub type Mat3x4 = [[f32; 4]; 3];

/// Extension trait for 4x4 matrices
pub trait Mat4Ext {
    /// Upper three rows in row-major order
    fn to_affine_rows(&self) -> Mat3x4;

    /// Upper-left 3x3 block
    fn rotation_part(&self) -> Mat3;
}

impl Mat4Ext for Mat4 {
    fn to_affine_rows(&self) -> Mat3x4 {
        let mut rows = [[0.0; 4]; 3];
        for (r, row) in rows.iter_mut().enumerate() {
            for (c, value) in row.iter_mut().enumerate() {
                *value = self[(r, c)];
            }
        }
        rows
    }

    fn rotation_part(&self) -> Mat3 {
        self.fixed_view::<3, 3>(0, 0).clone_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_affine_rows_keep_translation_in_last_column() {
        let m = Mat4::new_translation(&Vec3::new(1.0, 2.0, 3.0));
        let rows = m.to_affine_rows();
        assert_relative_eq!(rows[0][3], 1.0);
        assert_relative_eq!(rows[1][3], 2.0);
        assert_relative_eq!(rows[2][3], 3.0);
        assert_relative_eq!(rows[0][0], 1.0);
        assert_relative_eq!(rows[1][0], 0.0);
    }

    #[test]
    fn test_rotation_part_of_scaled_matrix() {
        let m = Mat4::new_nonuniform_scaling(&Vec3::new(2.0, 3.0, 4.0));
        let r = m.rotation_part();
        assert_relative_eq!(r[(0, 0)], 2.0);
        assert_relative_eq!(r[(1, 1)], 3.0);
        assert_relative_eq!(r[(2, 2)], 4.0);
    }
}
