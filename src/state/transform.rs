//! Transform shadow with lazily derived combined matrices.

use crate::d3d8::{Matrix, TransformStateType};

/// World, view, projection and texture matrices plus the derived products.
/// Writing any primary matrix marks the dependent products dirty; getters
/// recompute only when asked.
pub struct TransformState {
    pub world: Matrix,
    pub view: Matrix,
    pub projection: Matrix,
    pub texture: [Matrix; 8],

    world_view: Matrix,
    view_projection: Matrix,
    world_view_projection: Matrix,
    pub(crate) world_view_dirty: bool,
    pub(crate) view_projection_dirty: bool,
    pub(crate) world_view_projection_dirty: bool,
}

impl TransformState {
    pub fn new() -> TransformState {
        TransformState {
            world: Matrix::identity(),
            view: Matrix::identity(),
            projection: Matrix::identity(),
            texture: [Matrix::identity(); 8],
            world_view: Matrix::identity(),
            view_projection: Matrix::identity(),
            world_view_projection: Matrix::identity(),
            world_view_dirty: true,
            view_projection_dirty: true,
            world_view_projection_dirty: true,
        }
    }

    pub fn set(&mut self, which: TransformStateType, matrix: &Matrix) {
        match which {
            TransformStateType::World => {
                self.world = *matrix;
                self.world_view_dirty = true;
                self.world_view_projection_dirty = true;
            }
            TransformStateType::View => {
                self.view = *matrix;
                self.world_view_dirty = true;
                self.view_projection_dirty = true;
                self.world_view_projection_dirty = true;
            }
            TransformStateType::Projection => {
                self.projection = *matrix;
                self.view_projection_dirty = true;
                self.world_view_projection_dirty = true;
            }
            TransformStateType::Texture(i) => {
                self.texture[i & 7] = *matrix;
            }
        }
    }

    pub fn get(&self, which: TransformStateType) -> Matrix {
        match which {
            TransformStateType::World => self.world,
            TransformStateType::View => self.view,
            TransformStateType::Projection => self.projection,
            TransformStateType::Texture(i) => self.texture[i & 7],
        }
    }

    /// `current = matrix · current`, the D3D MultiplyTransform behaviour.
    pub fn multiply(&mut self, which: TransformStateType, matrix: &Matrix) {
        let combined = Matrix::multiply(matrix, &self.get(which));
        self.set(which, &combined);
    }

    pub fn world_view(&mut self) -> Matrix {
        if self.world_view_dirty {
            self.world_view = Matrix::multiply(&self.world, &self.view);
            self.world_view_dirty = false;
        }
        self.world_view
    }

    pub fn view_projection(&mut self) -> Matrix {
        if self.view_projection_dirty {
            self.view_projection = Matrix::multiply(&self.view, &self.projection);
            self.view_projection_dirty = false;
        }
        self.view_projection
    }

    pub fn world_view_projection(&mut self) -> Matrix {
        if self.world_view_projection_dirty {
            let world_view = self.world_view();
            self.world_view_projection = Matrix::multiply(&world_view, &self.projection);
            self.world_view_projection_dirty = false;
        }
        self.world_view_projection
    }

    /// Inverse-transpose of the upper 3x3 of world·view, for normals.
    /// Falls back to the plain upper 3x3 when the matrix is singular.
    pub fn normal_matrix(&mut self) -> [f32; 9] {
        let wv = self.world_view();
        let m = [
            [wv.m[0][0], wv.m[0][1], wv.m[0][2]],
            [wv.m[1][0], wv.m[1][1], wv.m[1][2]],
            [wv.m[2][0], wv.m[2][1], wv.m[2][2]],
        ];
        let det = m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
            - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
            + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0]);
        if det.abs() < 1e-12 {
            return [
                m[0][0], m[0][1], m[0][2], m[1][0], m[1][1], m[1][2], m[2][0], m[2][1], m[2][2],
            ];
        }
        let inv_det = 1.0 / det;
        // inverse, then transpose by writing rows as columns
        let inv = [
            [
                (m[1][1] * m[2][2] - m[1][2] * m[2][1]) * inv_det,
                (m[0][2] * m[2][1] - m[0][1] * m[2][2]) * inv_det,
                (m[0][1] * m[1][2] - m[0][2] * m[1][1]) * inv_det,
            ],
            [
                (m[1][2] * m[2][0] - m[1][0] * m[2][2]) * inv_det,
                (m[0][0] * m[2][2] - m[0][2] * m[2][0]) * inv_det,
                (m[0][2] * m[1][0] - m[0][0] * m[1][2]) * inv_det,
            ],
            [
                (m[1][0] * m[2][1] - m[1][1] * m[2][0]) * inv_det,
                (m[0][1] * m[2][0] - m[0][0] * m[2][1]) * inv_det,
                (m[0][0] * m[1][1] - m[0][1] * m[1][0]) * inv_det,
            ],
        ];
        [
            inv[0][0], inv[1][0], inv[2][0], inv[0][1], inv[1][1], inv[2][1], inv[0][2], inv[1][2],
            inv[2][2],
        ]
    }

    pub fn reset(&mut self) {
        *self = TransformState::new();
    }
}

impl Default for TransformState {
    fn default() -> Self {
        TransformState::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn translation(x: f32, y: f32, z: f32) -> Matrix {
        let mut m = Matrix::identity();
        m.m[3][0] = x;
        m.m[3][1] = y;
        m.m[3][2] = z;
        m
    }

    fn scale(s: f32) -> Matrix {
        let mut m = Matrix::identity();
        m.m[0][0] = s;
        m.m[1][1] = s;
        m.m[2][2] = s;
        m
    }

    #[test]
    fn world_write_dirties_dependent_products() {
        let mut t = TransformState::new();
        let _ = t.world_view_projection();
        assert!(!t.world_view_projection_dirty);
        assert!(!t.world_view_dirty);

        t.set(TransformStateType::World, &translation(1.0, 2.0, 3.0));
        assert!(t.world_view_dirty);
        assert!(t.world_view_projection_dirty);
        // view·projection does not depend on world
        assert!(!t.view_projection_dirty);
    }

    #[test]
    fn derived_product_matches_manual_multiply() {
        let mut t = TransformState::new();
        let world = translation(1.0, 0.0, 0.0);
        let view = scale(2.0);
        let projection = translation(0.0, 5.0, 0.0);
        t.set(TransformStateType::World, &world);
        t.set(TransformStateType::View, &view);
        t.set(TransformStateType::Projection, &projection);

        let expected = Matrix::multiply(&Matrix::multiply(&world, &view), &projection);
        assert_eq!(t.world_view_projection(), expected);
        assert_eq!(t.world_view(), Matrix::multiply(&world, &view));
    }

    #[test]
    fn getter_reuses_clean_product() {
        let mut t = TransformState::new();
        t.set(TransformStateType::World, &scale(3.0));
        let first = t.world_view_projection();
        // no writes in between: the cached product is handed back
        assert!(!t.world_view_projection_dirty);
        let second = t.world_view_projection();
        assert_eq!(first, second);
    }

    #[test]
    fn multiply_transform_left_multiplies() {
        let mut t = TransformState::new();
        t.set(TransformStateType::World, &translation(1.0, 0.0, 0.0));
        t.multiply(TransformStateType::World, &scale(2.0));
        let expected = Matrix::multiply(&scale(2.0), &translation(1.0, 0.0, 0.0));
        assert_eq!(t.get(TransformStateType::World), expected);
    }

    #[test]
    fn normal_matrix_of_uniform_scale() {
        let mut t = TransformState::new();
        t.set(TransformStateType::World, &scale(2.0));
        let n = t.normal_matrix();
        // inverse-transpose of 2·I is 0.5·I
        assert!((n[0] - 0.5).abs() < 1e-6);
        assert!((n[4] - 0.5).abs() < 1e-6);
        assert!((n[8] - 0.5).abs() < 1e-6);
        assert!(n[1].abs() < 1e-6);
    }
}
