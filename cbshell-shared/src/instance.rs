use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec3};

/// Ground color the canvas is cleared to.
pub const GRASS: [f32; 3] = [0.79, 0.88, 0.61];

/// One instance of a batched mesh, laid out as the renderer's instance
/// buffer expects it (position, planar direction, color).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Instance {
    pub position: [f32; 3],
    pub direction: [f32; 2],
    pub color: [f32; 3],
}

impl Instance {
    pub fn new(position: Vec3, direction: Vec2, color: [f32; 3]) -> Self {
        Self {
            position: position.to_array(),
            direction: direction.to_array(),
            color,
        }
    }

    /// An unrotated instance at `position`.
    pub fn at(position: Vec3, color: [f32; 3]) -> Self {
        Self::new(position, Vec2::X, color)
    }
}

/// Per-frame camera uniforms handed to the renderer.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct FrameUniforms {
    pub view: [[f32; 4]; 4],
    pub perspective: [[f32; 4]; 4],
    pub viewport: [f32; 2],
    pub retina_factor: f32,
    pub _padding: f32,
}

impl FrameUniforms {
    pub fn new(view: Mat4, perspective: Mat4, viewport: Vec2, retina_factor: f32) -> Self {
        Self {
            view: view.to_cols_array_2d(),
            perspective: perspective.to_cols_array_2d(),
            viewport: viewport.to_array(),
            retina_factor,
            _padding: 0.0,
        }
    }

    /// Backing-store size of the canvas in device pixels.
    pub fn device_size(&self) -> (u32, u32) {
        (
            (self.viewport[0] * self.retina_factor).round().max(1.0) as u32,
            (self.viewport[1] * self.retina_factor).round().max(1.0) as u32,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_is_tightly_packed() {
        assert_eq!(std::mem::size_of::<Instance>(), 8 * 4);
        let instances = [Instance::at(Vec3::new(1.0, 2.0, 3.0), GRASS); 2];
        let floats: &[f32] = bytemuck::cast_slice(&instances);
        assert_eq!(floats.len(), 16);
        assert_eq!(&floats[0..3], &[1.0, 2.0, 3.0]);
        assert_eq!(&floats[3..5], &[1.0, 0.0]);
    }

    #[test]
    fn test_uniforms_size_is_16_byte_aligned() {
        assert_eq!(std::mem::size_of::<FrameUniforms>() % 16, 0);
    }

    #[test]
    fn test_device_size_applies_retina_factor() {
        let u = FrameUniforms::new(Mat4::IDENTITY, Mat4::IDENTITY, Vec2::new(800.0, 600.0), 2.0);
        assert_eq!(u.device_size(), (1600, 1200));
    }

    #[test]
    fn test_device_size_never_zero() {
        let u = FrameUniforms::new(Mat4::IDENTITY, Mat4::IDENTITY, Vec2::ZERO, 2.0);
        assert_eq!(u.device_size(), (1, 1));
    }
}
