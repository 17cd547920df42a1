use glam::{Mat4, Vec2, Vec3};

/// Below this magnitude a ray is treated as parallel to the ground plane.
const PARALLEL_EPSILON: f32 = 1e-6;

/// Convert a screen position (pixels, origin top-left, y down) to normalized
/// device coordinates.
pub fn screen_to_ndc(screen: Vec2, viewport: Vec2) -> Vec2 {
    Vec2::new(
        2.0 * screen.x / viewport.x - 1.0,
        1.0 - 2.0 * screen.y / viewport.y,
    )
}

/// Inverse of [`screen_to_ndc`].
pub fn ndc_to_screen(ndc: Vec2, viewport: Vec2) -> Vec2 {
    Vec2::new(
        (ndc.x + 1.0) * 0.5 * viewport.x,
        (1.0 - ndc.y) * 0.5 * viewport.y,
    )
}

/// Eye position of an orbit camera around `target` (z-up world).
pub fn orbit_eye(target: Vec3, distance: f32, yaw: f32, pitch: f32) -> Vec3 {
    let horizontal = distance * pitch.cos();
    target
        + Vec3::new(
            horizontal * yaw.cos(),
            horizontal * yaw.sin(),
            distance * pitch.sin(),
        )
}

/// Unproject an NDC position into a world-space ray `(origin, direction)`
/// using the inverse of a GL-style view-projection matrix.
pub fn ndc_ray(inv_view_proj: &Mat4, ndc: Vec2) -> (Vec3, Vec3) {
    let near = inv_view_proj.project_point3(Vec3::new(ndc.x, ndc.y, -1.0));
    let far = inv_view_proj.project_point3(Vec3::new(ndc.x, ndc.y, 1.0));
    (near, (far - near).normalize_or_zero())
}

/// Intersect a ray with the horizontal plane `z = height`.
/// Returns `None` when the ray is parallel to the plane or points away from it.
pub fn intersect_ground(origin: Vec3, direction: Vec3, height: f32) -> Option<Vec3> {
    if direction.z.abs() < PARALLEL_EPSILON {
        return None;
    }
    let t = (height - origin.z) / direction.z;
    if t < 0.0 {
        return None;
    }
    Some(origin + direction * t)
}

/// Transform a world point to NDC. `None` if the point is behind the eye.
pub fn world_to_ndc(view_proj: &Mat4, world: Vec3) -> Option<Vec3> {
    let clip = *view_proj * world.extend(1.0);
    if clip.w <= PARALLEL_EPSILON {
        return None;
    }
    Some(clip.truncate() / clip.w)
}

/// Even-odd point-in-polygon test on the ground plane.
pub fn point_in_polygon(point: Vec2, polygon: &[Vec2]) -> bool {
    if polygon.len() < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = polygon.len() - 1;
    for i in 0..polygon.len() {
        let (a, b) = (polygon[i], polygon[j]);
        if (a.y > point.y) != (b.y > point.y) {
            let x_cross = a.x + (point.y - a.y) / (b.y - a.y) * (b.x - a.x);
            if point.x < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

/// Shortest distance from `point` to a polyline. Infinite for an empty path.
pub fn distance_to_polyline(point: Vec2, path: &[Vec2]) -> f32 {
    match path {
        [] => f32::INFINITY,
        [single] => point.distance(*single),
        _ => path
            .windows(2)
            .map(|segment| distance_to_segment(point, segment[0], segment[1]))
            .fold(f32::INFINITY, f32::min),
    }
}

fn distance_to_segment(point: Vec2, a: Vec2, b: Vec2) -> f32 {
    let ab = b - a;
    let len_sq = ab.length_squared();
    if len_sq < PARALLEL_EPSILON {
        return point.distance(a);
    }
    let t = ((point - a).dot(ab) / len_sq).clamp(0.0, 1.0);
    point.distance(a + ab * t)
}
