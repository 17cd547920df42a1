use std::fmt;
use std::rc::Rc;

use cbshell_shared::math;
use cbshell_shared::Instance;
use glam::{Vec2, Vec3};

use crate::camera::MouseButtons;
use crate::state::{SetSharedState, SharedState};

/// Mesh identifier understood by the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MeshId(pub u32);

#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub mesh: MeshId,
    pub instances: Rc<[Instance]>,
}

/// One visual contribution. Layers are painted in collection order.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderLayer {
    pub owner: Rc<str>,
    pub key: String,
    pub decal: bool,
    pub batches: Vec<Batch>,
}

impl RenderLayer {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            owner: Rc::from(""),
            key: key.into(),
            decal: false,
            batches: Vec::new(),
        }
    }

    pub fn decal(mut self) -> Self {
        self.decal = true;
        self
    }

    pub fn batch(mut self, mesh: MeshId, instances: impl Into<Rc<[Instance]>>) -> Self {
        self.batches.push(Batch {
            mesh,
            instances: instances.into(),
        });
        self
    }
}

// ─── Interactive Shapes ──────────────────────────────────────────────

/// Ground-plane hit region.
#[derive(Debug, Clone, PartialEq)]
pub enum HitRegion {
    Circle { center: Vec2, radius: f32 },
    Polygon(Vec<Vec2>),
    /// Everything within `half_width` of a polyline.
    Band { path: Vec<Vec2>, half_width: f32 },
}

impl HitRegion {
    pub fn contains(&self, point: Vec2) -> bool {
        match self {
            HitRegion::Circle { center, radius } => center.distance(point) <= *radius,
            HitRegion::Polygon(points) => math::point_in_polygon(point, points),
            HitRegion::Band { path, half_width } => {
                math::distance_to_polyline(point, path) <= *half_width
            }
        }
    }
}

/// Identity of a shape across frames: the owning module plus its own id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShapeKey {
    pub owner: Rc<str>,
    pub id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeEventKind {
    PointerDown,
    Drag,
    PointerUp,
    Hover,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShapeEvent {
    pub kind: ShapeEventKind,
    pub key: ShapeKey,
    /// Ground-plane point under the pointer, if any.
    pub world: Option<Vec3>,
    pub screen: Vec2,
    pub buttons: MouseButtons,
}

/// What a shape handler may touch while handling an event.
pub struct Dispatch<'a, E> {
    pub state: &'a SharedState,
    pub set_state: &'a SetSharedState,
    engine: Option<&'a Rc<E>>,
}

impl<'a, E> Dispatch<'a, E> {
    pub fn new(
        state: &'a SharedState,
        set_state: &'a SetSharedState,
        engine: Option<&'a Rc<E>>,
    ) -> Self {
        Self {
            state,
            set_state,
            engine,
        }
    }

    /// `None` until the engine has loaded and started.
    pub fn engine(&self) -> Option<&'a Rc<E>> {
        self.engine
    }
}

pub type ShapeHandler<E> = Rc<dyn Fn(&ShapeEvent, &Dispatch<'_, E>)>;

pub struct InteractiveShape<E> {
    pub key: ShapeKey,
    pub region: HitRegion,
    pub handler: ShapeHandler<E>,
}

impl<E> Clone for InteractiveShape<E> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            region: self.region.clone(),
            handler: Rc::clone(&self.handler),
        }
    }
}

/// Shapes compare by key and region only. Every build pass creates fresh
/// handler closures, so handlers take no part in equality.
impl<E> PartialEq for InteractiveShape<E> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.region == other.region
    }
}

impl<E> fmt::Debug for InteractiveShape<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InteractiveShape")
            .field("key", &self.key)
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

// ─── Build pass ──────────────────────────────────────────────────────

/// Accumulation target handed to one module during the build pass.
/// Everything pushed is tagged with that module as owner.
pub struct FrameBuilder<E> {
    owner: Rc<str>,
    layers: Vec<RenderLayer>,
    shapes: Vec<InteractiveShape<E>>,
}

impl<E> FrameBuilder<E> {
    pub(crate) fn new() -> Self {
        Self {
            owner: Rc::from(""),
            layers: Vec::new(),
            shapes: Vec::new(),
        }
    }

    pub(crate) fn set_owner(&mut self, owner: &str) {
        self.owner = Rc::from(owner);
    }

    pub fn layer(&mut self, mut layer: RenderLayer) {
        layer.owner = Rc::clone(&self.owner);
        self.layers.push(layer);
    }

    pub fn shape(
        &mut self,
        id: impl Into<String>,
        region: HitRegion,
        handler: impl Fn(&ShapeEvent, &Dispatch<'_, E>) + 'static,
    ) {
        self.shape_with(id, region, Rc::new(handler));
    }

    /// Like [`FrameBuilder::shape`] but reuses an existing handler.
    pub fn shape_with(
        &mut self,
        id: impl Into<String>,
        region: HitRegion,
        handler: ShapeHandler<E>,
    ) {
        self.shapes.push(InteractiveShape {
            key: ShapeKey {
                owner: Rc::clone(&self.owner),
                id: id.into(),
            },
            region,
            handler,
        });
    }

    pub(crate) fn finish(self) -> FrameContributions<E> {
        FrameContributions {
            layers: self.layers.into(),
            shapes: self.shapes.into(),
        }
    }
}

/// Immutable output of one build pass.
pub struct FrameContributions<E> {
    layers: Rc<[RenderLayer]>,
    shapes: Rc<[InteractiveShape<E>]>,
}

impl<E> Default for FrameContributions<E> {
    fn default() -> Self {
        Self {
            layers: Rc::from(Vec::new()),
            shapes: Rc::from(Vec::new()),
        }
    }
}

impl<E> Clone for FrameContributions<E> {
    fn clone(&self) -> Self {
        Self {
            layers: Rc::clone(&self.layers),
            shapes: Rc::clone(&self.shapes),
        }
    }
}

impl<E> PartialEq for FrameContributions<E> {
    fn eq(&self, other: &Self) -> bool {
        self.layers == other.layers && self.shapes == other.shapes
    }
}

impl<E> fmt::Debug for FrameContributions<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameContributions")
            .field("layers", &self.layers)
            .field("shapes", &self.shapes)
            .finish()
    }
}

impl<E> FrameContributions<E> {
    pub fn layers(&self) -> &[RenderLayer] {
        &self.layers
    }

    pub fn shapes(&self) -> &[InteractiveShape<E>] {
        &self.shapes
    }

    pub fn shape(&self, key: &ShapeKey) -> Option<&InteractiveShape<E>> {
        self.shapes.iter().find(|shape| &shape.key == key)
    }

    /// Topmost shape containing `point`; later shapes are drawn on top.
    pub fn topmost_hit(&self, point: Vec2) -> Option<&InteractiveShape<E>> {
        self.shapes.iter().rev().find(|shape| shape.region.contains(point))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Builder = FrameBuilder<()>;

    fn noop(_: &ShapeEvent, _: &Dispatch<'_, ()>) {}

    #[test]
    fn test_hit_regions() {
        let circle = HitRegion::Circle {
            center: Vec2::new(5.0, 5.0),
            radius: 2.0,
        };
        assert!(circle.contains(Vec2::new(6.0, 6.0)));
        assert!(!circle.contains(Vec2::new(8.0, 5.0)));

        let band = HitRegion::Band {
            path: vec![Vec2::ZERO, Vec2::new(100.0, 0.0)],
            half_width: 3.0,
        };
        assert!(band.contains(Vec2::new(50.0, 2.5)));
        assert!(!band.contains(Vec2::new(50.0, 3.5)));
    }

    #[test]
    fn test_builder_tags_owner() {
        let mut builder = Builder::new();
        builder.set_owner("transport");
        builder.layer(RenderLayer::new("lanes"));
        builder.shape("lane-1", HitRegion::Polygon(vec![]), noop);
        builder.set_owner("planning");
        builder.layer(RenderLayer::new("gestures").decal());
        let frame = builder.finish();

        let owners: Vec<&str> = frame.layers().iter().map(|l| &*l.owner).collect();
        assert_eq!(owners, ["transport", "planning"]);
        assert!(frame.layers()[1].decal);
        assert_eq!(&*frame.shapes()[0].key.owner, "transport");
    }

    #[test]
    fn test_topmost_hit_prefers_later_shape() {
        let region = HitRegion::Circle {
            center: Vec2::ZERO,
            radius: 10.0,
        };
        let mut builder = Builder::new();
        builder.set_owner("a");
        builder.shape("below", region.clone(), noop);
        builder.shape("above", region, noop);
        builder.shape(
            "elsewhere",
            HitRegion::Circle {
                center: Vec2::new(100.0, 0.0),
                radius: 1.0,
            },
            noop,
        );
        let frame = builder.finish();
        assert_eq!(frame.topmost_hit(Vec2::ZERO).unwrap().key.id, "above");
        assert!(frame.topmost_hit(Vec2::new(50.0, 50.0)).is_none());
    }

    #[test]
    fn test_shapes_compare_by_content_not_handler() {
        let build = |radius: f32| {
            let mut builder = Builder::new();
            builder.set_owner("planning");
            builder.shape(
                "point-0",
                HitRegion::Circle {
                    center: Vec2::ZERO,
                    radius,
                },
                move |_: &ShapeEvent, _: &Dispatch<'_, ()>| {},
            );
            builder.finish()
        };
        assert_eq!(build(5.0), build(5.0));
        assert_ne!(build(5.0), build(6.0));
    }

    #[test]
    fn test_empty_frame_has_no_hits() {
        let frame = FrameContributions::<()>::default();
        assert!(frame.topmost_hit(Vec2::ZERO).is_none());
        assert!(frame.layers().is_empty());
    }
}
