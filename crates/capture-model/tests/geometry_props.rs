use proptest::prelude::*;
use swingcast_capture_model::{
    resolve_broadcast, resolve_crop, width_for_height, BroadcastedRect, CaptureGeometry,
    CropRectangle, DisplaySurfaceKind, MIN_CROP_HEIGHT,
};

fn geometry_strategy() -> impl Strategy<Value = CaptureGeometry> {
    (1u32..5000, 1u32..3000, prop_oneof![Just(1.0), Just(1.25), Just(1.5), Just(2.0), Just(3.0)])
        .prop_map(|(w, h, dpr)| CaptureGeometry::new(w, h, dpr, DisplaySurfaceKind::Window))
}

fn crop_strategy() -> impl Strategy<Value = CropRectangle> {
    (MIN_CROP_HEIGHT..2200, -1.5f64..1.5, -1.5f64..1.5)
        .prop_map(|(h, ox, oy)| CropRectangle::from_height(h).with_offset(ox, oy))
}

proptest! {
    #[test]
    fn resolved_crop_stays_inside_capture(crop in crop_strategy(), g in geometry_strategy()) {
        let rect = resolve_crop(&crop, &g).unwrap();
        prop_assert!(rect.sw >= 1 && rect.sh >= 1);
        prop_assert!(rect.sx + rect.sw <= g.capture_width);
        prop_assert!(rect.sy + rect.sh <= g.capture_height);
    }

    #[test]
    fn resolver_is_deterministic(crop in crop_strategy(), g in geometry_strategy()) {
        prop_assert_eq!(resolve_crop(&crop, &g), resolve_crop(&crop, &g));
    }

    #[test]
    fn steps_preserve_minimum_bounds_and_aspect(
        start in MIN_CROP_HEIGHT..1400u32,
        steps in proptest::collection::vec((any::<bool>(), 1u32..200), 1..30),
        bounds in (320u32..4000, MIN_CROP_HEIGHT..2400),
    ) {
        let mut crop = CropRectangle::from_height(start).stepped(0, Some(bounds));
        for (grow, step) in steps {
            crop = if grow {
                crop.increase(step, Some(bounds))
            } else {
                crop.decrease(step, Some(bounds))
            };
            prop_assert!(crop.height >= MIN_CROP_HEIGHT);
            prop_assert!(crop.height <= bounds.1);
            prop_assert!(crop.width <= bounds.0);
            prop_assert_eq!(crop.width, width_for_height(crop.height));
        }
    }

    #[test]
    fn broadcast_resolution_is_clipped(
        left in -500.0f64..3000.0,
        top in -500.0f64..2000.0,
        width in 1.0f64..2000.0,
        height in 1.0f64..1500.0,
        g in geometry_strategy(),
    ) {
        let rect = BroadcastedRect::new(left, top, width, height, 1440.0, 900.0, 0);
        if let Ok(src) = resolve_broadcast(&rect, &g) {
            prop_assert!(src.sx + src.sw <= g.capture_width);
            prop_assert!(src.sy + src.sh <= g.capture_height);
        }
    }
}
