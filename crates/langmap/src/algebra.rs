//! Polygon boolean operations used by territory synthesis.

use crate::error::GeometryError;
use crate::scale::polygon_is_finite;
use geo::{BooleanOps, MultiPolygon};
use std::cell::Cell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Once;

thread_local! {
    static IN_BOOLEAN_OP: Cell<bool> = const { Cell::new(false) };
}

static QUIET_HOOK: Once = Once::new();

/// Wraps the process panic hook once so that panics raised inside a caught
/// boolean operation go to `tracing` instead of stderr. Panics anywhere else
/// still reach the previous hook.
fn install_quiet_hook() {
    QUIET_HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            if IN_BOOLEAN_OP.with(Cell::get) {
                tracing::debug!(panic = %info, "Boolean operation panicked");
            } else {
                previous(info);
            }
        }));
    });
}

/// Marks the current thread as inside a boolean operation until dropped,
/// unwinding included.
struct QuietPanics;

impl QuietPanics {
    fn enter() -> Self {
        install_quiet_hook();
        IN_BOOLEAN_OP.with(|flag| flag.set(true));
        QuietPanics
    }
}

impl Drop for QuietPanics {
    fn drop(&mut self) {
        IN_BOOLEAN_OP.with(|flag| flag.set(false));
    }
}

pub trait PolygonAlgebra: Send + Sync {
    fn union(&self, a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> Result<MultiPolygon<f64>, GeometryError>;

    /// May return an empty multipolygon.
    fn intersect(&self, a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> Result<MultiPolygon<f64>, GeometryError>;
}

/// [`PolygonAlgebra`] on top of `geo`'s sweep-line boolean operations.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeoBooleanOps;

impl GeoBooleanOps {
    fn checked<F>(a: &MultiPolygon<f64>, b: &MultiPolygon<f64>, op: F) -> Result<MultiPolygon<f64>, GeometryError>
    where
        F: FnOnce(&MultiPolygon<f64>, &MultiPolygon<f64>) -> MultiPolygon<f64>,
    {
        if !a.0.iter().all(polygon_is_finite) {
            return Err(GeometryError::NonFinite("left"));
        }
        if !b.0.iter().all(polygon_is_finite) {
            return Err(GeometryError::NonFinite("right"));
        }
        // The sweep line asserts on some near-degenerate inputs.
        let result = catch_unwind(AssertUnwindSafe(|| {
            let _quiet = QuietPanics::enter();
            op(a, b)
        }))
        .map_err(|panic| {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_owned())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "boolean operation panicked".to_owned());
            GeometryError::Degenerate(message)
        })?;
        if !result.0.iter().all(polygon_is_finite) {
            return Err(GeometryError::NonFinite("result"));
        }
        Ok(result)
    }
}

impl PolygonAlgebra for GeoBooleanOps {
    fn union(&self, a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> Result<MultiPolygon<f64>, GeometryError> {
        Self::checked(a, b, |a, b| a.union(b))
    }

    fn intersect(&self, a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> Result<MultiPolygon<f64>, GeometryError> {
        Self::checked(a, b, |a, b| a.intersection(b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{polygon, Area};

    fn square(x0: f64, y0: f64, side: f64) -> MultiPolygon<f64> {
        MultiPolygon(vec![polygon![
            (x: x0, y: y0),
            (x: x0 + side, y: y0),
            (x: x0 + side, y: y0 + side),
            (x: x0, y: y0 + side),
        ]])
    }

    #[test]
    fn test_union_of_adjacent_squares_dissolves() {
        let merged = GeoBooleanOps.union(&square(0.0, 0.0, 1.0), &square(1.0, 0.0, 1.0)).unwrap();
        assert_eq!(merged.0.len(), 1);
        assert!((merged.unsigned_area() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_intersect_can_be_empty() {
        let clipped = GeoBooleanOps.intersect(&square(0.0, 0.0, 1.0), &square(5.0, 5.0, 1.0)).unwrap();
        assert!(clipped.0.is_empty());

        let overlap = GeoBooleanOps.intersect(&square(0.0, 0.0, 2.0), &square(1.0, 1.0, 2.0)).unwrap();
        assert!((overlap.unsigned_area() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_non_finite_input_is_rejected() {
        let bad = MultiPolygon(vec![polygon![(x: 0.0, y: 0.0), (x: f64::INFINITY, y: 0.0), (x: 1.0, y: 1.0)]]);
        assert_eq!(
            GeoBooleanOps.union(&bad, &square(0.0, 0.0, 1.0)),
            Err(GeometryError::NonFinite("left"))
        );
        assert_eq!(
            GeoBooleanOps.intersect(&square(0.0, 0.0, 1.0), &bad),
            Err(GeometryError::NonFinite("right"))
        );
    }

    #[test]
    fn test_panicking_operation_becomes_degenerate() {
        let result = GeoBooleanOps::checked(&square(0.0, 0.0, 1.0), &square(1.0, 0.0, 1.0), |_, _| {
            panic!("unable to compare active segments!")
        });
        assert_eq!(
            result,
            Err(GeometryError::Degenerate("unable to compare active segments!".into()))
        );
        // The flag is cleared again, so later panics on this thread are reported normally.
        assert!(!IN_BOOLEAN_OP.with(Cell::get));

        let formatted = GeoBooleanOps::checked(&square(0.0, 0.0, 1.0), &square(1.0, 0.0, 1.0), |_, _| {
            panic!("segment {} of {}", 3, 7)
        });
        assert_eq!(formatted, Err(GeometryError::Degenerate("segment 3 of 7".into())));
    }
}
