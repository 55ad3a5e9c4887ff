//! Voronoi tessellation of the scaled plane.

use crate::error::TessellationError;
use crate::sites::VoronoiSite;
use geo::{Area, Coord, LineString, Polygon, Rect};
use rstar::primitives::GeomWithData;
use rstar::RTree;
use std::collections::HashSet;

/// One closed cell and the site it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    /// Index into the site slice given to [`TessellationEngine::compute`].
    pub site_index: usize,
    pub language: String,
    pub boundary: Polygon<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tessellation {
    pub cells: Vec<Cell>,
}

pub trait TessellationEngine: Send + Sync {
    /// Partitions `bounds` into one cell per distinct site.
    fn compute(&self, sites: &[VoronoiSite], bounds: Rect<f64>) -> Result<Tessellation, TessellationError>;
}

type IndexedPoint = GeomWithData<[f64; 2], usize>;

/// Builds every cell by cutting the bounding rectangle with the bisectors of
/// the nearest sites until no farther site can reach it.
///
/// Each cell is clipped on its own, so two neighbours compute their shared
/// edge separately and the results differ in the last bits. Vertices are
/// therefore snapped to multiples of `grid` before the polygon is built,
/// which makes shared vertices identical and lets the boolean operations
/// dissolve adjoining cells. The default grid of one unit is one millionth
/// of a degree at the default scale factor.
#[derive(Debug, Clone, Copy)]
pub struct HalfPlaneTessellator {
    grid: f64,
}

impl HalfPlaneTessellator {
    pub fn with_grid(grid: f64) -> Self {
        Self { grid }
    }
}

impl Default for HalfPlaneTessellator {
    fn default() -> Self {
        Self::with_grid(1.0)
    }
}

impl TessellationEngine for HalfPlaneTessellator {
    fn compute(&self, sites: &[VoronoiSite], bounds: Rect<f64>) -> Result<Tessellation, TessellationError> {
        if !self.grid.is_finite() || self.grid <= 0.0 {
            return Err(TessellationError::InvalidGrid(self.grid));
        }
        let (min, max) = (bounds.min(), bounds.max());
        if ![min.x, min.y, max.x, max.y].iter().all(|v| v.is_finite()) || max.x <= min.x || max.y <= min.y {
            return Err(TessellationError::InvalidBounds);
        }

        let mut seen = HashSet::with_capacity(sites.len());
        let mut points = Vec::with_capacity(sites.len());
        for (index, site) in sites.iter().enumerate() {
            if !site.x.is_finite() || !site.y.is_finite() {
                return Err(TessellationError::NonFiniteSite { index });
            }
            // Exact duplicates would produce empty cells; the first one wins.
            if seen.insert((site.x.to_bits(), site.y.to_bits())) {
                points.push(IndexedPoint::new([site.x, site.y], index));
            }
        }
        let duplicates = sites.len() - points.len();
        let tree = RTree::bulk_load(points.clone());

        let frame = [
            Coord { x: min.x, y: min.y },
            Coord { x: max.x, y: min.y },
            Coord { x: max.x, y: max.y },
            Coord { x: min.x, y: max.y },
        ];

        let mut cells = Vec::with_capacity(points.len());
        let mut collapsed = 0usize;
        for point in &points {
            let origin = Coord {
                x: point.geom()[0],
                y: point.geom()[1],
            };
            let vertices = snap_to_grid(cell_vertices(&tree, point.data, origin, frame.to_vec()), self.grid);
            if vertices.len() < 3 {
                collapsed += 1;
                continue;
            }
            let boundary = Polygon::new(LineString::from(vertices), Vec::new());
            if boundary.unsigned_area() == 0.0 {
                collapsed += 1;
                continue;
            }
            cells.push(Cell {
                site_index: point.data,
                language: sites[point.data].language.clone(),
                boundary,
            });
        }

        tracing::info!(
            sites = sites.len(),
            duplicates,
            collapsed,
            cells = cells.len(),
            "Computed Voronoi tessellation"
        );
        Ok(Tessellation { cells })
    }
}

fn cell_vertices(tree: &RTree<IndexedPoint>, index: usize, origin: Coord<f64>, mut cell: Vec<Coord<f64>>) -> Vec<Coord<f64>> {
    let mut reach = max_distance_2(origin, &cell);
    for (neighbour, distance_2) in tree.nearest_neighbor_iter_with_distance_2(&[origin.x, origin.y]) {
        if neighbour.data == index {
            continue;
        }
        // A bisector lies at half the site distance, so sites beyond twice
        // the farthest vertex cannot cut the cell any more.
        if distance_2 > 4.0 * reach {
            break;
        }
        let other = Coord {
            x: neighbour.geom()[0],
            y: neighbour.geom()[1],
        };
        cell = clip_to_half_plane(&cell, origin, other);
        if cell.len() < 3 {
            return cell;
        }
        reach = max_distance_2(origin, &cell);
    }
    cell
}

/// Rounds every vertex to the grid and drops the repeats this creates,
/// including a last vertex equal to the first.
fn snap_to_grid(vertices: Vec<Coord<f64>>, grid: f64) -> Vec<Coord<f64>> {
    let mut snapped: Vec<Coord<f64>> = Vec::with_capacity(vertices.len());
    for v in vertices {
        let c = Coord {
            x: (v.x / grid).round() * grid,
            y: (v.y / grid).round() * grid,
        };
        if snapped.last() != Some(&c) {
            snapped.push(c);
        }
    }
    while snapped.len() > 1 && snapped.first() == snapped.last() {
        snapped.pop();
    }
    snapped
}

fn max_distance_2(origin: Coord<f64>, vertices: &[Coord<f64>]) -> f64 {
    vertices
        .iter()
        .map(|v| (v.x - origin.x).powi(2) + (v.y - origin.y).powi(2))
        .fold(0.0, f64::max)
}

/// Sutherland-Hodgman step: keeps the part of the convex `polygon` closer to
/// `site` than to `other`.
fn clip_to_half_plane(polygon: &[Coord<f64>], site: Coord<f64>, other: Coord<f64>) -> Vec<Coord<f64>> {
    let normal = Coord {
        x: other.x - site.x,
        y: other.y - site.y,
    };
    let mid = Coord {
        x: (site.x + other.x) / 2.0,
        y: (site.y + other.y) / 2.0,
    };
    let side = |p: Coord<f64>| (p.x - mid.x) * normal.x + (p.y - mid.y) * normal.y;

    let mut clipped = Vec::with_capacity(polygon.len() + 1);
    for (i, &current) in polygon.iter().enumerate() {
        let next = polygon[(i + 1) % polygon.len()];
        let (sc, sn) = (side(current), side(next));
        if sc <= 0.0 {
            clipped.push(current);
        }
        if (sc < 0.0 && sn > 0.0) || (sc > 0.0 && sn < 0.0) {
            let t = sc / (sc - sn);
            clipped.push(Coord {
                x: current.x + t * (next.x - current.x),
                y: current.y + t * (next.y - current.y),
            });
        }
    }
    clipped
}
