//! # Static Obstacles
//!
//! Obstacles are closed polygons stored as a ring of vertices. Each vertex
//! owns the edge that leaves it (towards `next`). Vertices must be listed
//! counter-clockwise for a solid obstacle; a two-vertex obstacle is a plain
//! line segment usable from both sides.
//!
//! Vertex ids are indices into one arena shared by every polygon. Building
//! the [`crate::kdtree::ObstacleTree`] may split edges, which appends new
//! vertices to the arena.

use crate::error::{Result, SimError};
use crate::structs::{left_of, sqr, Vector2D, EPSILON};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObstacleVertex {
    pub id: usize,
    pub point: Vector2D,
    /// Unit direction of the edge towards `next`.
    pub unit_dir: Vector2D,
    pub is_convex: bool,
    pub next: usize,
    pub prev: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ObstacleSet {
    vertices: Vec<ObstacleVertex>,
}

impl ObstacleSet {
    pub fn new() -> Self {
        ObstacleSet::default()
    }

    /// Adds a polygon and returns the id of its first vertex. Consecutive
    /// vertices (including last to first) must be distinct.
    pub fn add_obstacle(&mut self, vertices: &[Vector2D]) -> Result<usize> {
        if vertices.len() < 2 {
            return Err(SimError::InvalidObstacle(format!(
                "an obstacle needs at least 2 vertices, got {}",
                vertices.len()
            )));
        }
        if let Some(bad) = vertices.iter().find(|v| !v.is_finite()) {
            return Err(SimError::InvalidObstacle(format!(
                "non-finite vertex {:?}",
                bad
            )));
        }

        let count = vertices.len();
        for (i, &point) in vertices.iter().enumerate() {
            let next = vertices[(i + 1) % count];
            if point.distance_squared(&next) <= sqr(EPSILON) {
                return Err(SimError::InvalidObstacle(format!(
                    "zero-length edge from vertex {} at {}",
                    i, point
                )));
            }
        }

        let first = self.vertices.len();

        for i in 0..count {
            let prev_i = if i == 0 { count - 1 } else { i - 1 };
            let next_i = if i == count - 1 { 0 } else { i + 1 };

            let is_convex = if count == 2 {
                true
            } else {
                left_of(vertices[prev_i], vertices[i], vertices[next_i]) >= 0.0
            };

            self.vertices.push(ObstacleVertex {
                id: first + i,
                point: vertices[i],
                unit_dir: (vertices[next_i] - vertices[i]).normalize(),
                is_convex,
                next: first + next_i,
                prev: first + prev_i,
            });
        }

        Ok(first)
    }

    pub fn vertex(&self, id: usize) -> Option<&ObstacleVertex> {
        self.vertices.get(id)
    }

    pub fn vertices(&self) -> &[ObstacleVertex] {
        &self.vertices
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Indexing helper for ids that are known to be valid (produced by this set).
    pub(crate) fn get(&self, id: usize) -> &ObstacleVertex {
        &self.vertices[id]
    }

    /// Cuts the edge leaving `from` at `point` and returns the new vertex id.
    pub(crate) fn split_edge(&mut self, from: usize, point: Vector2D) -> usize {
        let id = self.vertices.len();
        let next = self.vertices[from].next;
        let unit_dir = self.vertices[from].unit_dir;

        self.vertices.push(ObstacleVertex {
            id,
            point,
            unit_dir,
            is_convex: true,
            next,
            prev: from,
        });
        self.vertices[from].next = id;
        self.vertices[next].prev = id;

        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Vec<Vector2D> {
        vec![
            Vector2D::new(0.0, 0.0),
            Vector2D::new(2.0, 0.0),
            Vector2D::new(2.0, 2.0),
            Vector2D::new(0.0, 2.0),
        ]
    }

    #[test]
    fn test_add_obstacle_links_ring() {
        let mut set = ObstacleSet::new();
        let first = set.add_obstacle(&square()).unwrap();
        assert_eq!(first, 0);
        assert_eq!(set.len(), 4);

        let v0 = set.vertex(0).unwrap();
        assert_eq!(v0.next, 1);
        assert_eq!(v0.prev, 3);
        assert_eq!(v0.unit_dir, Vector2D::new(1.0, 0.0));
        assert_eq!(set.vertex(3).unwrap().next, 0);
    }

    #[test]
    fn test_second_obstacle_offsets_ids() {
        let mut set = ObstacleSet::new();
        set.add_obstacle(&square()).unwrap();
        let first = set
            .add_obstacle(&[Vector2D::new(5.0, 5.0), Vector2D::new(6.0, 5.0)])
            .unwrap();
        assert_eq!(first, 4);
        assert_eq!(set.vertex(4).unwrap().next, 5);
        assert_eq!(set.vertex(5).unwrap().next, 4);
        assert!(set.vertex(4).unwrap().is_convex);
    }

    #[test]
    fn test_convexity_of_counter_clockwise_polygon() {
        let mut set = ObstacleSet::new();
        set.add_obstacle(&square()).unwrap();
        assert!(set.vertices().iter().all(|v| v.is_convex));

        // L-shape with one reflex corner at (1, 1)
        let mut set = ObstacleSet::new();
        set.add_obstacle(&[
            Vector2D::new(0.0, 0.0),
            Vector2D::new(2.0, 0.0),
            Vector2D::new(2.0, 1.0),
            Vector2D::new(1.0, 1.0),
            Vector2D::new(1.0, 2.0),
            Vector2D::new(0.0, 2.0),
        ])
        .unwrap();
        let reflex: Vec<usize> = set
            .vertices()
            .iter()
            .filter(|v| !v.is_convex)
            .map(|v| v.id)
            .collect();
        assert_eq!(reflex, vec![3]);
    }

    #[test]
    fn test_add_obstacle_rejects_degenerate_input() {
        let mut set = ObstacleSet::new();
        assert!(matches!(
            set.add_obstacle(&[Vector2D::new(1.0, 1.0)]),
            Err(SimError::InvalidObstacle(_))
        ));
        assert!(set
            .add_obstacle(&[Vector2D::new(f64::NAN, 0.0), Vector2D::new(1.0, 0.0)])
            .is_err());

        // Zero-length edges, including the closing edge and a point obstacle
        let point = Vector2D::new(0.0, 0.0);
        assert!(matches!(
            set.add_obstacle(&[point, point]),
            Err(SimError::InvalidObstacle(_))
        ));
        assert!(set
            .add_obstacle(&[
                Vector2D::new(0.0, 0.0),
                Vector2D::new(2.0, 0.0),
                Vector2D::new(2.0, 0.0),
                Vector2D::new(0.0, 2.0),
            ])
            .is_err());
        assert!(set
            .add_obstacle(&[
                Vector2D::new(0.0, 0.0),
                Vector2D::new(2.0, 0.0),
                Vector2D::new(0.0, 2.0),
                Vector2D::new(0.0, 0.0),
            ])
            .is_err());
        assert!(set.is_empty());
    }

    #[test]
    fn test_split_edge_relinks() {
        let mut set = ObstacleSet::new();
        set.add_obstacle(&square()).unwrap();
        let mid = set.split_edge(0, Vector2D::new(1.0, 0.0));
        assert_eq!(mid, 4);
        assert_eq!(set.get(0).next, 4);
        assert_eq!(set.get(4).next, 1);
        assert_eq!(set.get(1).prev, 4);
        assert_eq!(set.get(4).prev, 0);
        assert_eq!(set.get(4).unit_dir, Vector2D::new(1.0, 0.0));
    }
}
