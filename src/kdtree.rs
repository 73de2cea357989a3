//! # Spatial Index
//!
//! Two trees back every neighbor query:
//!
//! - **AgentTree**: a k-d tree over a snapshot of agent positions. It is
//!   rebuilt from scratch at the start of every step and never updated in
//!   place, so a query always reflects exactly the agent set of the last build.
//! - **ObstacleTree**: a binary space partition over obstacle edges. Obstacles
//!   are static, so it is built once by `Simulator::process_obstacles` and
//!   reused across steps.
//!
//! ## Agent tree layout
//!
//! Nodes live in one flat vector of `2n - 1` slots. A node covering
//! `entries[begin..end]` with more than `MAX_LEAF_SIZE` entries is split on its
//! wider axis at the midpoint of its bounding box; its left child is the next
//! slot and its right child sits after the whole left subtree.
//!
//! ## Neighbor ordering
//!
//! Results are nearest first. Equal distances are ordered by ascending
//! [`AgentHandle`], so the output does not depend on tree traversal order.

use crate::obstacle::ObstacleSet;
use crate::structs::{det, dist_sq_point_segment, left_of, sqr, AgentHandle, Vector2D, EPSILON};
use ordered_float::OrderedFloat;
use priority_queue::PriorityQueue;
use std::cmp::Ordering;

const MAX_LEAF_SIZE: usize = 10;

/// An agent found by [`AgentTree::query`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgentNeighbor {
    pub handle: AgentHandle,
    pub dist_sq: f64,
}

/// An obstacle edge found by [`ObstacleTree::query`], identified by the id
/// of the vertex the edge leaves from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObstacleNeighbor {
    pub vertex: usize,
    pub dist_sq: f64,
}

#[derive(Debug, Clone, Copy, Default)]
struct AgentTreeNode {
    begin: usize,
    end: usize,
    left: usize,
    right: usize,
    min_x: f64,
    max_x: f64,
    min_y: f64,
    max_y: f64,
}

impl AgentTreeNode {
    fn dist_sq_to(&self, point: Vector2D) -> f64 {
        sqr((self.min_x - point.x).max(0.0))
            + sqr((point.x - self.max_x).max(0.0))
            + sqr((self.min_y - point.y).max(0.0))
            + sqr((point.y - self.max_y).max(0.0))
    }
}

#[derive(Debug, Clone, Default)]
pub struct AgentTree {
    entries: Vec<(AgentHandle, Vector2D)>,
    nodes: Vec<AgentTreeNode>,
}

impl AgentTree {
    pub fn build(entries: Vec<(AgentHandle, Vector2D)>) -> Self {
        let mut tree = AgentTree {
            nodes: vec![AgentTreeNode::default(); (2 * entries.len()).saturating_sub(1)],
            entries,
        };
        if !tree.entries.is_empty() {
            let count = tree.entries.len();
            tree.build_recursive(0, count, 0);
        }
        tree
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn build_recursive(&mut self, begin: usize, end: usize, node: usize) {
        let first = self.entries[begin].1;
        let (mut min_x, mut max_x, mut min_y, mut max_y) = (first.x, first.x, first.y, first.y);
        for (_, p) in &self.entries[begin + 1..end] {
            min_x = min_x.min(p.x);
            max_x = max_x.max(p.x);
            min_y = min_y.min(p.y);
            max_y = max_y.max(p.y);
        }

        self.nodes[node] = AgentTreeNode {
            begin,
            end,
            left: 0,
            right: 0,
            min_x,
            max_x,
            min_y,
            max_y,
        };

        if end - begin <= MAX_LEAF_SIZE {
            return;
        }

        let is_vertical = max_x - min_x > max_y - min_y;
        let split_value = if is_vertical {
            0.5 * (max_x + min_x)
        } else {
            0.5 * (max_y + min_y)
        };
        let coord = |p: &Vector2D| if is_vertical { p.x } else { p.y };

        let mut left = begin;
        let mut right = end;
        while left < right {
            while left < right && coord(&self.entries[left].1) < split_value {
                left += 1;
            }
            while right > left && coord(&self.entries[right - 1].1) >= split_value {
                right -= 1;
            }
            if left < right {
                self.entries.swap(left, right - 1);
                left += 1;
                right -= 1;
            }
        }

        // All points on one side of the split; force a non-empty left half.
        if left == begin {
            left += 1;
        }

        let left_node = node + 1;
        let right_node = node + 2 * (left - begin);
        self.nodes[node].left = left_node;
        self.nodes[node].right = right_node;

        self.build_recursive(begin, left, left_node);
        self.build_recursive(left, end, right_node);
    }

    /// Returns up to `max_count` agents strictly within `range` of `point`,
    /// nearest first, skipping `exclude`.
    pub fn query(
        &self,
        point: Vector2D,
        range: f64,
        max_count: usize,
        exclude: Option<AgentHandle>,
    ) -> Vec<AgentNeighbor> {
        if max_count == 0 || self.entries.is_empty() {
            return Vec::new();
        }

        let mut collector = NeighborCollector::new(sqr(range), max_count);
        self.query_recursive(point, exclude, &mut collector, 0);
        collector.into_sorted()
    }

    fn query_recursive(
        &self,
        point: Vector2D,
        exclude: Option<AgentHandle>,
        collector: &mut NeighborCollector,
        node: usize,
    ) {
        let current = &self.nodes[node];

        if current.end - current.begin <= MAX_LEAF_SIZE {
            for &(handle, position) in &self.entries[current.begin..current.end] {
                if Some(handle) != exclude {
                    collector.offer(handle, point.distance_squared(&position));
                }
            }
            return;
        }

        let dist_sq_left = self.nodes[current.left].dist_sq_to(point);
        let dist_sq_right = self.nodes[current.right].dist_sq_to(point);

        let (near, near_dist, far, far_dist) = if dist_sq_left < dist_sq_right {
            (current.left, dist_sq_left, current.right, dist_sq_right)
        } else {
            (current.right, dist_sq_right, current.left, dist_sq_left)
        };

        if near_dist <= collector.range_sq {
            self.query_recursive(point, exclude, collector, near);
            if far_dist <= collector.range_sq {
                self.query_recursive(point, exclude, collector, far);
            }
        }
    }
}

/// Bounded max-heap of the best candidates seen so far. Once full, the search
/// range shrinks to the distance of the worst kept candidate.
struct NeighborCollector {
    heap: PriorityQueue<AgentHandle, (OrderedFloat<f64>, AgentHandle)>,
    range_sq: f64,
    max_count: usize,
}

impl NeighborCollector {
    fn new(range_sq: f64, max_count: usize) -> Self {
        NeighborCollector {
            heap: PriorityQueue::with_capacity(max_count + 1),
            range_sq,
            max_count,
        }
    }

    fn offer(&mut self, handle: AgentHandle, dist_sq: f64) {
        let key = (OrderedFloat(dist_sq), handle);

        if self.heap.len() < self.max_count {
            if dist_sq >= self.range_sq {
                return;
            }
        } else {
            match self.heap.peek() {
                Some((_, worst)) if key.cmp(worst) == Ordering::Less => {}
                _ => return,
            }
        }

        self.heap.push(handle, key);
        if self.heap.len() > self.max_count {
            self.heap.pop();
        }
        if self.heap.len() == self.max_count {
            if let Some((_, (worst, _))) = self.heap.peek() {
                self.range_sq = worst.into_inner();
            }
        }
    }

    fn into_sorted(mut self) -> Vec<AgentNeighbor> {
        let mut result = Vec::with_capacity(self.heap.len());
        while let Some((handle, (dist_sq, _))) = self.heap.pop() {
            result.push(AgentNeighbor {
                handle,
                dist_sq: dist_sq.into_inner(),
            });
        }
        result.reverse();
        result
    }
}

#[derive(Debug, Clone)]
struct ObstacleTreeNode {
    vertex: usize,
    left: Option<usize>,
    right: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct ObstacleTree {
    nodes: Vec<ObstacleTreeNode>,
    root: Option<usize>,
}

/// Which side of edge `i` the edge `j` lies on, with both endpoints tested.
enum EdgeSide {
    Left,
    Right,
    Straddles { j1_left_of_i: f64 },
}

fn classify_edge(set: &ObstacleSet, i: usize, j: usize) -> EdgeSide {
    let i1 = set.get(i);
    let i2 = set.get(i1.next);
    let j1 = set.get(j);
    let j2 = set.get(j1.next);

    let j1_left_of_i = left_of(i1.point, i2.point, j1.point);
    let j2_left_of_i = left_of(i1.point, i2.point, j2.point);

    if j1_left_of_i >= -EPSILON && j2_left_of_i >= -EPSILON {
        EdgeSide::Left
    } else if j1_left_of_i <= EPSILON && j2_left_of_i <= EPSILON {
        EdgeSide::Right
    } else {
        EdgeSide::Straddles { j1_left_of_i }
    }
}

/// Orders split candidates by their worse side first, then their better side.
fn split_cost(left: usize, right: usize) -> (usize, usize) {
    (left.max(right), left.min(right))
}

impl ObstacleTree {
    /// Builds the tree over every edge in `set`, splitting edges that cross a
    /// chosen partition line.
    pub fn build(set: &mut ObstacleSet) -> Self {
        let mut tree = ObstacleTree::default();
        let edges: Vec<usize> = (0..set.len()).collect();
        tree.root = tree.build_recursive(set, &edges);
        tree
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    fn build_recursive(&mut self, set: &mut ObstacleSet, edges: &[usize]) -> Option<usize> {
        if edges.is_empty() {
            return None;
        }

        let mut optimal_split = 0;
        let mut min_left = edges.len();
        let mut min_right = edges.len();

        for (i, &edge_i) in edges.iter().enumerate() {
            let mut left_size = 0;
            let mut right_size = 0;

            for (j, &edge_j) in edges.iter().enumerate() {
                if i == j {
                    continue;
                }
                match classify_edge(set, edge_i, edge_j) {
                    EdgeSide::Left => left_size += 1,
                    EdgeSide::Right => right_size += 1,
                    EdgeSide::Straddles { .. } => {
                        left_size += 1;
                        right_size += 1;
                    }
                }
                if split_cost(left_size, right_size) >= split_cost(min_left, min_right) {
                    break;
                }
            }

            if split_cost(left_size, right_size) < split_cost(min_left, min_right) {
                min_left = left_size;
                min_right = right_size;
                optimal_split = i;
            }
        }

        let split_edge = edges[optimal_split];
        let mut left_edges = Vec::with_capacity(min_left);
        let mut right_edges = Vec::with_capacity(min_right);

        for (j, &edge_j) in edges.iter().enumerate() {
            if j == optimal_split {
                continue;
            }
            match classify_edge(set, split_edge, edge_j) {
                EdgeSide::Left => left_edges.push(edge_j),
                EdgeSide::Right => right_edges.push(edge_j),
                EdgeSide::Straddles { j1_left_of_i } => {
                    let i1 = set.get(split_edge).point;
                    let i2 = set.get(set.get(split_edge).next).point;
                    let j1 = set.get(edge_j).point;
                    let j2 = set.get(set.get(edge_j).next).point;

                    let t = det(i2 - i1, j1 - i1) / det(i2 - i1, j1 - j2);
                    let split_point = j1 + (j2 - j1) * t;
                    let new_vertex = set.split_edge(edge_j, split_point);

                    if j1_left_of_i > 0.0 {
                        left_edges.push(edge_j);
                        right_edges.push(new_vertex);
                    } else {
                        right_edges.push(edge_j);
                        left_edges.push(new_vertex);
                    }
                }
            }
        }

        let node = self.nodes.len();
        self.nodes.push(ObstacleTreeNode {
            vertex: split_edge,
            left: None,
            right: None,
        });
        let left = self.build_recursive(set, &left_edges);
        let right = self.build_recursive(set, &right_edges);
        self.nodes[node].left = left;
        self.nodes[node].right = right;

        Some(node)
    }

    /// Returns the edges within `range` of `point` that the point sees from
    /// their outer (right) side, nearest first.
    pub fn query(&self, set: &ObstacleSet, point: Vector2D, range: f64) -> Vec<ObstacleNeighbor> {
        let mut found = Vec::new();
        self.query_recursive(set, point, sqr(range), self.root, &mut found);
        found.sort_by_key(|n| (OrderedFloat(n.dist_sq), n.vertex));
        found
    }

    fn query_recursive(
        &self,
        set: &ObstacleSet,
        point: Vector2D,
        range_sq: f64,
        node: Option<usize>,
        found: &mut Vec<ObstacleNeighbor>,
    ) {
        let Some(node) = node else {
            return;
        };
        let current = &self.nodes[node];
        let o1 = set.get(current.vertex);
        let o2 = set.get(o1.next);

        let point_left_of_line = left_of(o1.point, o2.point, point);
        let (near, far) = if point_left_of_line >= 0.0 {
            (current.left, current.right)
        } else {
            (current.right, current.left)
        };

        self.query_recursive(set, point, range_sq, near, found);

        let dist_sq_line = sqr(point_left_of_line) / (o2.point - o1.point).magnitude_squared();
        if dist_sq_line < range_sq {
            if point_left_of_line < 0.0 {
                let dist_sq = dist_sq_point_segment(o1.point, o2.point, point);
                if dist_sq < range_sq {
                    found.push(ObstacleNeighbor {
                        vertex: current.vertex,
                        dist_sq,
                    });
                }
            }
            self.query_recursive(set, point, range_sq, far, found);
        }
    }

    /// True when a disk of `radius` moving from `q1` to `q2` hits no obstacle.
    pub fn query_visibility(&self, set: &ObstacleSet, q1: Vector2D, q2: Vector2D, radius: f64) -> bool {
        self.visibility_recursive(set, q1, q2, radius, self.root)
    }

    fn visibility_recursive(
        &self,
        set: &ObstacleSet,
        q1: Vector2D,
        q2: Vector2D,
        radius: f64,
        node: Option<usize>,
    ) -> bool {
        let Some(node) = node else {
            return true;
        };
        let current = &self.nodes[node];
        let o1 = set.get(current.vertex);
        let o2 = set.get(o1.next);

        let q1_left_of_i = left_of(o1.point, o2.point, q1);
        let q2_left_of_i = left_of(o1.point, o2.point, q2);
        let inv_length_i = 1.0 / (o2.point - o1.point).magnitude_squared();
        let radius_sq = sqr(radius);
        let clear_of_line = sqr(q1_left_of_i) * inv_length_i >= radius_sq
            && sqr(q2_left_of_i) * inv_length_i >= radius_sq;

        let left = current.left;
        let right = current.right;

        if q1_left_of_i >= 0.0 && q2_left_of_i >= 0.0 {
            self.visibility_recursive(set, q1, q2, radius, left)
                && (clear_of_line || self.visibility_recursive(set, q1, q2, radius, right))
        } else if q1_left_of_i <= 0.0 && q2_left_of_i <= 0.0 {
            self.visibility_recursive(set, q1, q2, radius, right)
                && (clear_of_line || self.visibility_recursive(set, q1, q2, radius, left))
        } else if q1_left_of_i >= 0.0 && q2_left_of_i <= 0.0 {
            // Passing from the open side to the back of the edge.
            self.visibility_recursive(set, q1, q2, radius, left)
                && self.visibility_recursive(set, q1, q2, radius, right)
        } else {
            let point1_left_of_q = left_of(q1, q2, o1.point);
            let point2_left_of_q = left_of(q1, q2, o2.point);
            let inv_length_q = 1.0 / (q2 - q1).magnitude_squared();

            point1_left_of_q * point2_left_of_q >= 0.0
                && sqr(point1_left_of_q) * inv_length_q > radius_sq
                && sqr(point2_left_of_q) * inv_length_q > radius_sq
                && self.visibility_recursive(set, q1, q2, radius, left)
                && self.visibility_recursive(set, q1, q2, radius, right)
        }
    }
}
