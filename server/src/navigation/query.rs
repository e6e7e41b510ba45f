// world_map_core/server/src/navigation/query.rs
use super::mesh::NavMesh;
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;

/// Bounded scratch space for searches; one per query so instances never share it.
#[derive(Debug)]
pub struct NodePool {
    max_nodes: usize,
    parents: ahash::AHashMap<(i32, i32), (i32, i32)>,
}

impl NodePool {
    pub fn new(max_nodes: usize) -> Self {
        NodePool { max_nodes, parents: ahash::AHashMap::with_capacity(max_nodes.min(256)) }
    }

    pub fn max_nodes(&self) -> usize {
        self.max_nodes
    }

    fn clear(&mut self) {
        self.parents.clear();
    }

    /// Records a node; false once the pool is full or the node was already seen.
    fn visit(&mut self, node: (i32, i32), parent: (i32, i32)) -> bool {
        if self.parents.len() >= self.max_nodes || self.parents.contains_key(&node) {
            return false;
        }
        self.parents.insert(node, parent);
        true
    }

    fn walk_back(&self, goal: (i32, i32)) -> Vec<(i32, i32)> {
        let mut path = vec![goal];
        let mut current = goal;
        while let Some(&parent) = self.parents.get(&current) {
            if parent == current {
                break;
            }
            path.push(parent);
            current = parent;
        }
        path.reverse();
        path
    }
}

/// Per-instance query handle over a shared mesh.
#[derive(Debug)]
pub struct NavMeshQuery {
    mesh: Arc<RwLock<NavMesh>>,
    pool: NodePool,
}

impl NavMeshQuery {
    pub fn new(mesh: Arc<RwLock<NavMesh>>, max_nodes: usize) -> Option<Self> {
        if max_nodes == 0 {
            return None;
        }
        Some(NavMeshQuery { mesh, pool: NodePool::new(max_nodes) })
    }

    pub fn mesh(&self) -> &Arc<RwLock<NavMesh>> {
        &self.mesh
    }

    pub fn max_nodes(&self) -> usize {
        self.pool.max_nodes()
    }

    /// Location of the loaded tile under a world position.
    pub fn tile_at_world(&self, x: f32, z: f32) -> Option<(i32, i32)> {
        let mesh = self.mesh.read();
        let loc = mesh.calc_tile_loc(x, z);
        mesh.tile_at(loc.0, loc.1).map(|tile| (tile.x, tile.y))
    }

    pub fn has_tile_at_world(&self, x: f32, z: f32) -> bool {
        self.tile_at_world(x, z).is_some()
    }

    pub fn loaded_tile_count(&self) -> usize {
        self.mesh.read().tile_count()
    }

    /// Breadth-first corridor of loaded tiles between two world positions.
    /// `None` when either end has no tile, the tiles are disconnected, or the
    /// search runs out of nodes.
    pub fn find_tile_corridor(&mut self, start: (f32, f32), end: (f32, f32)) -> Option<Vec<(i32, i32)>> {
        let mesh = self.mesh.read();
        let from = mesh.calc_tile_loc(start.0, start.1);
        let to = mesh.calc_tile_loc(end.0, end.1);
        mesh.tile_at(from.0, from.1)?;
        mesh.tile_at(to.0, to.1)?;

        self.pool.clear();
        self.pool.visit(from, from);
        let mut open = VecDeque::from([from]);
        while let Some(current) = open.pop_front() {
            if current == to {
                return Some(self.pool.walk_back(to));
            }
            for (dx, dy) in [(1, 0), (-1, 0), (0, 1), (0, -1)] {
                let next = (current.0 + dx, current.1 + dy);
                if mesh.tile_at(next.0, next.1).is_some() && self.pool.visit(next, current) {
                    open.push_back(next);
                }
            }
        }
        None
    }
}
