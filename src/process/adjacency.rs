use std::collections::HashMap;

use kdtree::{KdTree, distance::squared_euclidean};

use crate::utilities::mathematics::{POSITION_TOLERANCE, Vector3};

/// One directed edge of a triangle, in winding order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Edge {
    pub from: u32,
    pub to: u32,
}

impl Edge {
    /// Endpoint pair with the order stripped, for undirected matching.
    fn undirected(&self) -> (u32, u32) {
        (self.from.min(self.to), self.from.max(self.to))
    }
}

#[derive(Debug)]
pub struct Triangle {
    pub indices: [u32; 3],
    pub edges: [Edge; 3],
    /// Triangle across each edge, if one exists. Always symmetric.
    pub edge_neighbors: [Option<usize>; 3],
    /// Every other triangle sharing at least one vertex.
    pub vertex_neighbors: Vec<usize>,
}

/// Shared-edge and shared-vertex connectivity for one triangle list.
#[derive(Debug)]
pub struct AdjacencyGraph {
    pub triangles: Vec<Triangle>,
}

impl AdjacencyGraph {
    /// Builds the graph over the given index buffer.
    ///
    /// With `weld_positions` set, indices whose positions coincide
    /// within the weld tolerance count as the same vertex, so
    /// triangles that only touch through duplicated vertices still
    /// neighbor each other.
    pub fn build(indices: &[u32], weld_positions: Option<&[Vector3]>) -> Self {
        let canonical: Vec<u32> = match weld_positions {
            Some(positions) => weld_indices(indices, positions),
            None => indices.to_vec(),
        };

        let mut triangles: Vec<Triangle> = indices
            .chunks_exact(3)
            .map(|triangle| Triangle {
                indices: [triangle[0], triangle[1], triangle[2]],
                edges: [
                    Edge { from: triangle[0], to: triangle[1] },
                    Edge { from: triangle[1], to: triangle[2] },
                    Edge { from: triangle[2], to: triangle[0] },
                ],
                edge_neighbors: [None; 3],
                vertex_neighbors: Vec::new(),
            })
            .collect();

        // Edge matching runs on canonical ids so welded duplicates connect.
        let mut edge_users: HashMap<(u32, u32), Vec<(usize, usize)>> = HashMap::new();
        for (triangle_index, triangle) in canonical.chunks_exact(3).enumerate() {
            let edges = [(triangle[0], triangle[1]), (triangle[1], triangle[2]), (triangle[2], triangle[0])];
            for (edge_index, (from, to)) in edges.into_iter().enumerate() {
                let key = Edge { from, to }.undirected();
                edge_users.entry(key).or_default().push((triangle_index, edge_index));
            }
        }

        for users in edge_users.values() {
            // Non-manifold edges pair off their first two users.
            if let [(first_triangle, first_edge), (second_triangle, second_edge)] = users[..2.min(users.len())] {
                triangles[first_triangle].edge_neighbors[first_edge] = Some(second_triangle);
                triangles[second_triangle].edge_neighbors[second_edge] = Some(first_triangle);
            }
        }

        let mut vertex_users: HashMap<u32, Vec<usize>> = HashMap::new();
        for (triangle_index, triangle) in canonical.chunks_exact(3).enumerate() {
            for &vertex in triangle {
                let users = vertex_users.entry(vertex).or_default();
                if users.last() != Some(&triangle_index) {
                    users.push(triangle_index);
                }
            }
        }

        for (triangle_index, triangle) in canonical.chunks_exact(3).enumerate() {
            let neighbors = &mut triangles[triangle_index].vertex_neighbors;
            for &vertex in triangle {
                for &user in &vertex_users[&vertex] {
                    if user != triangle_index && !neighbors.contains(&user) {
                        neighbors.push(user);
                    }
                }
            }
            neighbors.sort_unstable();
        }

        Self { triangles }
    }

    /// Splits the triangles into islands by flood fill over the
    /// shared-vertex back-lists, so a single touching corner is enough
    /// to keep two triangles in one group.
    pub fn connected_groups(&self) -> Vec<Vec<usize>> {
        let mut groups = Vec::new();
        let mut visited = vec![false; self.triangles.len()];

        for seed in 0..self.triangles.len() {
            if visited[seed] {
                continue;
            }

            let mut group = Vec::new();
            let mut pending = vec![seed];
            visited[seed] = true;
            while let Some(triangle_index) = pending.pop() {
                group.push(triangle_index);
                for &neighbor in &self.triangles[triangle_index].vertex_neighbors {
                    if !visited[neighbor] {
                        visited[neighbor] = true;
                        pending.push(neighbor);
                    }
                }
            }

            group.sort_unstable();
            groups.push(group);
        }

        groups
    }
}

/// Maps each index to the first index whose position matches it.
fn weld_indices(indices: &[u32], positions: &[Vector3]) -> Vec<u32> {
    let search_radius = 3.0 * POSITION_TOLERANCE * POSITION_TOLERANCE;
    let mut position_tree = KdTree::new(3);
    let mut representatives: HashMap<u32, u32> = HashMap::new();

    let mut canonical = Vec::with_capacity(indices.len());
    for &index in indices {
        if let Some(&representative) = representatives.get(&index) {
            canonical.push(representative);
            continue;
        }

        let location = positions[index as usize].to_array();
        let matched = position_tree
            .within(&location, search_radius, &squared_euclidean)
            .ok()
            .and_then(|neighbors| neighbors.first().map(|&(_, &representative)| representative));

        let representative = match matched {
            Some(representative) => representative,
            None => {
                let _ = position_tree.add(location, index);
                index
            }
        };
        representatives.insert(index, representative);
        canonical.push(representative);
    }

    canonical
}

#[cfg(test)]
mod tests {
    use super::*;

    // Two triangles sharing the 1-2 edge plus one island triangle.
    const INDICES: [u32; 9] = [0, 1, 2, 2, 1, 3, 4, 5, 6];

    #[test]
    fn shared_edges_link_symmetrically() {
        let graph = AdjacencyGraph::build(&INDICES, None);

        assert_eq!(graph.triangles.len(), 3);
        assert_eq!(graph.triangles[0].edge_neighbors, [None, Some(1), None]);
        assert_eq!(graph.triangles[1].edge_neighbors, [Some(0), None, None]);
        assert_eq!(graph.triangles[2].edge_neighbors, [None; 3]);

        for (triangle_index, triangle) in graph.triangles.iter().enumerate() {
            for neighbor in triangle.edge_neighbors.into_iter().flatten() {
                assert!(graph.triangles[neighbor].edge_neighbors.contains(&Some(triangle_index)));
            }
        }
    }

    #[test]
    fn vertex_neighbors_cover_shared_corners() {
        let graph = AdjacencyGraph::build(&INDICES, None);

        assert_eq!(graph.triangles[0].vertex_neighbors, vec![1]);
        assert_eq!(graph.triangles[1].vertex_neighbors, vec![0]);
        assert!(graph.triangles[2].vertex_neighbors.is_empty());
    }

    #[test]
    fn islands_split_into_groups() {
        let graph = AdjacencyGraph::build(&INDICES, None);
        let groups = graph.connected_groups();

        assert_eq!(groups, vec![vec![0, 1], vec![2]]);
    }

    #[test]
    fn corner_touching_triangles_group_together() {
        // No shared edge, only the single vertex 2 in common.
        let graph = AdjacencyGraph::build(&[0, 1, 2, 2, 3, 4], None);

        assert_eq!(graph.triangles[0].edge_neighbors, [None; 3]);
        assert_eq!(graph.triangles[0].vertex_neighbors, vec![1]);
        assert_eq!(graph.connected_groups(), vec![vec![0, 1]]);
    }

    #[test]
    fn position_welding_bridges_duplicate_vertices() {
        // Triangles meet along an edge whose vertices are duplicated,
        // index-identical adjacency sees two islands.
        let positions = vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(0.0, 1.0, 0.0),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(0.0, 1.0, 0.0),
            Vector3::new(1.0, 1.0, 0.0),
        ];
        let indices = [0, 1, 2, 3, 5, 4];

        let split = AdjacencyGraph::build(&indices, None);
        assert_eq!(split.connected_groups().len(), 2);

        let welded = AdjacencyGraph::build(&indices, Some(&positions));
        assert_eq!(welded.connected_groups().len(), 1);
        assert_eq!(welded.triangles[0].edge_neighbors[1], Some(1));
        // Original indices are untouched.
        assert_eq!(welded.triangles[1].indices, [3, 5, 4]);
    }
}
