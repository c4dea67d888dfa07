use thiserror::Error as ThisError;
use tracing::{debug, warn};

use super::adjacency::AdjacencyGraph;

/// How a group's index buffer is drawn.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PrimitiveKind {
    #[default]
    TriangleList = 0,
    TriangleStrip = 1,
}

/// One contiguous run produced by a stripifier.
#[derive(Debug)]
pub struct StripRun {
    pub kind: PrimitiveKind,
    pub indices: Vec<u32>,
}

#[derive(Debug, ThisError)]
pub enum StripifyError {
    #[error("Triangle {0} Repeats An Index")]
    DegenerateTriangle(usize),
}

/// Turns a triangle list into primitive runs. Implementations may give
/// up with an error, the caller then keeps the plain list.
pub trait Stripifier {
    fn strips(&self, triangles: &[[u32; 3]]) -> Result<Vec<StripRun>, StripifyError>;
}

/// Grows strips over the shared-edge graph, always continuing across
/// the edge formed by the last two emitted indices. Winding is not
/// preserved, every emitted window is still a real mesh triangle.
pub struct GreedyStripifier;

impl Stripifier for GreedyStripifier {
    fn strips(&self, triangles: &[[u32; 3]]) -> Result<Vec<StripRun>, StripifyError> {
        for (triangle_index, triangle) in triangles.iter().enumerate() {
            if triangle[0] == triangle[1] || triangle[1] == triangle[2] || triangle[0] == triangle[2] {
                return Err(StripifyError::DegenerateTriangle(triangle_index));
            }
        }

        let flat: Vec<u32> = triangles.iter().flatten().copied().collect();
        let graph = AdjacencyGraph::build(&flat, None);

        let mut runs = Vec::new();
        let mut visited = vec![false; triangles.len()];
        for seed in 0..triangles.len() {
            if visited[seed] {
                continue;
            }
            visited[seed] = true;

            // Prefer a rotation whose trailing edge has an unvisited
            // neighbor so the strip can grow at all.
            let corners = triangles[seed];
            let rotations = [corners, [corners[1], corners[2], corners[0]], [corners[2], corners[0], corners[1]]];
            let start = rotations
                .into_iter()
                .find(|rotation| next_across(&graph, &visited, seed, rotation[1], rotation[2]).is_some())
                .unwrap_or(corners);

            let mut strip = start.to_vec();
            let mut current = seed;
            loop {
                let (from, to) = (strip[strip.len() - 2], strip[strip.len() - 1]);
                let Some(next) = next_across(&graph, &visited, current, from, to) else {
                    break;
                };
                let Some(continuation) = triangles[next].into_iter().find(|&vertex| vertex != from && vertex != to) else {
                    break;
                };

                strip.push(continuation);
                visited[next] = true;
                current = next;
            }

            runs.push(StripRun {
                kind: PrimitiveKind::TriangleStrip,
                indices: strip,
            });
        }

        Ok(runs)
    }
}

/// The unvisited triangle across the given edge of `triangle`.
fn next_across(graph: &AdjacencyGraph, visited: &[bool], triangle: usize, from: u32, to: u32) -> Option<usize> {
    let edges = &graph.triangles[triangle].edges;
    let edge_index = edges
        .iter()
        .position(|edge| (edge.from == from && edge.to == to) || (edge.from == to && edge.to == from))?;
    graph.triangles[triangle].edge_neighbors[edge_index].filter(|&neighbor| !visited[neighbor])
}

/// Runs the stripifier over one group and assembles the result.
///
/// Any stripifier error, or a run that is not a strip, drops the whole
/// group back to the untouched triangle list.
pub fn optimize_group(model: &str, material: &str, indices: &[u32], stripifier: &dyn Stripifier) -> (PrimitiveKind, Vec<u32>) {
    let triangles: Vec<[u32; 3]> = indices.chunks_exact(3).map(|triangle| [triangle[0], triangle[1], triangle[2]]).collect();

    let runs = match stripifier.strips(&triangles) {
        Ok(runs) => runs,
        Err(error) => {
            warn!("Could not stripify group \"{material}\" of \"{model}\" ({error}), keeping the triangle list.");
            return (PrimitiveKind::TriangleList, indices.to_vec());
        }
    };

    if runs.iter().any(|run| run.kind != PrimitiveKind::TriangleStrip) {
        warn!("Stripifier returned non-strip runs for group \"{material}\" of \"{model}\", keeping the triangle list.");
        return (PrimitiveKind::TriangleList, indices.to_vec());
    }

    let assembled = assemble_strips(&runs);
    debug!(
        "Stripified group \"{material}\" of \"{model}\": {} runs, {} indices from {}.",
        runs.len(),
        assembled.len(),
        indices.len()
    );

    (PrimitiveKind::TriangleStrip, assembled)
}

/// Joins strip runs into one buffer with degenerate bridges.
///
/// When a run does not start on the previous run's tail, the tail and
/// the new head are repeated so the junction decodes to nothing.
/// Odd-length runs get one trailing repeat to keep parity.
fn assemble_strips(runs: &[StripRun]) -> Vec<u32> {
    let mut indices = Vec::new();
    for run in runs {
        if let (Some(&tail), Some(&head)) = (indices.last(), run.indices.first()) {
            if tail != head {
                indices.push(tail);
                indices.push(head);
            }
        }

        indices.extend_from_slice(&run.indices);

        if run.indices.len() % 2 == 1 {
            if let Some(&tail) = run.indices.last() {
                indices.push(tail);
            }
        }
    }
    indices
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Decodes a strip buffer back into its real triangles.
    fn decode(strip: &[u32]) -> Vec<[u32; 3]> {
        strip
            .windows(3)
            .filter(|window| window[0] != window[1] && window[1] != window[2] && window[0] != window[2])
            .map(|window| [window[0], window[1], window[2]])
            .collect()
    }

    fn sorted(triangle: [u32; 3]) -> [u32; 3] {
        let mut triangle = triangle;
        triangle.sort_unstable();
        triangle
    }

    fn assert_same_triangles(strip: &[u32], triangles: &[[u32; 3]]) {
        let mut decoded: Vec<_> = decode(strip).into_iter().map(sorted).collect();
        let mut expected: Vec<_> = triangles.iter().map(|&triangle| sorted(triangle)).collect();
        decoded.sort_unstable();
        expected.sort_unstable();
        assert_eq!(decoded, expected);
    }

    #[test]
    fn quad_becomes_one_strip() {
        let triangles = [[0, 1, 2], [2, 1, 3]];
        let runs = GreedyStripifier.strips(&triangles).unwrap();

        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].indices.len(), 4);
        assert_same_triangles(&runs[0].indices, &triangles);
    }

    #[test]
    fn islands_bridge_with_degenerates() {
        let triangles = [[0, 1, 2], [5, 6, 7]];
        let (kind, indices) = optimize_group("body", "mat", &[0, 1, 2, 5, 6, 7], &GreedyStripifier);

        assert_eq!(kind, PrimitiveKind::TriangleStrip);
        assert_same_triangles(&indices, &triangles);
    }

    #[test]
    fn long_fan_survives_round_trip() {
        // A fan around vertex 0, every triangle shares it.
        let triangles: Vec<[u32; 3]> = (1..8).map(|spoke| [0, spoke, spoke + 1]).collect();
        let flat: Vec<u32> = triangles.iter().flatten().copied().collect();

        let (kind, indices) = optimize_group("body", "mat", &flat, &GreedyStripifier);
        assert_eq!(kind, PrimitiveKind::TriangleStrip);
        assert_same_triangles(&indices, &triangles);
    }

    #[test]
    fn degenerate_triangle_falls_back_to_list() {
        let flat = [0, 1, 2, 3, 3, 4];
        let (kind, indices) = optimize_group("body", "mat", &flat, &GreedyStripifier);

        assert_eq!(kind, PrimitiveKind::TriangleList);
        assert_eq!(indices, flat);
    }

    struct ListOnly;

    impl Stripifier for ListOnly {
        fn strips(&self, triangles: &[[u32; 3]]) -> Result<Vec<StripRun>, StripifyError> {
            Ok(vec![StripRun {
                kind: PrimitiveKind::TriangleList,
                indices: triangles.iter().flatten().copied().collect(),
            }])
        }
    }

    #[test]
    fn non_strip_runs_fall_back_to_list() {
        let flat = [0, 1, 2, 2, 1, 3];
        let (kind, indices) = optimize_group("body", "mat", &flat, &ListOnly);

        assert_eq!(kind, PrimitiveKind::TriangleList);
        assert_eq!(indices, flat);
    }

    #[test]
    fn odd_runs_pad_for_parity() {
        let runs = [
            StripRun {
                kind: PrimitiveKind::TriangleStrip,
                indices: vec![0, 1, 2],
            },
            StripRun {
                kind: PrimitiveKind::TriangleStrip,
                indices: vec![4, 5, 6, 7],
            },
        ];

        let assembled = assemble_strips(&runs);
        assert_eq!(assembled, vec![0, 1, 2, 2, 2, 4, 4, 5, 6, 7]);
        assert_same_triangles(&assembled, &[[0, 1, 2], [4, 5, 6], [5, 6, 7]]);
    }
}
