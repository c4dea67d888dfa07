use kdtree::{KdTree, distance::squared_euclidean};
use thiserror::Error as ThisError;

use crate::{
    import::{MAX_VERTEX_WEIGHTS, MaterialGroup, ShapeKey, SourceVertex},
    utilities::mathematics::{POSITION_TOLERANCE, TEXTURE_TOLERANCE},
};

use super::{BoneWeights, CanonicalVertex};

/// How vertices are deformed before the weld comparison.
pub enum VertexTransform<'a> {
    None,
    ShapeKey(&'a ShapeKey),
}

/// One welded material group. The shaped array is present only when a
/// shape key was applied and runs parallel to the base array.
pub struct WeldedGroup {
    pub vertices: Vec<CanonicalVertex>,
    pub shaped_vertices: Option<Vec<CanonicalVertex>>,
    pub indices: Vec<u32>,
    /// Weights beyond the per-vertex limit, dropped lightest first.
    pub culled_weights: usize,
}

#[derive(Debug, ThisError)]
pub enum ProcessingMeshError {
    #[error("Group \"{material}\" Of Model \"{model}\" Has No Triangles")]
    NoTriangles { model: String, material: String },
    #[error("Group \"{material}\" Of Model \"{model}\" Has {count} Indices After Welding, Not Divisible Into Triangles")]
    InvalidTriangles { model: String, material: String, count: usize },
}

/// Merges similar vertices of one group together.
///
/// When a shape key is given, its deltas deform position and normal
/// before the comparison, so vertices only a shape pulls apart stay
/// apart in the welded output.
pub fn weld_group(model: &str, group: &MaterialGroup, transform: VertexTransform) -> Result<WeldedGroup, ProcessingMeshError> {
    if group.vertices.is_empty() {
        return Err(ProcessingMeshError::NoTriangles {
            model: model.to_string(),
            material: group.material.clone(),
        });
    }

    let shape_key = match transform {
        VertexTransform::ShapeKey(key) => Some(key),
        VertexTransform::None => None,
    };

    let mut welded = WeldedGroup {
        vertices: Vec::new(),
        shaped_vertices: shape_key.map(|_| Vec::new()),
        indices: Vec::with_capacity(group.vertices.len()),
        culled_weights: 0,
    };

    // Weld radius wide enough that every vertex inside the
    // per-component tolerance box is a tree hit.
    let search_radius = 3.0 * POSITION_TOLERANCE * POSITION_TOLERANCE;
    let mut vertex_tree = KdTree::new(3);

    'vertices: for source in &group.vertices {
        let base = make_canonical(source, &mut welded.culled_weights);
        let shaped = shape_key.map(|key| apply_shape(base, key, source.vertex_id));
        let used = shaped.unwrap_or(base);

        if let Ok(neighbors) = vertex_tree.within(&used.position.to_array(), search_radius, &squared_euclidean) {
            for (_, &neighbor) in neighbors {
                let existing = welded
                    .shaped_vertices
                    .as_ref()
                    .map_or(&welded.vertices[neighbor], |shaped_vertices| &shaped_vertices[neighbor]);
                if vertex_equals(&used, existing) {
                    welded.indices.push(neighbor as u32);
                    continue 'vertices;
                }
            }
        }

        welded.indices.push(welded.vertices.len() as u32);
        let _ = vertex_tree.add(used.position.to_array(), welded.vertices.len());
        welded.vertices.push(base);
        if let Some(shaped_vertices) = &mut welded.shaped_vertices {
            shaped_vertices.push(used);
        }
    }

    // Welding only reduces vertices, the index count must survive intact.
    if welded.indices.len() % 3 != 0 {
        return Err(ProcessingMeshError::InvalidTriangles {
            model: model.to_string(),
            material: group.material.clone(),
            count: welded.indices.len(),
        });
    }

    Ok(welded)
}

fn make_canonical(source: &SourceVertex, culled_weights: &mut usize) -> CanonicalVertex {
    let mut links = source.weights.clone();
    links.sort_by(|from, to| to.weight.total_cmp(&from.weight));
    if links.len() > MAX_VERTEX_WEIGHTS {
        *culled_weights += links.len() - MAX_VERTEX_WEIGHTS;
        links.truncate(MAX_VERTEX_WEIGHTS);
    }

    let mut weights = BoneWeights {
        count: links.len() as i8,
        ..Default::default()
    };
    for (slot, link) in links.iter().enumerate() {
        weights.bones[slot] = link.bone as i8;
        weights.weights[slot] = link.weight;
    }

    CanonicalVertex {
        position: source.position,
        normal: source.normal,
        texcoord: source.texcoord,
        weights,
        ..Default::default()
    }
}

fn apply_shape(base: CanonicalVertex, key: &ShapeKey, vertex_id: i64) -> CanonicalVertex {
    match key.find_vertex(vertex_id) {
        Some(shape) => CanonicalVertex {
            position: shape.position,
            normal: shape.normal,
            ..base
        },
        None => base,
    }
}

/// Compares two canonical vertices for equality.
fn vertex_equals(from: &CanonicalVertex, to: &CanonicalVertex) -> bool {
    if (from.position.x - to.position.x).abs() > POSITION_TOLERANCE
        || (from.position.y - to.position.y).abs() > POSITION_TOLERANCE
        || (from.position.z - to.position.z).abs() > POSITION_TOLERANCE
    {
        return false;
    }

    if (from.normal.x - to.normal.x).abs() > POSITION_TOLERANCE
        || (from.normal.y - to.normal.y).abs() > POSITION_TOLERANCE
        || (from.normal.z - to.normal.z).abs() > POSITION_TOLERANCE
    {
        return false;
    }

    if (from.texcoord.x - to.texcoord.x).abs() > TEXTURE_TOLERANCE || (from.texcoord.y - to.texcoord.y).abs() > TEXTURE_TOLERANCE {
        return false;
    }

    if from.weights.count != to.weights.count || from.weights.bones != to.weights.bones {
        return false;
    }

    from.weights
        .weights
        .iter()
        .zip(to.weights.weights.iter())
        .all(|(from_weight, to_weight)| (from_weight - to_weight).abs() <= TEXTURE_TOLERANCE)
}

/// Accumulates per-triangle tangent and binormal vectors from the UV
/// gradients and normalizes the sums.
///
/// Triangles with no UV area contribute nothing, so a vertex touched
/// only by such triangles keeps a zero tangent.
pub fn build_tangent_space(vertices: &mut [CanonicalVertex], indices: &[u32]) {
    for triangle in indices.chunks_exact(3) {
        let (first, second, third) = (triangle[0] as usize, triangle[1] as usize, triangle[2] as usize);

        let edge_one = vertices[second].position - vertices[first].position;
        let edge_two = vertices[third].position - vertices[first].position;
        let delta_one = vertices[second].texcoord - vertices[first].texcoord;
        let delta_two = vertices[third].texcoord - vertices[first].texcoord;

        let area = delta_one.x * delta_two.y - delta_one.y * delta_two.x;
        if area.abs() <= f32::EPSILON {
            continue;
        }

        let scale = 1.0 / area;
        let tangent = (edge_one * delta_two.y - edge_two * delta_one.y) * scale;
        let binormal = (edge_two * delta_one.x - edge_one * delta_two.x) * scale;

        for &corner in &[first, second, third] {
            vertices[corner].tangent += tangent;
            vertices[corner].binormal += binormal;
        }
    }

    for vertex in vertices {
        vertex.tangent = vertex.tangent.normalize_or_zero();
        vertex.binormal = vertex.binormal.normalize_or_zero();
    }
}
