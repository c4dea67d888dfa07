use std::path::Path;

use bitflags::bitflags;
use indexmap::IndexSet;
use thiserror::Error as ThisError;
use tracing::{debug, info, warn};

use crate::{
    import::{self, ImportError, ShapeKeySet, SourceMesh},
    input::CompileParams,
    utilities::mathematics::{BoundingBox, Vector2, Vector3},
};

mod adjacency;
mod bones;
mod mesh;
mod strips;

pub use adjacency::AdjacencyGraph;
pub use strips::{GreedyStripifier, PrimitiveKind, StripRun, Stripifier, StripifyError};

use bones::{ProcessingBoneError, merge_skeletons};
use mesh::{ProcessingMeshError, VertexTransform, build_tangent_space, weld_group};
use strips::optimize_group;

/// The most mesh replacements one LOD group can hold, including LOD zero.
pub const MAX_MODEL_LODS: usize = 8;

/// One loaded model reference, LOD replacements included.
#[derive(Debug)]
pub struct ModelRef {
    /// The part name from the compile script.
    pub name: String,
    pub mesh: SourceMesh,
    pub shapes: Option<ShapeKeySet>,
    /// Index into [`Self::shapes`] of the key applied before welding.
    pub shape_by: Option<usize>,
}

/// All state owned by one compile invocation.
#[derive(Debug)]
pub struct CompileSession {
    pub params: CompileParams,
    pub models: Vec<ModelRef>,
    pub lod_groups: Vec<LodGroup>,
    pub lod_params: Vec<LodParams>,
    /// Material names in first-use order. Group material indices point here.
    pub materials: IndexSet<String>,
}

/// Per-LOD replacement table. Entries index [`CompileSession::models`].
#[derive(Clone, Copy, Debug, Default)]
pub struct LodGroup {
    pub models: [Option<usize>; MAX_MODEL_LODS],
}

#[derive(Clone, Copy, Debug, Default)]
pub struct LodParams {
    pub distance: f32,
    pub flags: LodFlags,
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default)]
    pub struct LodFlags: u32 {
        const MANUAL = 1 << 0;
    }
}

//-----------------------------------------------------------------------------
// Compiled output tables, consumed by the blob serializer.
//-----------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct CompiledModel {
    pub name: String,
    pub bones: Vec<CompiledBone>,
    pub models: Vec<CompiledModelPart>,
    pub lod_groups: Vec<LodGroup>,
    pub lod_params: Vec<LodParams>,
    pub body_groups: Vec<CompiledBodyGroup>,
    pub attachments: Vec<CompiledAttachment>,
    pub ik_chains: Vec<CompiledIkChain>,
    pub materials: Vec<String>,
    pub material_paths: Vec<String>,
    pub motion_packages: Vec<String>,
    pub bounds: BoundingBox,
}

#[derive(Debug)]
pub struct CompiledBone {
    pub name: String,
    /// Index into the merged bone table, -1 for roots.
    pub parent: i32,
    pub position: Vector3,
    pub rotation: Vector3,
}

#[derive(Debug, Default)]
pub struct CompiledModelPart {
    pub name: String,
    pub groups: Vec<CompiledGroup>,
}

#[derive(Debug)]
pub struct CompiledGroup {
    /// Index into the material table, -1 when materials are disabled.
    pub material: i32,
    pub vertices: Vec<CanonicalVertex>,
    pub indices: Vec<u32>,
    pub primitive: PrimitiveKind,
}

/// A welded output vertex. Tangent and binormal start at zero and are
/// filled in by the tangent-space builder.
#[derive(Clone, Copy, Debug, Default)]
pub struct CanonicalVertex {
    pub position: Vector3,
    pub normal: Vector3,
    pub texcoord: Vector2,
    pub tangent: Vector3,
    pub binormal: Vector3,
    pub weights: BoneWeights,
}

#[derive(Clone, Copy, Debug)]
pub struct BoneWeights {
    pub weights: [f32; import::MAX_VERTEX_WEIGHTS],
    pub bones: [i8; import::MAX_VERTEX_WEIGHTS],
    pub count: i8,
}

impl Default for BoneWeights {
    fn default() -> Self {
        Self {
            weights: [0.0; import::MAX_VERTEX_WEIGHTS],
            bones: [-1; import::MAX_VERTEX_WEIGHTS],
            count: 0,
        }
    }
}

#[derive(Debug)]
pub struct CompiledBodyGroup {
    pub name: String,
    /// Index into the LOD group table.
    pub lod_group: i32,
}

#[derive(Debug)]
pub struct CompiledAttachment {
    pub name: String,
    pub bone: i32,
    pub position: Vector3,
    pub rotation: Vector3,
}

#[derive(Debug)]
pub struct CompiledIkChain {
    pub name: String,
    /// Links ordered root first, effector last.
    pub links: Vec<CompiledIkLink>,
}

#[derive(Debug)]
pub struct CompiledIkLink {
    pub bone: i32,
    pub mins: Vector3,
    pub maxs: Vector3,
    pub damping: f32,
}

#[derive(Debug, ThisError)]
pub enum ProcessingError {
    #[error("Model Has No References")]
    NoModelReferences,
    #[error("Failed To Load Model \"{name}\": {source}")]
    FailedModelLoad { name: String, source: ImportError },
    #[error("Reference \"{reference}\" Not Found For Body Group \"{name}\"")]
    UnknownBodyGroupReference { name: String, reference: String },
    #[error("Failed To Process Bone Data: {0}")]
    ProcessingBoneError(#[from] ProcessingBoneError),
    #[error("Failed To Process Mesh Data: {0}")]
    ProcessingMeshError(#[from] ProcessingMeshError),
}

//-----------------------------------------------------------------------------
// Session loading
//-----------------------------------------------------------------------------

/// Loads every model reference the script names, LOD replacements
/// included, and interns their materials.
pub fn load_session(params: CompileParams, script_dir: &Path) -> Result<CompileSession, ProcessingError> {
    let references_path = match &params.source_path {
        Some(source_path) => script_dir.join(source_path),
        None => script_dir.to_path_buf(),
    };

    let mut session = CompileSession {
        models: Vec::new(),
        lod_groups: Vec::new(),
        lod_params: vec![LodParams::default()],
        materials: IndexSet::new(),
        params,
    };

    for model_index in 0..session.params.models.len() {
        let reference = &session.params.models[model_index];
        let (name, file, shape_key) = (reference.name.clone(), reference.source_file.clone(), reference.shape_key.clone());

        let model = load_model_reference(&name, &file, shape_key.as_deref(), &references_path, &session.params)?;
        intern_materials(&model.mesh, &mut session.materials);

        info!(
            "Added reference \"{}\" with {} triangles (in {} groups), {} bones.",
            model.name,
            model.mesh.total_vertices() / 3,
            model.mesh.groups.len(),
            model.mesh.bones.len()
        );

        let mut lod_group = LodGroup::default();
        lod_group.models[0] = Some(session.models.len());
        session.lod_groups.push(lod_group);
        session.models.push(model);
    }

    if session.models.is_empty() {
        return Err(ProcessingError::NoModelReferences);
    }

    // LOD replacements load as regular references slotted into the
    // owning group's table at their LOD index.
    for lod_index in 0..session.params.lods.len() {
        let lod = &session.params.lods[lod_index];
        let (distance, replacements) = (lod.distance, lod.replacements.clone());

        for (part_name, file) in replacements {
            let slot = lod_index + 1;
            if slot >= MAX_MODEL_LODS {
                warn!("Lod {slot} is past the {MAX_MODEL_LODS} slot table, skipping replacement \"{file}\".");
                continue;
            }

            let Some(group_index) = session
                .params
                .models
                .iter()
                .position(|reference| reference.name.eq_ignore_ascii_case(&part_name))
            else {
                warn!("No reference named \"{part_name}\" for lod {slot}, skipping replacement.");
                continue;
            };

            let model = load_model_reference(&part_name, &file, None, &references_path, &session.params)?;
            intern_materials(&model.mesh, &mut session.materials);

            session.lod_groups[group_index].models[slot] = Some(session.models.len());
            session.models.push(model);
        }

        session.lod_params.push(LodParams {
            distance,
            flags: LodFlags::default(),
        });
        debug!("Added lod {}, distance: {distance}.", lod_index + 1);
    }

    Ok(session)
}

/// Loads one source file, following a shape-key file to its reference
/// mesh and applying the global scale and offset.
fn load_model_reference(name: &str, file: &str, shape_key: Option<&str>, references_path: &Path, params: &CompileParams) -> Result<ModelRef, ProcessingError> {
    let wrap_error = |source| ProcessingError::FailedModelLoad {
        name: name.to_string(),
        source,
    };

    let source_path = references_path.join(file);
    let is_shape_file = source_path
        .extension()
        .is_some_and(|extension| extension.eq_ignore_ascii_case("esx"));

    let (mesh_path, shapes) = if is_shape_file {
        let shapes = import::load_shape_keys(&source_path).map_err(&wrap_error)?;
        (references_path.join(&shapes.reference), Some(shapes))
    } else {
        (source_path, None)
    };

    let mut mesh = import::load_mesh(&mesh_path).map_err(&wrap_error)?;
    mesh.name = name.to_string();

    let shape_by = match (shape_key, &shapes) {
        (Some(key_name), Some(shapes)) => {
            let found = shapes.find_key(key_name);
            if found.is_none() {
                warn!("Shape key \"{key_name}\" not found in \"{file}\" for model \"{name}\", compiling unshaped.");
            }
            found
        }
        (Some(key_name), None) => {
            warn!("Model \"{name}\" asks for shape key \"{key_name}\" but \"{file}\" is not a shape-key file.");
            None
        }
        _ => None,
    };

    for bone in &mut mesh.bones {
        bone.position *= params.global_scale;
        if bone.parent_id == -1 {
            bone.position += params.global_offset;
        }
    }
    for group in &mut mesh.groups {
        for vertex in &mut group.vertices {
            vertex.position = vertex.position * params.global_scale + params.global_offset;
        }
    }

    Ok(ModelRef {
        name: name.to_string(),
        mesh,
        shapes,
        shape_by,
    })
}

fn intern_materials(mesh: &SourceMesh, materials: &mut IndexSet<String>) {
    for group in &mesh.groups {
        materials.insert(group.material.clone());
    }
}

//-----------------------------------------------------------------------------
// Pipeline
//-----------------------------------------------------------------------------

/// Runs the whole pipeline over a loaded session.
pub fn process(mut session: CompileSession, stripifier: &dyn Stripifier) -> Result<CompiledModel, ProcessingError> {
    debug!("Merging skeletons.");
    let skeleton = merge_skeletons(&mut session.models)?;
    info!("Model uses {} bones.", skeleton.bones.len());

    let mut compiled = CompiledModel {
        name: session.params.model_filename.to_string_lossy().replace('\\', "/"),
        lod_groups: session.lod_groups,
        lod_params: session.lod_params,
        material_paths: if session.params.no_materials { Vec::new() } else { session.params.material_paths.clone() },
        motion_packages: session.params.motion_packages.clone(),
        ..Default::default()
    };

    for bone in &skeleton.bones {
        compiled.bones.push(CompiledBone {
            name: bone.name.clone(),
            parent: bone.parent,
            position: bone.position,
            rotation: bone.rotation,
        });
        compiled.bounds.add_point(bone.position);
    }

    debug!("Processing mesh groups.");
    for model in session.models {
        let mut part = CompiledModelPart {
            name: model.name.clone(),
            ..Default::default()
        };

        let shape_key = model
            .shape_by
            .and_then(|key_index| model.shapes.as_ref().map(|shapes| &shapes.keys[key_index]));

        let mut culled_weights = 0;
        for group in &model.mesh.groups {
            let transform = match shape_key {
                Some(key) => VertexTransform::ShapeKey(key),
                None => VertexTransform::None,
            };

            let welded = weld_group(&model.mesh.name, group, transform)?;
            culled_weights += welded.culled_weights;

            // The shaped array is the one the renderer sees.
            let mut vertices = welded.shaped_vertices.unwrap_or(welded.vertices);
            build_tangent_space(&mut vertices, &welded.indices);

            for vertex in &vertices {
                compiled.bounds.add_point(vertex.position);
            }

            let material = if session.params.no_materials {
                -1
            } else {
                session.materials.get_index_of(&group.material).map_or(-1, |index| index as i32)
            };

            let (primitive, indices) = optimize_group(&model.mesh.name, &group.material, &welded.indices, stripifier);

            let positions: Vec<Vector3> = vertices.iter().map(|vertex| vertex.position).collect();
            let graph = AdjacencyGraph::build(&welded.indices, Some(&positions));
            debug!(
                "Group \"{}\" of \"{}\": {} vertices, {} indices, {} islands.",
                group.material,
                model.mesh.name,
                vertices.len(),
                indices.len(),
                graph.connected_groups().len()
            );

            part.groups.push(CompiledGroup {
                material,
                vertices,
                indices,
                primitive,
            });
        }

        if culled_weights > 0 {
            warn!("Culled {culled_weights} vertex weights over the limit for model \"{}\".", model.name);
        }

        compiled.models.push(part);
        // Source mesh memory is released here, its data now lives in the compiled tables.
    }

    for body_group in &session.params.body_groups {
        let Some(lod_group) = session
            .params
            .models
            .iter()
            .position(|reference| reference.name.eq_ignore_ascii_case(&body_group.reference))
        else {
            return Err(ProcessingError::UnknownBodyGroupReference {
                name: body_group.name.clone(),
                reference: body_group.reference.clone(),
            });
        };

        compiled.body_groups.push(CompiledBodyGroup {
            name: body_group.name.clone(),
            lod_group: lod_group as i32,
        });
    }

    for attachment in &session.params.attachments {
        let Some(bone) = skeleton.find(&attachment.bone) else {
            warn!("Can't find bone \"{}\" for attachment \"{}\", skipping.", attachment.bone, attachment.name);
            continue;
        };

        compiled.attachments.push(CompiledAttachment {
            name: attachment.name.clone(),
            bone: bone as i32,
            position: attachment.position,
            rotation: attachment.rotation,
        });
    }

    for chain in &session.params.ik_chains {
        let Some(effector) = skeleton.find(&chain.effector) else {
            warn!("Effector bone \"{}\" not found for ik chain \"{}\", skipping.", chain.effector, chain.name);
            continue;
        };

        // Walk effector to root, then emit the links root first.
        let mut links = Vec::new();
        let mut current = Some(effector);
        while let Some(bone_index) = current {
            if links.len() > skeleton.bones.len() {
                warn!("Bone parent cycle in ik chain \"{}\", skipping.", chain.name);
                links.clear();
                break;
            }

            links.push(CompiledIkLink {
                bone: bone_index as i32,
                mins: Vector3::splat(-360.0),
                maxs: Vector3::splat(360.0),
                damping: 1.0,
            });

            let parent = skeleton.bones[bone_index].parent;
            current = (parent >= 0).then_some(parent as usize);
        }
        if links.is_empty() {
            continue;
        }
        links.reverse();

        for (bone_name, damping) in &chain.damping {
            match find_link(&skeleton, &mut links, bone_name) {
                Some(link) => link.damping = *damping,
                None => warn!("damping: bone \"{bone_name}\" is not a link of ik chain \"{}\".", chain.name),
            }
        }
        for (bone_name, mins, maxs) in &chain.limits {
            match find_link(&skeleton, &mut links, bone_name) {
                Some(link) => {
                    link.mins = *mins;
                    link.maxs = *maxs;
                }
                None => warn!("link_limits: bone \"{bone_name}\" is not a link of ik chain \"{}\".", chain.name),
            }
        }

        compiled.ik_chains.push(CompiledIkChain {
            name: chain.name.clone(),
            links,
        });
    }

    if !session.params.no_materials {
        compiled.materials = session.materials.into_iter().collect();
    }

    if compiled.bounds.is_valid() {
        debug!("Model bounds: {} to {}.", compiled.bounds.minimum, compiled.bounds.maximum);
    }
    info!("Model has {} materials in {} body groups.", compiled.materials.len(), compiled.body_groups.len());

    Ok(compiled)
}

fn find_link<'a>(skeleton: &bones::MergedSkeleton, links: &'a mut [CompiledIkLink], bone_name: &str) -> Option<&'a mut CompiledIkLink> {
    let bone_index = skeleton.find(bone_name)? as i32;
    links.iter_mut().find(|link| link.bone == bone_index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::{LodDefinition, ModelReference};

    const TRIANGLE: &str = "group \"mat\"\n{\nvertex 0 0 0 0 0 1 0 0 0\nvertex 1 0 0 0 0 1 1 0 0\nvertex 0 1 0 0 0 1 0 1 0\n}\n";

    #[test]
    fn lod_replacements_past_the_table_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("body.esm"), TRIANGLE).unwrap();

        let mut params = CompileParams::default();
        params.models.push(ModelReference {
            name: "body".to_string(),
            source_file: "body.esm".to_string(),
            shape_key: None,
        });
        for lod in 0..MAX_MODEL_LODS {
            params.lods.push(LodDefinition {
                distance: (lod + 1) as f32 * 100.0,
                replacements: vec![("body".to_string(), "body.esm".to_string())],
            });
        }

        let session = load_session(params, dir.path()).unwrap();

        // Reference plus one replacement per free slot, the eighth lod
        // has nowhere to go.
        assert_eq!(session.models.len(), MAX_MODEL_LODS);
        let table = session.lod_groups[0].models;
        assert!(table.iter().all(|slot| slot.is_some()));
        assert_eq!(table[MAX_MODEL_LODS - 1], Some(MAX_MODEL_LODS - 1));
    }
}
