use std::collections::HashMap;

use thiserror::Error as ThisError;
use tracing::{debug, warn};

use crate::utilities::mathematics::Vector3;

use super::ModelRef;

/// Bone indices are stored as signed bytes in the compiled vertex record.
pub const MAX_BONES: usize = 127;

#[derive(Debug)]
pub struct MergedSkeleton {
    pub bones: Vec<MergedBone>,
}

#[derive(Debug)]
pub struct MergedBone {
    pub name: String,
    /// Index into the merged table, -1 for roots.
    pub parent: i32,
    pub position: Vector3,
    pub rotation: Vector3,
}

impl MergedSkeleton {
    pub fn find(&self, name: &str) -> Option<usize> {
        self.bones.iter().position(|bone| bone.name.eq_ignore_ascii_case(name))
    }
}

#[derive(Debug, ThisError)]
pub enum ProcessingBoneError {
    #[error("Model Has {0} Bones, Limit Is {MAX_BONES}")]
    TooManyBones(usize),
}

/// Merges every model's skeleton into one table and remaps the vertex
/// weights to point into it.
///
/// Models are scanned in script order. Bones are matched by name,
/// case-insensitively, and the first model to declare a bone supplies
/// its transform. Parents are resolved by name after the scan so a
/// parent declared only by a later model still links up.
pub fn merge_skeletons(models: &mut [ModelRef]) -> Result<MergedSkeleton, ProcessingBoneError> {
    let mut skeleton = MergedSkeleton { bones: Vec::new() };
    let mut parent_names = Vec::new();

    for model in models.iter() {
        for bone in &model.mesh.bones {
            if skeleton.find(&bone.name).is_some() {
                continue;
            }

            skeleton.bones.push(MergedBone {
                name: bone.name.clone(),
                parent: -1,
                position: bone.position,
                rotation: bone.rotation,
            });
            parent_names.push(bone.parent_name.clone());
        }
    }

    if skeleton.bones.len() > MAX_BONES {
        return Err(ProcessingBoneError::TooManyBones(skeleton.bones.len()));
    }

    for bone_index in 0..skeleton.bones.len() {
        let parent_name = &parent_names[bone_index];
        if parent_name.is_empty() {
            continue;
        }

        match skeleton.find(parent_name) {
            Some(parent_index) if parent_index == bone_index => {
                warn!("Bone \"{}\" is its own parent, treating it as a root bone.", skeleton.bones[bone_index].name);
            }
            Some(parent_index) => skeleton.bones[bone_index].parent = parent_index as i32,
            None => {
                warn!(
                    "Parent bone \"{parent_name}\" of \"{}\" not found in any model, treating it as a root bone.",
                    skeleton.bones[bone_index].name
                );
            }
        }
    }

    for model in models.iter_mut() {
        // Old bone ids are only meaningful within their own mesh.
        let remap: HashMap<i32, i32> = model
            .mesh
            .bones
            .iter()
            .filter_map(|bone| skeleton.find(&bone.name).map(|merged| (bone.id, merged as i32)))
            .collect();

        let mut dropped = 0;
        for group in &mut model.mesh.groups {
            for vertex in &mut group.vertices {
                vertex.weights.retain_mut(|weight| match remap.get(&weight.bone) {
                    Some(merged) => {
                        weight.bone = *merged;
                        true
                    }
                    None => {
                        dropped += 1;
                        false
                    }
                });
            }
        }

        if dropped > 0 {
            warn!("Dropped {dropped} weights in \"{}\" that point to undeclared bones.", model.name);
        }
    }

    debug!("Merged {} models into {} bones.", models.len(), skeleton.bones.len());

    Ok(skeleton)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::{MaterialGroup, SourceBone, SourceMesh, SourceVertex, VertexWeight};

    fn bone(id: i32, name: &str, parent_id: i32, parent_name: &str) -> SourceBone {
        SourceBone {
            name: name.to_string(),
            id,
            parent_name: parent_name.to_string(),
            parent_id,
            position: Vector3::new(id as f32, 0.0, 0.0),
            rotation: Vector3::ZERO,
        }
    }

    fn model(name: &str, bones: Vec<SourceBone>, weights: Vec<VertexWeight>) -> ModelRef {
        ModelRef {
            name: name.to_string(),
            mesh: SourceMesh {
                name: name.to_string(),
                groups: vec![MaterialGroup {
                    material: "mat".to_string(),
                    vertices: vec![SourceVertex {
                        weights,
                        ..Default::default()
                    }],
                }],
                bones,
            },
            shapes: None,
            shape_by: None,
        }
    }

    #[test]
    fn shared_bones_merge_case_insensitively() {
        let mut models = vec![
            model(
                "body",
                vec![bone(0, "Root", -1, ""), bone(1, "Spine", 0, "Root")],
                vec![VertexWeight { bone: 1, weight: 1.0 }],
            ),
            model(
                "head",
                vec![bone(0, "spine", -1, ""), bone(1, "skull", 0, "spine")],
                vec![VertexWeight { bone: 1, weight: 1.0 }],
            ),
        ];

        let skeleton = merge_skeletons(&mut models).unwrap();

        assert_eq!(skeleton.bones.len(), 3);
        assert_eq!(skeleton.bones[0].name, "Root");
        assert_eq!(skeleton.bones[1].name, "Spine");
        assert_eq!(skeleton.bones[2].name, "skull");

        // First model wins the transform for the shared bone.
        assert_eq!(skeleton.bones[1].position.x, 1.0);

        assert_eq!(skeleton.bones[0].parent, -1);
        assert_eq!(skeleton.bones[1].parent, 0);
        assert_eq!(skeleton.bones[2].parent, 1);

        // Weights now index the merged table.
        assert_eq!(models[0].mesh.groups[0].vertices[0].weights[0].bone, 1);
        assert_eq!(models[1].mesh.groups[0].vertices[0].weights[0].bone, 2);
    }

    #[test]
    fn unresolved_parent_becomes_root() {
        let mut models = vec![model("body", vec![bone(0, "hand", 5, "missing")], Vec::new())];

        let skeleton = merge_skeletons(&mut models).unwrap();
        assert_eq!(skeleton.bones[0].parent, -1);
    }

    #[test]
    fn weights_to_undeclared_bones_are_dropped() {
        let mut models = vec![model(
            "body",
            vec![bone(0, "root", -1, "")],
            vec![VertexWeight { bone: 0, weight: 0.75 }, VertexWeight { bone: 9, weight: 0.25 }],
        )];

        merge_skeletons(&mut models).unwrap();
        let weights = &models[0].mesh.groups[0].vertices[0].weights;
        assert_eq!(weights.len(), 1);
        assert_eq!(weights[0].bone, 0);
    }

    #[test]
    fn too_many_bones_is_fatal() {
        let bones = (0..200).map(|id| bone(id, &format!("bone_{id}"), -1, "")).collect();
        let mut models = vec![model("body", bones, Vec::new())];

        assert!(matches!(merge_skeletons(&mut models), Err(ProcessingBoneError::TooManyBones(200))));
    }
}
