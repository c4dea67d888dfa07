use bitflags::bitflags;
use tracing::debug;

use crate::process::{CompiledGroup, CompiledModel, MAX_MODEL_LODS};

mod blob;

pub use blob::Blob;

pub const MODEL_SIGNATURE: u32 = u32::from_le_bytes(*b"GMF1");
pub const MODEL_VERSION: u32 = 2;

/// Output file extension.
pub const MODEL_EXTENSION: &str = "gmf";

pub const MAX_NAME_LENGTH: usize = 44;
pub const MAX_MATERIAL_NAME_LENGTH: usize = 32;
pub const MAX_PATH_LENGTH: usize = 128;
pub const MAX_MODEL_NAME_LENGTH: usize = 256;

const MODEL_DESC_SIZE: usize = 8;
const GROUP_DESC_SIZE: usize = 24;
const IK_CHAIN_DESC_SIZE: usize = 52;

bitflags! {
    #[derive(Clone, Copy, Debug, Default)]
    pub struct HeaderFlags: u32 {
        const NO_MATERIALS = 1 << 0;
    }
}

/// A (count, offset) pair reserved in the header, patched when its
/// section is written.
struct SectionSlot {
    count: usize,
    offset: usize,
}

impl SectionSlot {
    fn reserve(blob: &mut Blob) -> Self {
        Self {
            count: blob.reserve(4),
            offset: blob.reserve(4),
        }
    }

    /// Points the slot at the current cursor. Header offsets are
    /// relative to the start of the blob.
    fn patch(&self, blob: &mut Blob, count: usize) {
        blob.patch_u32(self.count, count as u32);
        blob.patch_u32(self.offset, blob.position() as u32);
    }
}

/// Serializes the compiled tables into one relocatable byte blob.
///
/// Every offset inside an entry is relative to that entry's own
/// address, so the file works loaded at any base address.
pub fn write_model(compiled: &CompiledModel) -> Vec<u8> {
    let mut blob = Blob::new();

    let mut flags = HeaderFlags::default();
    if compiled.materials.is_empty() {
        flags |= HeaderFlags::NO_MATERIALS;
    }

    blob.put_u32(MODEL_SIGNATURE);
    blob.put_u32(MODEL_VERSION);
    blob.put_u32(flags.bits());
    let length_slot = blob.reserve(4);
    blob.put_name::<MAX_MODEL_NAME_LENGTH>(&compiled.name);

    let models_slot = SectionSlot::reserve(&mut blob);
    let body_groups_slot = SectionSlot::reserve(&mut blob);
    let lod_tables_slot = SectionSlot::reserve(&mut blob);
    let lod_params_slot = SectionSlot::reserve(&mut blob);
    let materials_slot = SectionSlot::reserve(&mut blob);
    let motion_packages_slot = SectionSlot::reserve(&mut blob);
    let material_paths_slot = SectionSlot::reserve(&mut blob);
    let bones_slot = SectionSlot::reserve(&mut blob);
    let attachments_slot = SectionSlot::reserve(&mut blob);
    let ik_chains_slot = SectionSlot::reserve(&mut blob);

    write_models(&mut blob, &models_slot, compiled);

    lod_tables_slot.patch(&mut blob, compiled.lod_groups.len());
    for lod_group in &compiled.lod_groups {
        for lod in 0..MAX_MODEL_LODS {
            blob.put_i8(lod_group.models[lod].map_or(-1, |model| model as i8));
        }
    }

    lod_params_slot.patch(&mut blob, compiled.lod_params.len());
    for lod_params in &compiled.lod_params {
        blob.put_f32(lod_params.distance);
        blob.put_u32(lod_params.flags.bits());
    }

    body_groups_slot.patch(&mut blob, compiled.body_groups.len());
    for body_group in &compiled.body_groups {
        blob.put_name::<MAX_NAME_LENGTH>(&body_group.name);
        blob.put_i32(body_group.lod_group);
    }

    attachments_slot.patch(&mut blob, compiled.attachments.len());
    for attachment in &compiled.attachments {
        blob.put_name::<MAX_NAME_LENGTH>(&attachment.name);
        blob.put_i32(attachment.bone);
        blob.put_vector3(attachment.position);
        blob.put_vector3(attachment.rotation);
    }

    ik_chains_slot.patch(&mut blob, compiled.ik_chains.len());
    let mut link_slots = Vec::with_capacity(compiled.ik_chains.len());
    for chain in &compiled.ik_chains {
        blob.put_name::<MAX_NAME_LENGTH>(&chain.name);
        blob.put_u32(chain.links.len() as u32);
        link_slots.push(blob.reserve(4));
    }
    for (chain, slot) in compiled.ik_chains.iter().zip(link_slots) {
        let chain_address = slot - (IK_CHAIN_DESC_SIZE - 4);
        blob.patch_u32(slot, (blob.position() - chain_address) as u32);
        for link in &chain.links {
            blob.put_i32(link.bone);
            blob.put_vector3(link.mins);
            blob.put_vector3(link.maxs);
            blob.put_f32(link.damping);
        }
    }

    materials_slot.patch(&mut blob, compiled.materials.len());
    for material in &compiled.materials {
        blob.put_name::<MAX_MATERIAL_NAME_LENGTH>(material);
    }

    material_paths_slot.patch(&mut blob, compiled.material_paths.len());
    for path in &compiled.material_paths {
        blob.put_name::<MAX_PATH_LENGTH>(path);
    }

    motion_packages_slot.patch(&mut blob, compiled.motion_packages.len());
    for package in &compiled.motion_packages {
        blob.put_name::<MAX_PATH_LENGTH>(package);
    }

    bones_slot.patch(&mut blob, compiled.bones.len());
    for bone in &compiled.bones {
        blob.put_name::<MAX_NAME_LENGTH>(&bone.name);
        blob.put_i32(bone.parent);
        blob.put_vector3(bone.position);
        blob.put_vector3(bone.rotation);
    }

    blob.patch_u32(length_slot, blob.position() as u32);

    debug!("Serialized model \"{}\", {} bytes.", compiled.name, blob.position());

    blob.into_bytes()
}

fn write_models(blob: &mut Blob, slot: &SectionSlot, compiled: &CompiledModel) {
    slot.patch(blob, compiled.models.len());

    // All descriptors land before any payload, the way loaders expect
    // to walk them.
    let model_descs: Vec<usize> = compiled.models.iter().map(|_| blob.reserve(MODEL_DESC_SIZE)).collect();

    let mut group_descs = Vec::with_capacity(compiled.models.len());
    for (part, &desc) in compiled.models.iter().zip(&model_descs) {
        blob.patch_u32(desc, part.groups.len() as u32);
        blob.patch_u32(desc + 4, (blob.position() - desc) as u32);
        group_descs.push(part.groups.iter().map(|_| blob.reserve(GROUP_DESC_SIZE)).collect::<Vec<usize>>());
    }

    for (part, descs) in compiled.models.iter().zip(&group_descs) {
        for (group, &desc) in part.groups.iter().zip(descs) {
            write_group(blob, group, desc);
        }
    }
}

fn write_group(blob: &mut Blob, group: &CompiledGroup, desc: usize) {
    blob.patch_i32(desc, group.material);

    blob.patch_u32(desc + 4, group.vertices.len() as u32);
    blob.patch_u32(desc + 8, (blob.position() - desc) as u32);
    for vertex in &group.vertices {
        blob.put_vector3(vertex.position);
        blob.put_vector2(vertex.texcoord);
        blob.put_vector3(vertex.tangent);
        blob.put_vector3(vertex.binormal);
        blob.put_vector3(vertex.normal);
        for weight in vertex.weights.weights {
            blob.put_f32(weight);
        }
        for bone in vertex.weights.bones {
            blob.put_i8(bone);
        }
        blob.put_i8(vertex.weights.count);
        blob.put_padding(3);
    }

    blob.patch_u32(desc + 12, group.indices.len() as u32);
    blob.patch_u32(desc + 16, (blob.position() - desc) as u32);
    for &index in &group.indices {
        blob.put_u32(index);
    }

    blob.patch_u8(desc + 20, group.primitive as u8);
}
