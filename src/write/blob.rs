use crate::utilities::mathematics::{Vector2, Vector3};

/// A little-endian byte arena with patchable slots.
///
/// Sections are written once, in order. A slot reserved with
/// [`Self::reserve`] is the only way to fill data in after the cursor
/// has moved past it.
#[derive(Debug, Default)]
pub struct Blob {
    bytes: Vec<u8>,
}

impl Blob {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current cursor, also the address the next write lands at.
    pub fn position(&self) -> usize {
        self.bytes.len()
    }

    pub fn put_i8(&mut self, value: i8) {
        self.bytes.push(value as u8);
    }

    pub fn put_u32(&mut self, value: u32) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    pub fn put_i32(&mut self, value: i32) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    pub fn put_f32(&mut self, value: f32) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    pub fn put_vector2(&mut self, value: Vector2) {
        self.put_f32(value.x);
        self.put_f32(value.y);
    }

    pub fn put_vector3(&mut self, value: Vector3) {
        self.put_f32(value.x);
        self.put_f32(value.y);
        self.put_f32(value.z);
    }

    /// Writes a NUL-padded fixed-length name field, truncating to keep
    /// at least one terminator byte.
    pub fn put_name<const LENGTH: usize>(&mut self, name: &str) {
        let mut field = [0u8; LENGTH];
        let bytes = name.as_bytes();
        let copied = bytes.len().min(LENGTH - 1);
        field[..copied].copy_from_slice(&bytes[..copied]);
        self.bytes.extend_from_slice(&field);
    }

    pub fn put_padding(&mut self, count: usize) {
        self.bytes.resize(self.bytes.len() + count, 0);
    }

    /// Reserves a zeroed slot and returns its address for patching.
    pub fn reserve(&mut self, size: usize) -> usize {
        let address = self.bytes.len();
        self.bytes.resize(address + size, 0);
        address
    }

    pub fn patch_u32(&mut self, address: usize, value: u32) {
        self.bytes[address..address + 4].copy_from_slice(&value.to_le_bytes());
    }

    pub fn patch_i32(&mut self, address: usize, value: i32) {
        self.bytes[address..address + 4].copy_from_slice(&value.to_le_bytes());
    }

    pub fn patch_u8(&mut self, address: usize, value: u8) {
        self.bytes[address] = value;
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_are_little_endian() {
        let mut blob = Blob::new();
        blob.put_u32(0x0403_0201);
        blob.put_i8(-1);

        assert_eq!(blob.into_bytes(), vec![1, 2, 3, 4, 0xFF]);
    }

    #[test]
    fn names_pad_and_truncate() {
        let mut blob = Blob::new();
        blob.put_name::<4>("bone");
        blob.put_name::<8>("ab");

        let bytes = blob.into_bytes();
        assert_eq!(&bytes[..4], b"bon\0");
        assert_eq!(&bytes[4..], b"ab\0\0\0\0\0\0");
    }

    #[test]
    fn reserved_slots_patch_in_place() {
        let mut blob = Blob::new();
        let slot = blob.reserve(4);
        blob.put_u32(7);
        blob.patch_u32(slot, blob.position() as u32);

        let bytes = blob.into_bytes();
        assert_eq!(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]), 8);
    }
}
