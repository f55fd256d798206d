use crate::types::InstrId;

/// Robert Jenkins' 32 bit integer mix.
#[inline]
pub(crate) fn mix(mut a: u32) -> u32 {
    a = a.wrapping_add(0x7ed5_5d16).wrapping_add(a << 12);
    a = (a ^ 0xc761_c23c) ^ (a >> 19);
    a = a.wrapping_add(0x1656_67b1).wrapping_add(a << 5);
    a = a.wrapping_add(0xd3a2_646c) ^ (a << 9);
    a = a.wrapping_add(0xfd70_46c5).wrapping_add(a << 3);
    a = (a ^ 0xb55a_4f09) ^ (a >> 16);
    a
}

/// Fold a chain signature into a single hash value.
pub(crate) fn hash_signature(ids: &[InstrId]) -> u32 {
    ids.iter().fold(0, |acc, id| mix(acc ^ u32::from(id.get())))
}
