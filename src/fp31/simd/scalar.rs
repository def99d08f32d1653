//! Backend scalaire (boucles sur 8 voies), utilisé quand AVX2 n'est pas activé.

use super::LANES;

type Lanes32 = [u32; LANES];
type Lanes64 = [u64; LANES];

#[inline(always)]
pub fn add32(a: &Lanes32, b: &Lanes32) -> Lanes32 {
    std::array::from_fn(|i| a[i].wrapping_add(b[i]))
}

#[inline(always)]
pub fn and32(a: &Lanes32, b: &Lanes32) -> Lanes32 {
    std::array::from_fn(|i| a[i] & b[i])
}

#[inline(always)]
pub fn or32(a: &Lanes32, b: &Lanes32) -> Lanes32 {
    std::array::from_fn(|i| a[i] | b[i])
}

#[inline(always)]
pub fn xor32(a: &Lanes32, b: &Lanes32) -> Lanes32 {
    std::array::from_fn(|i| a[i] ^ b[i])
}

// Un décalage >= 32 donne 0, comme les instructions vectorielles.
#[inline(always)]
pub fn shl32(a: &Lanes32, n: u32) -> Lanes32 {
    std::array::from_fn(|i| a[i].checked_shl(n).unwrap_or(0))
}

#[inline(always)]
pub fn shr32(a: &Lanes32, n: u32) -> Lanes32 {
    std::array::from_fn(|i| a[i].checked_shr(n).unwrap_or(0))
}

#[inline(always)]
pub fn select32(mask: &Lanes32, if_set: &Lanes32, if_clear: &Lanes32) -> Lanes32 {
    std::array::from_fn(|i| (if_set[i] & mask[i]) | (if_clear[i] & !mask[i]))
}

#[inline(always)]
pub fn cmpgt_i32(a: &Lanes32, b: &Lanes32) -> Lanes32 {
    std::array::from_fn(|i| if (a[i] as i32) > (b[i] as i32) { u32::MAX } else { 0 })
}

#[inline(always)]
pub fn movemask32(a: &Lanes32) -> u8 {
    a.iter()
        .enumerate()
        .fold(0u8, |acc, (i, &v)| acc | (((v >> 31) as u8) << i))
}

#[inline(always)]
pub fn add64(a: &Lanes64, b: &Lanes64) -> Lanes64 {
    std::array::from_fn(|i| a[i].wrapping_add(b[i]))
}

#[inline(always)]
pub fn and64(a: &Lanes64, b: &Lanes64) -> Lanes64 {
    std::array::from_fn(|i| a[i] & b[i])
}

#[inline(always)]
pub fn or64(a: &Lanes64, b: &Lanes64) -> Lanes64 {
    std::array::from_fn(|i| a[i] | b[i])
}

#[inline(always)]
pub fn shl64(a: &Lanes64, n: u32) -> Lanes64 {
    std::array::from_fn(|i| a[i].checked_shl(n).unwrap_or(0))
}

#[inline(always)]
pub fn shr64(a: &Lanes64, n: u32) -> Lanes64 {
    std::array::from_fn(|i| a[i].checked_shr(n).unwrap_or(0))
}

/// Produit 32x32 -> 64 bits des moitiés basses de chaque voie.
#[inline(always)]
pub fn mul_lo32(a: &Lanes64, b: &Lanes64) -> Lanes64 {
    std::array::from_fn(|i| (a[i] & 0xFFFF_FFFF) * (b[i] & 0xFFFF_FFFF))
}

#[inline(always)]
pub fn widen(a: &Lanes32) -> Lanes64 {
    std::array::from_fn(|i| a[i] as u64)
}

#[inline(always)]
pub fn narrow(a: &Lanes64) -> Lanes32 {
    std::array::from_fn(|i| a[i] as u32)
}
