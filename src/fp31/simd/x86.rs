//! Backend AVX2 (x86_64). Un registre 256 bits pour 8 voies u32,
//! deux registres pour 8 voies u64.

use std::arch::x86_64::*;

use super::LANES;

type Lanes32 = [u32; LANES];
type Lanes64 = [u64; LANES];

#[inline(always)]
unsafe fn load32(a: &Lanes32) -> __m256i {
    _mm256_loadu_si256(a.as_ptr() as *const __m256i)
}

#[inline(always)]
unsafe fn store32(v: __m256i) -> Lanes32 {
    let mut out = [0u32; LANES];
    _mm256_storeu_si256(out.as_mut_ptr() as *mut __m256i, v);
    out
}

#[inline(always)]
unsafe fn load64(a: &Lanes64) -> (__m256i, __m256i) {
    let ptr = a.as_ptr() as *const __m256i;
    (_mm256_loadu_si256(ptr), _mm256_loadu_si256(ptr.add(1)))
}

#[inline(always)]
unsafe fn store64(lo: __m256i, hi: __m256i) -> Lanes64 {
    let mut out = [0u64; LANES];
    let ptr = out.as_mut_ptr() as *mut __m256i;
    _mm256_storeu_si256(ptr, lo);
    _mm256_storeu_si256(ptr.add(1), hi);
    out
}

macro_rules! binary32 {
    ($name:ident, $intrinsic:ident) => {
        #[inline(always)]
        pub fn $name(a: &Lanes32, b: &Lanes32) -> Lanes32 {
            unsafe { store32($intrinsic(load32(a), load32(b))) }
        }
    };
}

macro_rules! binary64 {
    ($name:ident, $intrinsic:ident) => {
        #[inline(always)]
        pub fn $name(a: &Lanes64, b: &Lanes64) -> Lanes64 {
            unsafe {
                let (a_lo, a_hi) = load64(a);
                let (b_lo, b_hi) = load64(b);
                store64($intrinsic(a_lo, b_lo), $intrinsic(a_hi, b_hi))
            }
        }
    };
}

binary32!(add32, _mm256_add_epi32);
binary32!(and32, _mm256_and_si256);
binary32!(or32, _mm256_or_si256);
binary32!(xor32, _mm256_xor_si256);
binary32!(cmpgt_i32, _mm256_cmpgt_epi32);

binary64!(add64, _mm256_add_epi64);
binary64!(and64, _mm256_and_si256);
binary64!(or64, _mm256_or_si256);
binary64!(mul_lo32, _mm256_mul_epu32);

#[inline(always)]
pub fn shl32(a: &Lanes32, n: u32) -> Lanes32 {
    unsafe { store32(_mm256_sll_epi32(load32(a), _mm_cvtsi32_si128(n as i32))) }
}

#[inline(always)]
pub fn shr32(a: &Lanes32, n: u32) -> Lanes32 {
    unsafe { store32(_mm256_srl_epi32(load32(a), _mm_cvtsi32_si128(n as i32))) }
}

#[inline(always)]
pub fn shl64(a: &Lanes64, n: u32) -> Lanes64 {
    unsafe {
        let count = _mm_cvtsi32_si128(n as i32);
        let (lo, hi) = load64(a);
        store64(_mm256_sll_epi64(lo, count), _mm256_sll_epi64(hi, count))
    }
}

#[inline(always)]
pub fn shr64(a: &Lanes64, n: u32) -> Lanes64 {
    unsafe {
        let count = _mm_cvtsi32_si128(n as i32);
        let (lo, hi) = load64(a);
        store64(_mm256_srl_epi64(lo, count), _mm256_srl_epi64(hi, count))
    }
}

#[inline(always)]
pub fn select32(mask: &Lanes32, if_set: &Lanes32, if_clear: &Lanes32) -> Lanes32 {
    unsafe {
        store32(_mm256_blendv_epi8(
            load32(if_clear),
            load32(if_set),
            load32(mask),
        ))
    }
}

#[inline(always)]
pub fn movemask32(a: &Lanes32) -> u8 {
    unsafe { _mm256_movemask_ps(_mm256_castsi256_ps(load32(a))) as u8 }
}

#[inline(always)]
pub fn widen(a: &Lanes32) -> Lanes64 {
    unsafe {
        let v = load32(a);
        let lo = _mm256_cvtepu32_epi64(_mm256_castsi256_si128(v));
        let hi = _mm256_cvtepu32_epi64(_mm256_extracti128_si256::<1>(v));
        store64(lo, hi)
    }
}

#[inline(always)]
pub fn narrow(a: &Lanes64) -> Lanes32 {
    unsafe {
        let (lo, hi) = load64(a);
        // Garde la moitié basse de chaque voie 64 bits, puis recolle les deux moitiés.
        let idx = _mm256_setr_epi32(0, 2, 4, 6, 0, 0, 0, 0);
        let lo = _mm256_permutevar8x32_epi32(lo, idx);
        let hi = _mm256_permutevar8x32_epi32(hi, idx);
        store32(_mm256_permute2x128_si256::<0x20>(lo, hi))
    }
}
