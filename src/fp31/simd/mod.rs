//! Façade SIMD portable.
//!
//! `U32x8` (8 voies de 32 bits) porte une limbe de 8 valeurs indépendantes,
//! `U64x8` porte la même limbe élargie pour les produits partiels.
//! Le backend est choisi à la compilation : AVX2 si la cible l'active,
//! sinon des boucles scalaires sur tableaux.

use std::ops::{Add, BitAnd, BitOr, BitXor, Not, Shl, Shr};

use bytemuck::{Pod, Zeroable};

#[cfg(all(target_arch = "x86_64", target_feature = "avx2"))]
mod x86;

#[cfg_attr(
    all(target_arch = "x86_64", target_feature = "avx2"),
    allow(dead_code)
)]
mod scalar;

#[cfg(all(target_arch = "x86_64", target_feature = "avx2"))]
use x86 as backend;

#[cfg(not(all(target_arch = "x86_64", target_feature = "avx2")))]
use scalar as backend;

/// Nombre de voies par registre.
pub const LANES: usize = 8;

/// Nom du backend actif (pour les logs).
pub fn backend_name() -> &'static str {
    if cfg!(all(target_arch = "x86_64", target_feature = "avx2")) {
        "avx2"
    } else {
        "scalar"
    }
}

/// Registre de 8 voies u32. Les masques de comparaison valent 0 ou `u32::MAX` par voie.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(transparent)]
pub struct U32x8(pub [u32; LANES]);

/// Registre de 8 voies u64 (limbe élargie).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(transparent)]
pub struct U64x8(pub [u64; LANES]);

impl U32x8 {
    pub const ZERO: Self = Self([0; LANES]);
    pub const ALL_SET: Self = Self([u32::MAX; LANES]);

    #[inline(always)]
    pub const fn splat(value: u32) -> Self {
        Self([value; LANES])
    }

    #[inline(always)]
    pub fn lane(&self, index: usize) -> u32 {
        self.0[index]
    }

    #[inline(always)]
    pub fn set_lane(&mut self, index: usize, value: u32) {
        self.0[index] = value;
    }

    /// `if_set` là où le masque est levé, `if_clear` ailleurs.
    #[inline(always)]
    pub fn select(mask: Self, if_set: Self, if_clear: Self) -> Self {
        Self(backend::select32(&mask.0, &if_set.0, &if_clear.0))
    }

    /// Comparaison signée voie par voie : `self > other`.
    #[inline(always)]
    pub fn cmp_gt_i32(self, other: Self) -> Self {
        Self(backend::cmpgt_i32(&self.0, &other.0))
    }

    /// `self & !other`
    #[inline(always)]
    pub fn and_not(self, other: Self) -> Self {
        self & !other
    }

    /// Un bit par voie (bit de poids fort de la voie).
    #[inline(always)]
    pub fn move_mask(self) -> u8 {
        backend::movemask32(&self.0)
    }

    #[inline(always)]
    pub fn all_set(self) -> bool {
        self.move_mask() == u8::MAX
    }

    #[inline(always)]
    pub fn any_set(self) -> bool {
        self.move_mask() != 0
    }

    #[inline(always)]
    pub fn widen(self) -> U64x8 {
        U64x8(backend::widen(&self.0))
    }
}

impl From<[u32; LANES]> for U32x8 {
    fn from(lanes: [u32; LANES]) -> Self {
        Self(lanes)
    }
}

impl U64x8 {
    pub const ZERO: Self = Self([0; LANES]);

    #[inline(always)]
    pub const fn splat(value: u64) -> Self {
        Self([value; LANES])
    }

    /// Produit élargi des 32 bits bas de chaque voie.
    #[inline(always)]
    pub fn mul_lo32(self, other: Self) -> Self {
        Self(backend::mul_lo32(&self.0, &other.0))
    }

    /// Tronque chaque voie à ses 32 bits bas.
    #[inline(always)]
    pub fn narrow(self) -> U32x8 {
        U32x8(backend::narrow(&self.0))
    }
}

macro_rules! impl_ops {
    ($ty:ident, $add:ident, $and:ident, $or:ident, $shl:ident, $shr:ident) => {
        impl Add for $ty {
            type Output = Self;
            #[inline(always)]
            fn add(self, rhs: Self) -> Self {
                Self(backend::$add(&self.0, &rhs.0))
            }
        }

        impl BitAnd for $ty {
            type Output = Self;
            #[inline(always)]
            fn bitand(self, rhs: Self) -> Self {
                Self(backend::$and(&self.0, &rhs.0))
            }
        }

        impl BitOr for $ty {
            type Output = Self;
            #[inline(always)]
            fn bitor(self, rhs: Self) -> Self {
                Self(backend::$or(&self.0, &rhs.0))
            }
        }

        impl Shl<u32> for $ty {
            type Output = Self;
            #[inline(always)]
            fn shl(self, rhs: u32) -> Self {
                Self(backend::$shl(&self.0, rhs))
            }
        }

        impl Shr<u32> for $ty {
            type Output = Self;
            #[inline(always)]
            fn shr(self, rhs: u32) -> Self {
                Self(backend::$shr(&self.0, rhs))
            }
        }
    };
}

impl_ops!(U32x8, add32, and32, or32, shl32, shr32);
impl_ops!(U64x8, add64, and64, or64, shl64, shr64);

impl BitXor for U32x8 {
    type Output = Self;
    #[inline(always)]
    fn bitxor(self, rhs: Self) -> Self {
        Self(backend::xor32(&self.0, &rhs.0))
    }
}

impl Not for U32x8 {
    type Output = Self;
    #[inline(always)]
    fn not(self) -> Self {
        self ^ Self::ALL_SET
    }
}
