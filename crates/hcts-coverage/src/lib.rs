#![forbid(unsafe_code)]

//! Type-coverage dispatch for the HetCTS harness.
//!
//! A conformance test usually repeats the same assertions across a family of
//! element types. A [`TypePack`] names that family once; [`for_all_types`]
//! drives a check over every entry in declaration order, and
//! [`for_all_types_and_vectors`] additionally expands each scalar into the
//! standard vector widths.

use std::error::Error;
use std::fmt;
use std::marker::PhantomData;

/// The fixed vector-width family covered by vectorized dispatch.
pub const VECTOR_WIDTHS: [usize; 6] = [1, 2, 3, 4, 8, 16];

/// A check family instantiated once per covered type.
///
/// A fresh value is default-constructed for every pack entry, so no state
/// survives from one type instantiation to the next.
pub trait TypeCheck<Ctx>: Default {
    fn run<T: 'static>(&mut self, ctx: &mut Ctx, type_name: &str);
}

/// An ordered, named, compile-time list of covered types.
///
/// Implementors come from [`named_type_pack!`], which ties each type to its
/// display name pairwise, so the name list and the type list cannot drift
/// apart.
pub trait TypePack {
    /// Display names, in declaration order. Used for diagnostics only.
    fn names(&self) -> &'static [&'static str];

    /// Default-constructs a fresh `C` per entry and invokes it with the
    /// context and the entry's display name, in declaration order.
    fn for_each<Ctx, C: TypeCheck<Ctx>>(&self, ctx: &mut Ctx);

    fn len(&self) -> usize {
        self.names().len()
    }

    fn is_empty(&self) -> bool {
        self.names().is_empty()
    }
}

/// Composed type tag pairing a scalar with a vector width.
pub struct VectorOf<T, const W: usize> {
    _scalar: PhantomData<T>,
}

impl<T, const W: usize> VectorOf<T, W> {
    pub const WIDTH: usize = W;
}

/// Display name for a `(scalar, width)` combination, e.g. `"int" -> "intx4"`.
#[must_use]
pub fn vector_type_name(scalar_name: &str, width: usize) -> String {
    format!("{scalar_name}x{width}")
}

/// Invokes `C` exactly once per pack entry, in declaration order.
///
/// The dispatcher performs no recovery: a panicking check propagates to the
/// supervising boundary in the harness crate.
pub fn for_all_types<Ctx, C, P>(pack: &P, ctx: &mut Ctx)
where
    C: TypeCheck<Ctx>,
    P: TypePack,
{
    pack.for_each::<Ctx, C>(ctx);
}

/// Invokes `C` for every scalar entry and for each of [`VECTOR_WIDTHS`]
/// derived from it: exactly seven invocations per entry. Width 1 is covered
/// like any other width; the bare scalar is never dropped either.
pub fn for_all_types_and_vectors<Ctx, C, P>(pack: &P, ctx: &mut Ctx)
where
    C: TypeCheck<Ctx>,
    P: TypePack,
{
    pack.for_each::<Ctx, VectorExpand<C>>(ctx);
}

struct VectorExpand<C> {
    _family: PhantomData<C>,
}

impl<C> Default for VectorExpand<C> {
    fn default() -> Self {
        Self {
            _family: PhantomData,
        }
    }
}

impl<Ctx, C: TypeCheck<Ctx>> TypeCheck<Ctx> for VectorExpand<C> {
    fn run<T: 'static>(&mut self, ctx: &mut Ctx, type_name: &str) {
        C::default().run::<T>(ctx, type_name);
        C::default().run::<VectorOf<T, 1>>(ctx, &vector_type_name(type_name, 1));
        C::default().run::<VectorOf<T, 2>>(ctx, &vector_type_name(type_name, 2));
        C::default().run::<VectorOf<T, 3>>(ctx, &vector_type_name(type_name, 3));
        C::default().run::<VectorOf<T, 4>>(ctx, &vector_type_name(type_name, 4));
        C::default().run::<VectorOf<T, 8>>(ctx, &vector_type_name(type_name, 8));
        C::default().run::<VectorOf<T, 16>>(ctx, &vector_type_name(type_name, 16));
    }
}

/// Declares a zero-sized [`TypePack`] from `"name" => Type` pairs.
///
/// ```
/// hcts_coverage::named_type_pack!(pub struct CorePack {
///     "int" => i32,
///     "float" => f32,
/// });
/// ```
///
/// The pair syntax makes a name/type arity mismatch a compile error rather
/// than anything observable at run time.
#[macro_export]
macro_rules! named_type_pack {
    ($vis:vis struct $pack:ident { $($name:literal => $ty:ty),+ $(,)? }) => {
        $vis struct $pack;

        impl $crate::TypePack for $pack {
            fn names(&self) -> &'static [&'static str] {
                &[$($name),+]
            }

            fn for_each<Ctx, C: $crate::TypeCheck<Ctx>>(&self, ctx: &mut Ctx) {
                $(
                    <C as ::core::default::Default>::default()
                        .run::<$ty>(ctx, $name);
                )+
            }
        }
    };
}

/// A runtime pack of named configuration values, the value-level counterpart
/// of a type pack. Built from parallel name/value lists; a length mismatch is
/// a contract violation surfaced at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedCasePack<V> {
    entries: Vec<(String, V)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackError {
    ArityMismatch { names: usize, values: usize },
}

impl fmt::Display for PackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ArityMismatch { names, values } => write!(
                f,
                "case pack arity mismatch: {names} names vs {values} values"
            ),
        }
    }
}

impl Error for PackError {}

impl<V> NamedCasePack<V> {
    pub fn from_parallel(names: &[&str], values: Vec<V>) -> Result<Self, PackError> {
        if names.len() != values.len() {
            return Err(PackError::ArityMismatch {
                names: names.len(),
                values: values.len(),
            });
        }
        let entries = names
            .iter()
            .map(|name| (*name).to_string())
            .zip(values)
            .collect();
        Ok(Self { entries })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), value))
    }

    /// Invokes `f` once per entry, in construction order.
    pub fn for_each(&self, mut f: impl FnMut(&str, &V)) {
        for (name, value) in &self.entries {
            f(name, value);
        }
    }
}
