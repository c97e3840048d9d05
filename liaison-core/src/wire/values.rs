// MIT License
// Copyright 2023--present liaison developers

//! Typed value arrays exchanged by the `fmi3Get*`/`fmi3Set*` family.
//!
//! Instead of one message pair per variable type, every getter and setter
//! carries a [`Values`] tagged union. [`ValueKind`] names the variant and
//! doubles as the routing discriminator (`fmi3GetFloat64`, `fmi3SetBinary`, ...).

use serde::{Deserialize, Serialize};

use crate::wire::WireError;

/// The closed set of FMI 3.0 variable types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    Float32,
    Float64,
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Boolean,
    String,
    Binary,
    Clock,
}

impl ValueKind {
    pub const ALL: [ValueKind; 14] = [
        ValueKind::Float32,
        ValueKind::Float64,
        ValueKind::Int8,
        ValueKind::UInt8,
        ValueKind::Int16,
        ValueKind::UInt16,
        ValueKind::Int32,
        ValueKind::UInt32,
        ValueKind::Int64,
        ValueKind::UInt64,
        ValueKind::Boolean,
        ValueKind::String,
        ValueKind::Binary,
        ValueKind::Clock,
    ];

    /// Name of the FMI getter for this kind, e.g. `fmi3GetFloat64`.
    pub fn getter_name(self) -> &'static str {
        match self {
            ValueKind::Float32 => "fmi3GetFloat32",
            ValueKind::Float64 => "fmi3GetFloat64",
            ValueKind::Int8 => "fmi3GetInt8",
            ValueKind::UInt8 => "fmi3GetUInt8",
            ValueKind::Int16 => "fmi3GetInt16",
            ValueKind::UInt16 => "fmi3GetUInt16",
            ValueKind::Int32 => "fmi3GetInt32",
            ValueKind::UInt32 => "fmi3GetUInt32",
            ValueKind::Int64 => "fmi3GetInt64",
            ValueKind::UInt64 => "fmi3GetUInt64",
            ValueKind::Boolean => "fmi3GetBoolean",
            ValueKind::String => "fmi3GetString",
            ValueKind::Binary => "fmi3GetBinary",
            ValueKind::Clock => "fmi3GetClock",
        }
    }

    /// Name of the FMI setter for this kind, e.g. `fmi3SetFloat64`.
    pub fn setter_name(self) -> &'static str {
        match self {
            ValueKind::Float32 => "fmi3SetFloat32",
            ValueKind::Float64 => "fmi3SetFloat64",
            ValueKind::Int8 => "fmi3SetInt8",
            ValueKind::UInt8 => "fmi3SetUInt8",
            ValueKind::Int16 => "fmi3SetInt16",
            ValueKind::UInt16 => "fmi3SetUInt16",
            ValueKind::Int32 => "fmi3SetInt32",
            ValueKind::UInt32 => "fmi3SetUInt32",
            ValueKind::Int64 => "fmi3SetInt64",
            ValueKind::UInt64 => "fmi3SetUInt64",
            ValueKind::Boolean => "fmi3SetBoolean",
            ValueKind::String => "fmi3SetString",
            ValueKind::Binary => "fmi3SetBinary",
            ValueKind::Clock => "fmi3SetClock",
        }
    }
}

impl std::fmt::Display for ValueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// An ordered array of values of a single kind.
///
/// Order is positional: element `i` belongs to the `i`-th value reference of
/// the request that produced or consumes it. Binary elements carry their own
/// length, strings are UTF-8 without a terminator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Values {
    Float32(Vec<f32>),
    Float64(Vec<f64>),
    Int8(Vec<i8>),
    UInt8(Vec<u8>),
    Int16(Vec<i16>),
    UInt16(Vec<u16>),
    Int32(Vec<i32>),
    UInt32(Vec<u32>),
    Int64(Vec<i64>),
    UInt64(Vec<u64>),
    Boolean(Vec<bool>),
    String(Vec<String>),
    Binary(Vec<Vec<u8>>),
    Clock(Vec<bool>),
}

macro_rules! for_each_variant {
    ($values:expr, $v:ident => $body:expr) => {
        match $values {
            Values::Float32($v) => $body,
            Values::Float64($v) => $body,
            Values::Int8($v) => $body,
            Values::UInt8($v) => $body,
            Values::Int16($v) => $body,
            Values::UInt16($v) => $body,
            Values::Int32($v) => $body,
            Values::UInt32($v) => $body,
            Values::Int64($v) => $body,
            Values::UInt64($v) => $body,
            Values::Boolean($v) => $body,
            Values::String($v) => $body,
            Values::Binary($v) => $body,
            Values::Clock($v) => $body,
        }
    };
}

macro_rules! map_variant {
    ($values:expr, $v:ident => $body:expr) => {
        match $values {
            Values::Float32($v) => Values::Float32($body),
            Values::Float64($v) => Values::Float64($body),
            Values::Int8($v) => Values::Int8($body),
            Values::UInt8($v) => Values::UInt8($body),
            Values::Int16($v) => Values::Int16($body),
            Values::UInt16($v) => Values::UInt16($body),
            Values::Int32($v) => Values::Int32($body),
            Values::UInt32($v) => Values::UInt32($body),
            Values::Int64($v) => Values::Int64($body),
            Values::UInt64($v) => Values::UInt64($body),
            Values::Boolean($v) => Values::Boolean($body),
            Values::String($v) => Values::String($body),
            Values::Binary($v) => Values::Binary($body),
            Values::Clock($v) => Values::Clock($body),
        }
    };
}

impl Values {
    /// An empty array of the given kind.
    pub fn empty(kind: ValueKind) -> Self {
        match kind {
            ValueKind::Float32 => Values::Float32(Vec::new()),
            ValueKind::Float64 => Values::Float64(Vec::new()),
            ValueKind::Int8 => Values::Int8(Vec::new()),
            ValueKind::UInt8 => Values::UInt8(Vec::new()),
            ValueKind::Int16 => Values::Int16(Vec::new()),
            ValueKind::UInt16 => Values::UInt16(Vec::new()),
            ValueKind::Int32 => Values::Int32(Vec::new()),
            ValueKind::UInt32 => Values::UInt32(Vec::new()),
            ValueKind::Int64 => Values::Int64(Vec::new()),
            ValueKind::UInt64 => Values::UInt64(Vec::new()),
            ValueKind::Boolean => Values::Boolean(Vec::new()),
            ValueKind::String => Values::String(Vec::new()),
            ValueKind::Binary => Values::Binary(Vec::new()),
            ValueKind::Clock => Values::Clock(Vec::new()),
        }
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Values::Float32(_) => ValueKind::Float32,
            Values::Float64(_) => ValueKind::Float64,
            Values::Int8(_) => ValueKind::Int8,
            Values::UInt8(_) => ValueKind::UInt8,
            Values::Int16(_) => ValueKind::Int16,
            Values::UInt16(_) => ValueKind::UInt16,
            Values::Int32(_) => ValueKind::Int32,
            Values::UInt32(_) => ValueKind::UInt32,
            Values::Int64(_) => ValueKind::Int64,
            Values::UInt64(_) => ValueKind::UInt64,
            Values::Boolean(_) => ValueKind::Boolean,
            Values::String(_) => ValueKind::String,
            Values::Binary(_) => ValueKind::Binary,
            Values::Clock(_) => ValueKind::Clock,
        }
    }

    pub fn len(&self) -> usize {
        for_each_variant!(self, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keep at most `len` leading elements.
    pub fn truncate(&mut self, len: usize) {
        for_each_variant!(self, v => v.truncate(len))
    }

    /// The single element at `index`, as a one-element array of the same kind.
    pub fn element(&self, index: usize) -> Option<Values> {
        if index >= self.len() {
            return None;
        }
        Some(map_variant!(self, v => v[index..=index].to_vec()))
    }

    /// Move the elements of `other` onto the end of `self`.
    pub fn append(&mut self, other: Values) -> Result<(), WireError> {
        match (self, other) {
            (Values::Float32(a), Values::Float32(b)) => a.extend(b),
            (Values::Float64(a), Values::Float64(b)) => a.extend(b),
            (Values::Int8(a), Values::Int8(b)) => a.extend(b),
            (Values::UInt8(a), Values::UInt8(b)) => a.extend(b),
            (Values::Int16(a), Values::Int16(b)) => a.extend(b),
            (Values::UInt16(a), Values::UInt16(b)) => a.extend(b),
            (Values::Int32(a), Values::Int32(b)) => a.extend(b),
            (Values::UInt32(a), Values::UInt32(b)) => a.extend(b),
            (Values::Int64(a), Values::Int64(b)) => a.extend(b),
            (Values::UInt64(a), Values::UInt64(b)) => a.extend(b),
            (Values::Boolean(a), Values::Boolean(b)) => a.extend(b),
            (Values::String(a), Values::String(b)) => a.extend(b),
            (Values::Binary(a), Values::Binary(b)) => a.extend(b),
            (Values::Clock(a), Values::Clock(b)) => a.extend(b),
            (this, other) => {
                return Err(WireError::KindMismatch {
                    expected: this.kind(),
                    found: other.kind(),
                })
            }
        }
        Ok(())
    }

    /// Build a scalar array of `kind` from a plain vector.
    ///
    /// Returns `None` when `T` is not the element type of `kind`.
    pub fn from_scalars<T: Scalar>(kind: ValueKind, values: Vec<T>) -> Option<Self> {
        T::into_values(kind, values)
    }

    /// Take the elements out as a plain vector, if they are of type `T`.
    pub fn into_scalars<T: Scalar>(self) -> Option<Vec<T>> {
        T::from_values(self)
    }

    /// Borrow the elements as a slice, if they are of type `T`.
    pub fn as_scalars<T: Scalar>(&self) -> Option<&[T]> {
        T::slice_of(self)
    }
}

/// Element types that travel as a plain copyable array.
///
/// Implemented for the ten numeric kinds and for `bool`, which backs both
/// `Boolean` and `Clock`. Strings and binaries have their own ownership rules
/// and are handled separately.
pub trait Scalar: Copy + Default + Send + 'static {
    fn into_values(kind: ValueKind, values: Vec<Self>) -> Option<Values>;
    fn from_values(values: Values) -> Option<Vec<Self>>;
    fn slice_of(values: &Values) -> Option<&[Self]>;
}

macro_rules! numeric_scalar {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl Scalar for $ty {
                fn into_values(kind: ValueKind, values: Vec<Self>) -> Option<Values> {
                    (kind == ValueKind::$variant).then(|| Values::$variant(values))
                }

                fn from_values(values: Values) -> Option<Vec<Self>> {
                    match values {
                        Values::$variant(v) => Some(v),
                        _ => None,
                    }
                }

                fn slice_of(values: &Values) -> Option<&[Self]> {
                    match values {
                        Values::$variant(v) => Some(v.as_slice()),
                        _ => None,
                    }
                }
            }
        )*
    };
}

numeric_scalar! {
    f32 => Float32,
    f64 => Float64,
    i8 => Int8,
    u8 => UInt8,
    i16 => Int16,
    u16 => UInt16,
    i32 => Int32,
    u32 => UInt32,
    i64 => Int64,
    u64 => UInt64,
}

impl Scalar for bool {
    fn into_values(kind: ValueKind, values: Vec<Self>) -> Option<Values> {
        match kind {
            ValueKind::Boolean => Some(Values::Boolean(values)),
            ValueKind::Clock => Some(Values::Clock(values)),
            _ => None,
        }
    }

    fn from_values(values: Values) -> Option<Vec<Self>> {
        match values {
            Values::Boolean(v) | Values::Clock(v) => Some(v),
            _ => None,
        }
    }

    fn slice_of(values: &Values) -> Option<&[Self]> {
        match values {
            Values::Boolean(v) | Values::Clock(v) => Some(v.as_slice()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_names_follow_fmi() {
        assert_eq!(ValueKind::Float64.getter_name(), "fmi3GetFloat64");
        assert_eq!(ValueKind::UInt16.setter_name(), "fmi3SetUInt16");
        for kind in ValueKind::ALL {
            assert!(kind.getter_name().ends_with(&kind.to_string()));
            assert!(kind.setter_name().ends_with(&kind.to_string()));
        }
    }

    #[test]
    fn empty_has_matching_kind() {
        for kind in ValueKind::ALL {
            let values = Values::empty(kind);
            assert_eq!(values.kind(), kind);
            assert!(values.is_empty());
        }
    }

    #[test]
    fn scalars_respect_kind() {
        let values = Values::from_scalars(ValueKind::Float64, vec![1.0_f64, 2.5]).unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(values.into_scalars::<f64>().unwrap(), vec![1.0, 2.5]);

        assert!(Values::from_scalars(ValueKind::Int32, vec![1.0_f64]).is_none());
        assert!(Values::Int32(vec![1]).into_scalars::<i64>().is_none());
    }

    #[test]
    fn bool_backs_boolean_and_clock() {
        let clock = Values::from_scalars(ValueKind::Clock, vec![true, false]).unwrap();
        assert_eq!(clock.kind(), ValueKind::Clock);
        let boolean = Values::from_scalars(ValueKind::Boolean, vec![true]).unwrap();
        assert_eq!(boolean.kind(), ValueKind::Boolean);
        assert_eq!(clock.into_scalars::<bool>().unwrap(), vec![true, false]);
    }

    #[test]
    fn element_and_append_rebuild_an_array() {
        let source = Values::Binary(vec![vec![1], vec![2, 2], vec![]]);
        let mut rebuilt = Values::empty(ValueKind::Binary);
        for i in (0..source.len()).rev() {
            rebuilt.append(source.element(i).unwrap()).unwrap();
        }
        assert_eq!(rebuilt, Values::Binary(vec![vec![], vec![2, 2], vec![1]]));
        assert!(source.element(3).is_none());
    }

    #[test]
    fn append_rejects_other_kind() {
        let mut values = Values::Int8(vec![1]);
        let err = values.append(Values::UInt8(vec![1])).unwrap_err();
        assert!(matches!(
            err,
            WireError::KindMismatch {
                expected: ValueKind::Int8,
                found: ValueKind::UInt8
            }
        ));
    }

    #[test]
    fn truncate_keeps_prefix() {
        let mut values = Values::String(vec!["a".into(), "b".into(), "c".into()]);
        values.truncate(2);
        assert_eq!(values, Values::String(vec!["a".into(), "b".into()]));
    }
}
