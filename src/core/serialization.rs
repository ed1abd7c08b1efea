//! # Graph Serialization
//!
//! Converts object graphs (shared references, cycles, nulls) to and from a
//! compact binary form and back with identity preserved.
//!
//! ## Wire Format
//! ```text
//! primitive        fixed-width little-endian value
//! nullable value   [present: bool] [value if present]
//! enum             [name: string]
//! reference        [id: i32]  0 = null
//!                  first sight of an instance: id = count + 1, followed by payload
//!                  later sights: id only
//! string payload   [len: i32] [utf-8 bytes]
//! list/array       [count: i32] [element...]
//! dict             [count: i32] [key, value...]
//! object           members in name order
//! ```
//!
//! Every reference is registered before its payload is written or populated,
//! which is what lets cycles terminate: a back-edge finds the id already
//! assigned and writes four bytes.
//!
//! ## Usage
//! ```rust
//! use objwire::core::graph::List;
//! use objwire::core::serialization::Serializer;
//!
//! let serializer = Serializer::new();
//! let list = List::from(vec![1i32, 2, 3]);
//! let bytes = serializer.serialize(&list).unwrap();
//! let back: List<i32> = serializer.deserialize(bytes).unwrap();
//! assert_eq!(*back.read(), vec![1, 2, 3]);
//! ```

use crate::core::graph::{Array, Dict, List, Obj};
use crate::core::identity::{ReadCache, Registration, WriteCache, NULL_ID};
use crate::core::packer::Packer;
use crate::core::plan::{GraphObject, PlanCache, TypeTag};
use crate::core::primitives::{Decimal, Timestamp};
use crate::error::{constants, ProtocolError, Result};
use bytes::{Bytes, BytesMut};
use std::any::Any;
use std::hash::Hash;
use std::sync::Arc;
use uuid::Uuid;

/// Upper bound for capacity reserved up front from an untrusted count.
const MAX_PREALLOCATION: usize = 1024;

/// Tag a null found inside a container with the element's position.
fn at_element(err: ProtocolError, kind: &str, index: usize) -> ProtocolError {
    match err {
        ProtocolError::UnexpectedNull(what) => {
            ProtocolError::UnexpectedNull(format!("{what} at {kind}[{index}]"))
        }
        other => other,
    }
}

/// A type with a graph encoding.
pub trait GraphValue: Sized + Send + Sync + 'static {
    const TAG: TypeTag;

    fn write_value(&self, w: &mut GraphWriter<'_>) -> Result<()>;

    fn read_value(r: &mut GraphReader<'_>) -> Result<Self>;

    /// True when this value is the null of its type.
    fn is_null(&self) -> bool {
        false
    }

    /// Encoding of `Option<Self>`. Value types write a presence flag;
    /// reference types override this to write id 0.
    fn write_option(value: Option<&Self>, w: &mut GraphWriter<'_>) -> Result<()> {
        match value {
            Some(value) => {
                w.packer().write_bool(true);
                value.write_value(w)
            }
            None => {
                w.packer().write_bool(false);
                Ok(())
            }
        }
    }

    fn read_option(r: &mut GraphReader<'_>) -> Result<Option<Self>> {
        if r.packer().read_bool()? {
            Self::read_value(r).map(Some)
        } else {
            Ok(None)
        }
    }
}

/// A reference type written through the identity cache.
pub trait GraphRef: Sized {
    /// What the read cache holds for this type.
    type Stored: Any + Send + Clone;

    /// Name used when a null shows up where a value was required.
    const KIND: &'static str;

    /// Observable identity. `None` means every occurrence is a new instance.
    fn identity(&self) -> Option<usize>;

    fn write_payload(&self, w: &mut GraphWriter<'_>) -> Result<()>;

    /// Allocate the instance, register it under `id` via
    /// [`GraphReader::register`], then populate it.
    fn read_payload(r: &mut GraphReader<'_>, id: i32) -> Result<Self>;

    fn from_stored(stored: Self::Stored) -> Self;
}

/// Write side of one serialization pass.
pub struct GraphWriter<'a> {
    packer: Packer<&'a mut BytesMut>,
    cache: WriteCache,
    plans: &'a PlanCache,
}

impl<'a> GraphWriter<'a> {
    pub fn new(buf: &'a mut BytesMut, plans: &'a PlanCache) -> Self {
        Self {
            packer: Packer::new(buf),
            cache: WriteCache::new(),
            plans,
        }
    }

    pub fn packer(&mut self) -> &mut Packer<&'a mut BytesMut> {
        &mut self.packer
    }

    pub fn plans(&self) -> &'a PlanCache {
        self.plans
    }

    pub fn write<V: GraphValue>(&mut self, value: &V) -> Result<()> {
        value.write_value(self)
    }

    /// Write a reference: id 0 for null, the cached id for a repeat, or a
    /// fresh id followed by the payload.
    pub fn write_ref<R: GraphRef>(&mut self, value: Option<&R>) -> Result<()> {
        let Some(value) = value else {
            self.packer.write_i32(NULL_ID);
            return Ok(());
        };
        match self.cache.register(value.identity())? {
            Registration::Existing(id) => {
                self.packer.write_i32(id);
                Ok(())
            }
            Registration::Assigned(id) => {
                self.packer.write_i32(id);
                value.write_payload(self)
            }
        }
    }

    /// Write an element count.
    pub fn write_count(&mut self, count: usize) -> Result<()> {
        let count = i32::try_from(count).map_err(|_| {
            ProtocolError::InvalidArgument(format!("collection of {count} elements too large"))
        })?;
        self.packer.write_i32(count);
        Ok(())
    }
}

/// Read side of one serialization pass.
pub struct GraphReader<'a> {
    packer: Packer<Bytes>,
    cache: ReadCache,
    plans: &'a PlanCache,
}

impl<'a> GraphReader<'a> {
    pub fn new(bytes: Bytes, plans: &'a PlanCache) -> Self {
        Self {
            packer: Packer::new(bytes),
            cache: ReadCache::new(),
            plans,
        }
    }

    pub fn packer(&mut self) -> &mut Packer<Bytes> {
        &mut self.packer
    }

    pub fn plans(&self) -> &'a PlanCache {
        self.plans
    }

    pub fn read<V: GraphValue>(&mut self) -> Result<V> {
        V::read_value(self)
    }

    /// Make an instance available to later back-references.
    pub fn register<T: Any + Send>(&mut self, id: i32, value: T) {
        self.cache.insert(id, value);
    }

    pub fn read_ref<R: GraphRef>(&mut self) -> Result<Option<R>> {
        let id = self.packer.read_i32()?;
        if id == NULL_ID {
            return Ok(None);
        }
        if id < 0 {
            return Err(ProtocolError::DataIntegrity(format!(
                "{} ({id})",
                constants::ERR_NEGATIVE_ID
            )));
        }
        if let Some(stored) = self.cache.get::<R::Stored>(id)? {
            return Ok(Some(R::from_stored(stored)));
        }
        R::read_payload(self, id).map(Some)
    }

    /// Read an element count, rejecting counts the remaining input cannot hold.
    pub fn read_count(&mut self) -> Result<usize> {
        let count = self.packer.read_len()?;
        if count > self.packer.remaining() {
            return Err(ProtocolError::DataIntegrity(format!(
                "{}: {count} > {}",
                constants::ERR_COUNT_EXCEEDS_INPUT,
                self.packer.remaining()
            )));
        }
        Ok(count)
    }

    /// Fail if any input is left over.
    pub fn finish(&self) -> Result<()> {
        let left = self.packer.remaining();
        if left != 0 {
            return Err(ProtocolError::DataIntegrity(format!(
                "{}: {left}",
                constants::ERR_TRAILING_BYTES
            )));
        }
        Ok(())
    }
}

macro_rules! primitive_value {
    ($($ty:ty => $write:ident, $read:ident;)+) => {
        $(
            impl GraphValue for $ty {
                const TAG: TypeTag = TypeTag::Primitive;

                fn write_value(&self, w: &mut GraphWriter<'_>) -> Result<()> {
                    w.packer().$write(*self);
                    Ok(())
                }

                fn read_value(r: &mut GraphReader<'_>) -> Result<Self> {
                    r.packer().$read()
                }
            }
        )+
    };
}

primitive_value! {
    bool => write_bool, read_bool;
    u8 => write_u8, read_u8;
    i8 => write_i8, read_i8;
    i16 => write_i16, read_i16;
    u16 => write_u16, read_u16;
    i32 => write_i32, read_i32;
    u32 => write_u32, read_u32;
    i64 => write_i64, read_i64;
    u64 => write_u64, read_u64;
    f32 => write_f32, read_f32;
    f64 => write_f64, read_f64;
    Timestamp => write_timestamp, read_timestamp;
}

impl GraphValue for Decimal {
    const TAG: TypeTag = TypeTag::Primitive;

    fn write_value(&self, w: &mut GraphWriter<'_>) -> Result<()> {
        w.packer().write_decimal(self);
        Ok(())
    }

    fn read_value(r: &mut GraphReader<'_>) -> Result<Self> {
        r.packer().read_decimal()
    }
}

impl GraphValue for Uuid {
    const TAG: TypeTag = TypeTag::Primitive;

    fn write_value(&self, w: &mut GraphWriter<'_>) -> Result<()> {
        w.packer().write_guid(self);
        Ok(())
    }

    fn read_value(r: &mut GraphReader<'_>) -> Result<Self> {
        r.packer().read_guid()
    }
}

/// Return value of methods with no result; occupies no bytes.
impl GraphValue for () {
    const TAG: TypeTag = TypeTag::Primitive;

    fn write_value(&self, _w: &mut GraphWriter<'_>) -> Result<()> {
        Ok(())
    }

    fn read_value(_r: &mut GraphReader<'_>) -> Result<Self> {
        Ok(())
    }
}

impl<V: GraphValue> GraphValue for Option<V> {
    const TAG: TypeTag = V::TAG.nullable();

    fn write_value(&self, w: &mut GraphWriter<'_>) -> Result<()> {
        V::write_option(self.as_ref(), w)
    }

    fn read_value(r: &mut GraphReader<'_>) -> Result<Self> {
        V::read_option(r)
    }

    fn is_null(&self) -> bool {
        self.is_none()
    }
}

macro_rules! reference_value {
    ([$($generics:tt)*] $ty:ty, $tag:expr) => {
        impl<$($generics)*> GraphValue for $ty {
            const TAG: TypeTag = $tag;

            fn write_value(&self, w: &mut GraphWriter<'_>) -> Result<()> {
                w.write_ref(Some(self))
            }

            fn read_value(r: &mut GraphReader<'_>) -> Result<Self> {
                r.read_ref::<Self>()?.ok_or_else(|| {
                    ProtocolError::UnexpectedNull(<Self as GraphRef>::KIND.into())
                })
            }

            fn write_option(value: Option<&Self>, w: &mut GraphWriter<'_>) -> Result<()> {
                w.write_ref(value)
            }

            fn read_option(r: &mut GraphReader<'_>) -> Result<Option<Self>> {
                r.read_ref::<Self>()
            }
        }
    };
}

reference_value!([] String, TypeTag::String);
reference_value!([] Arc<str>, TypeTag::String);
reference_value!([E: GraphValue] List<E>, TypeTag::List);
reference_value!([E: GraphValue + Default] Array<E>, TypeTag::Array);
reference_value!([K: GraphValue + Eq + Hash, V: GraphValue] Dict<K, V>, TypeTag::Dict);
reference_value!([T: GraphObject] Obj<T>, TypeTag::Object);

// Owned strings have no observable identity: equal text written twice gets
// two ids.
impl GraphRef for String {
    type Stored = Arc<str>;
    const KIND: &'static str = "string";

    fn identity(&self) -> Option<usize> {
        None
    }

    fn write_payload(&self, w: &mut GraphWriter<'_>) -> Result<()> {
        w.packer().write_string(self)
    }

    fn read_payload(r: &mut GraphReader<'_>, id: i32) -> Result<Self> {
        let text = r.packer().read_string()?;
        r.register::<Arc<str>>(id, Arc::from(text.as_str()));
        Ok(text)
    }

    fn from_stored(stored: Arc<str>) -> Self {
        stored.to_string()
    }
}

impl GraphRef for Arc<str> {
    type Stored = Arc<str>;
    const KIND: &'static str = "string";

    fn identity(&self) -> Option<usize> {
        Some(Arc::as_ptr(self) as *const u8 as usize)
    }

    fn write_payload(&self, w: &mut GraphWriter<'_>) -> Result<()> {
        w.packer().write_string(self)
    }

    fn read_payload(r: &mut GraphReader<'_>, id: i32) -> Result<Self> {
        let text: Arc<str> = Arc::from(r.packer().read_string()?);
        r.register(id, Arc::clone(&text));
        Ok(text)
    }

    fn from_stored(stored: Arc<str>) -> Self {
        stored
    }
}

impl<E: GraphValue> GraphRef for List<E> {
    type Stored = Self;
    const KIND: &'static str = "list";

    fn identity(&self) -> Option<usize> {
        Some(self.address())
    }

    fn write_payload(&self, w: &mut GraphWriter<'_>) -> Result<()> {
        let items = self.read();
        w.write_count(items.len())?;
        for item in items.iter() {
            item.write_value(w)?;
        }
        Ok(())
    }

    fn read_payload(r: &mut GraphReader<'_>, id: i32) -> Result<Self> {
        let count = r.read_count()?;
        let list = List::with_capacity(count.min(MAX_PREALLOCATION));
        r.register(id, list.clone());
        for index in 0..count {
            let item = E::read_value(r).map_err(|e| at_element(e, Self::KIND, index))?;
            list.push(item);
        }
        Ok(list)
    }

    fn from_stored(stored: Self) -> Self {
        stored
    }
}

impl<E: GraphValue + Default> GraphRef for Array<E> {
    type Stored = Self;
    const KIND: &'static str = "array";

    fn identity(&self) -> Option<usize> {
        Some(self.address())
    }

    fn write_payload(&self, w: &mut GraphWriter<'_>) -> Result<()> {
        let items = self.read();
        w.write_count(items.len())?;
        for item in items.iter() {
            item.write_value(w)?;
        }
        Ok(())
    }

    fn read_payload(r: &mut GraphReader<'_>, id: i32) -> Result<Self> {
        let count = r.read_count()?;
        let array = Array::with_len(count);
        r.register(id, array.clone());
        for index in 0..count {
            let item = E::read_value(r).map_err(|e| at_element(e, Self::KIND, index))?;
            array.write()[index] = item;
        }
        Ok(array)
    }

    fn from_stored(stored: Self) -> Self {
        stored
    }
}

impl<K: GraphValue + Eq + Hash, V: GraphValue> GraphRef for Dict<K, V> {
    type Stored = Self;
    const KIND: &'static str = "dictionary";

    fn identity(&self) -> Option<usize> {
        Some(self.address())
    }

    fn write_payload(&self, w: &mut GraphWriter<'_>) -> Result<()> {
        let entries = self.read();
        w.write_count(entries.len())?;
        for (key, value) in entries.iter() {
            key.write_value(w)?;
            value.write_value(w)?;
        }
        Ok(())
    }

    fn read_payload(r: &mut GraphReader<'_>, id: i32) -> Result<Self> {
        let count = r.read_count()?;
        let dict = Dict::with_capacity(count.min(MAX_PREALLOCATION));
        r.register(id, dict.clone());
        for index in 0..count {
            let key = K::read_value(r).map_err(|e| at_element(e, Self::KIND, index))?;
            let value = V::read_value(r).map_err(|e| at_element(e, Self::KIND, index))?;
            dict.insert(key, value);
        }
        Ok(dict)
    }

    fn from_stored(stored: Self) -> Self {
        stored
    }
}

impl<T: GraphObject> GraphRef for Obj<T> {
    type Stored = Self;
    const KIND: &'static str = "object";

    fn identity(&self) -> Option<usize> {
        Some(self.address())
    }

    fn write_payload(&self, w: &mut GraphWriter<'_>) -> Result<()> {
        let plan = w.plans().plan::<T>()?;
        let instance = self.read();
        plan.write(&instance, w)
    }

    fn read_payload(r: &mut GraphReader<'_>, id: i32) -> Result<Self> {
        let plan = r.plans().plan::<T>()?;
        let shell = Obj::new(T::default());
        r.register(id, shell.clone());
        {
            let mut instance = shell.write();
            plan.read(&mut instance, r)?;
        }
        Ok(shell)
    }

    fn from_stored(stored: Self) -> Self {
        stored
    }
}

/// An ordered argument list serialized as one graph.
pub trait Arguments: Sized + Send + 'static {
    fn write_args(&self, w: &mut GraphWriter<'_>) -> Result<()>;

    fn read_args(r: &mut GraphReader<'_>) -> Result<Self>;
}

impl Arguments for () {
    fn write_args(&self, _w: &mut GraphWriter<'_>) -> Result<()> {
        Ok(())
    }

    fn read_args(_r: &mut GraphReader<'_>) -> Result<Self> {
        Ok(())
    }
}

macro_rules! tuple_arguments {
    ($($name:ident),+) => {
        impl<$($name: GraphValue),+> Arguments for ($($name,)+) {
            #[allow(non_snake_case)]
            fn write_args(&self, w: &mut GraphWriter<'_>) -> Result<()> {
                let ($($name,)+) = self;
                $($name.write_value(w)?;)+
                Ok(())
            }

            fn read_args(r: &mut GraphReader<'_>) -> Result<Self> {
                Ok(($($name::read_value(r)?,)+))
            }
        }
    };
}

tuple_arguments!(A);
tuple_arguments!(A, B);
tuple_arguments!(A, B, C);
tuple_arguments!(A, B, C, D);
tuple_arguments!(A, B, C, D, E);
tuple_arguments!(A, B, C, D, E, F);

/// Implements [`GraphValue`] for a fieldless enum, written by variant name.
///
/// Unknown names decode to the enum's `Default`.
///
/// ```rust
/// #[derive(Debug, Default, PartialEq)]
/// enum Color { #[default] Red, Green }
/// objwire::graph_enum!(Color { Red, Green });
///
/// let s = objwire::core::serialization::Serializer::new();
/// let bytes = s.serialize(&Color::Green).unwrap();
/// assert_eq!(s.deserialize::<Color>(bytes).unwrap(), Color::Green);
/// ```
#[macro_export]
macro_rules! graph_enum {
    ($ty:ident { $($variant:ident),+ $(,)? }) => {
        impl $crate::core::serialization::GraphValue for $ty {
            const TAG: $crate::core::plan::TypeTag = $crate::core::plan::TypeTag::Enum;

            fn write_value(
                &self,
                w: &mut $crate::core::serialization::GraphWriter<'_>,
            ) -> $crate::error::Result<()> {
                let name = match self {
                    $($ty::$variant => stringify!($variant),)+
                };
                w.packer().write_string(name)
            }

            fn read_value(
                r: &mut $crate::core::serialization::GraphReader<'_>,
            ) -> $crate::error::Result<Self> {
                let name = r.packer().read_string()?;
                Ok(match name.as_str() {
                    $(stringify!($variant) => $ty::$variant,)+
                    _ => <$ty as ::core::default::Default>::default(),
                })
            }
        }
    };
}

/// Entry point for graph encoding. Cheap to clone; clones share plans.
#[derive(Clone, Default)]
pub struct Serializer {
    plans: Arc<PlanCache>,
}

impl Serializer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_plans(plans: Arc<PlanCache>) -> Self {
        Self { plans }
    }

    pub fn plans(&self) -> &Arc<PlanCache> {
        &self.plans
    }

    pub fn serialize<V: GraphValue>(&self, value: &V) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        self.serialize_into(value, &mut buf)?;
        Ok(buf.freeze())
    }

    pub fn serialize_into<V: GraphValue>(&self, value: &V, buf: &mut BytesMut) -> Result<()> {
        let mut writer = GraphWriter::new(buf, &self.plans);
        value.write_value(&mut writer)
    }

    /// Decode one value, requiring the input to be fully consumed.
    pub fn deserialize<V: GraphValue>(&self, bytes: Bytes) -> Result<V> {
        let mut reader = GraphReader::new(bytes, &self.plans);
        let value = V::read_value(&mut reader)?;
        reader.finish()?;
        Ok(value)
    }

    /// Encode an argument list as a single graph pass.
    pub fn serialize_args<A: Arguments>(&self, args: &A) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        let mut writer = GraphWriter::new(&mut buf, &self.plans);
        args.write_args(&mut writer)?;
        Ok(buf.freeze())
    }

    pub fn deserialize_args<A: Arguments>(&self, bytes: Bytes) -> Result<A> {
        let mut reader = GraphReader::new(bytes, &self.plans);
        let args = A::read_args(&mut reader)?;
        reader.finish()?;
        Ok(args)
    }
}

impl std::fmt::Debug for Serializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Serializer")
            .field("planned_types", &self.plans.len())
            .finish()
    }
}
