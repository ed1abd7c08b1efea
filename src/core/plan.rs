//! # Member Plans
//!
//! A [`TypePlan`] is the per-type recipe the graph serializer interprets: the
//! ordered list of members with their type tag, optional flag and accessors.
//! Plans are built once per type from [`GraphObject::describe`] and memoized in
//! a [`PlanCache`] owned by the serializer.
//!
//! Members are sorted by name, so the wire layout does not depend on the order
//! in which `describe` lists them.
//!
//! ```rust
//! use objwire::core::plan::{GraphObject, PlanBuilder, PlanCache, TypeTag};
//! use std::sync::Arc;
//!
//! #[derive(Default)]
//! struct Person {
//!     name: Option<Arc<str>>,
//!     age: i32,
//! }
//!
//! impl GraphObject for Person {
//!     const TYPE_NAME: &'static str = "Person";
//!
//!     fn describe(plan: &mut PlanBuilder<Self>) {
//!         plan.required("name", |p| &p.name, |p| &mut p.name)
//!             .required("age", |p| &p.age, |p| &mut p.age);
//!     }
//! }
//!
//! let cache = PlanCache::new();
//! let plan = cache.plan::<Person>().unwrap();
//! let names: Vec<_> = plan.members().map(|m| m.name).collect();
//! assert_eq!(names, ["age", "name"]);
//! assert_eq!(plan.members().next().unwrap().tag, TypeTag::Primitive);
//! ```

use crate::core::serialization::{GraphReader, GraphValue, GraphWriter};
use crate::error::{constants, ProtocolError, Result};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Closed classification of member types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    /// Fixed-width scalar.
    Primitive,
    /// Nested serializable object.
    Object,
    /// Length-prefixed UTF-8 text behind a reference id.
    String,
    List,
    Array,
    Dict,
    /// Enum written by symbolic name.
    Enum,
    /// Optional value type written as presence flag plus value.
    Nullable,
}

impl TypeTag {
    /// Tag of `Option<Self>`: reference types stay as they are (null is id 0),
    /// value types become [`TypeTag::Nullable`].
    pub const fn nullable(self) -> Self {
        match self {
            TypeTag::Primitive | TypeTag::Enum | TypeTag::Nullable => TypeTag::Nullable,
            other => other,
        }
    }

    pub const fn is_reference(self) -> bool {
        matches!(
            self,
            TypeTag::Object | TypeTag::String | TypeTag::List | TypeTag::Array | TypeTag::Dict
        )
    }
}

/// A class-shaped type the graph serializer can walk member by member.
pub trait GraphObject: Default + Send + Sync + 'static {
    /// Name used in diagnostics.
    const TYPE_NAME: &'static str;

    /// List the serializable members. Called once per type per [`PlanCache`].
    fn describe(plan: &mut PlanBuilder<Self>);
}

/// Public description of one planned member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberInfo {
    pub name: &'static str,
    pub tag: TypeTag,
    pub optional: bool,
}

type WriteFn<T> = Box<dyn Fn(&T, &mut GraphWriter<'_>) -> Result<()> + Send + Sync>;
type ReadFn<T> = Box<dyn Fn(&mut T, &mut GraphReader<'_>) -> Result<()> + Send + Sync>;

struct MemberPlan<T> {
    info: MemberInfo,
    write: WriteFn<T>,
    read: ReadFn<T>,
}

/// Collects members while a [`GraphObject`] describes itself.
pub struct PlanBuilder<T> {
    members: Vec<MemberPlan<T>>,
}

impl<T: GraphObject> PlanBuilder<T> {
    fn new() -> Self {
        Self {
            members: Vec::new(),
        }
    }

    /// A member that must not be null on either side of the wire.
    pub fn required<F: GraphValue>(
        &mut self,
        name: &'static str,
        get: fn(&T) -> &F,
        get_mut: fn(&mut T) -> &mut F,
    ) -> &mut Self {
        self.member(name, false, get, get_mut)
    }

    /// A member that may be null; absent values round-trip as `None`.
    pub fn optional<F: GraphValue>(
        &mut self,
        name: &'static str,
        get: fn(&T) -> &F,
        get_mut: fn(&mut T) -> &mut F,
    ) -> &mut Self {
        self.member(name, true, get, get_mut)
    }

    fn member<F: GraphValue>(
        &mut self,
        name: &'static str,
        optional: bool,
        get: fn(&T) -> &F,
        get_mut: fn(&mut T) -> &mut F,
    ) -> &mut Self {
        let write: WriteFn<T> = Box::new(move |obj: &T, w: &mut GraphWriter<'_>| {
            let value = get(obj);
            if !optional && value.is_null() {
                return Err(ProtocolError::MissingRequiredMember {
                    type_name: T::TYPE_NAME.into(),
                    member: name.into(),
                });
            }
            value.write_value(w)
        });

        let read: ReadFn<T> = Box::new(move |obj: &mut T, r: &mut GraphReader<'_>| {
            let value = match F::read_value(r) {
                Ok(value) => value,
                Err(ProtocolError::UnexpectedNull(what)) => {
                    return Err(null_inside(T::TYPE_NAME, name, &what))
                }
                Err(e) => return Err(e),
            };
            if !optional && value.is_null() {
                return Err(null_member(T::TYPE_NAME, name));
            }
            *get_mut(obj) = value;
            Ok(())
        });

        self.members.push(MemberPlan {
            info: MemberInfo {
                name,
                tag: F::TAG,
                optional,
            },
            write,
            read,
        });
        self
    }

    fn finish(mut self) -> Result<TypePlan<T>> {
        self.members.sort_by(|a, b| a.info.name.cmp(b.info.name));
        if let Some(pair) = self
            .members
            .windows(2)
            .find(|pair| pair[0].info.name == pair[1].info.name)
        {
            return Err(ProtocolError::ConfigError(format!(
                "duplicate member '{}' in {}",
                pair[0].info.name,
                T::TYPE_NAME
            )));
        }
        Ok(TypePlan {
            type_name: T::TYPE_NAME,
            members: self.members,
        })
    }
}

fn null_member(type_name: &str, member: &str) -> ProtocolError {
    ProtocolError::DataIntegrity(format!("required member '{type_name}.{member}' is null"))
}

fn null_inside(type_name: &str, member: &str, what: &str) -> ProtocolError {
    ProtocolError::DataIntegrity(format!("null {what} in member '{type_name}.{member}'"))
}

/// Ordered member recipe for one type.
pub struct TypePlan<T> {
    type_name: &'static str,
    members: Vec<MemberPlan<T>>,
}

impl<T> TypePlan<T> {
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Members in wire order.
    pub fn members(&self) -> impl Iterator<Item = MemberInfo> + '_ {
        self.members.iter().map(|m| m.info)
    }

    pub(crate) fn write(&self, obj: &T, w: &mut GraphWriter<'_>) -> Result<()> {
        for member in &self.members {
            (member.write)(obj, w)?;
        }
        Ok(())
    }

    pub(crate) fn read(&self, obj: &mut T, r: &mut GraphReader<'_>) -> Result<()> {
        for member in &self.members {
            (member.read)(obj, r)?;
        }
        Ok(())
    }
}

/// Memoized plans keyed by type.
#[derive(Default)]
pub struct PlanCache {
    plans: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl PlanCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the plan for `T`, building it on first use.
    pub fn plan<T: GraphObject>(&self) -> Result<Arc<TypePlan<T>>> {
        let key = TypeId::of::<T>();
        let cached = self
            .plans
            .read()
            .map_err(|_| ProtocolError::Custom(constants::ERR_LOCK_POISONED.into()))?
            .get(&key)
            .cloned();
        if let Some(plan) = cached {
            return downcast_plan(plan);
        }

        let mut builder = PlanBuilder::<T>::new();
        T::describe(&mut builder);
        let built: Arc<dyn Any + Send + Sync> = Arc::new(builder.finish()?);

        let plan = self
            .plans
            .write()
            .map_err(|_| ProtocolError::Custom(constants::ERR_LOCK_POISONED.into()))?
            .entry(key)
            .or_insert(built)
            .clone();
        downcast_plan(plan)
    }

    /// Number of types planned so far.
    pub fn len(&self) -> usize {
        self.plans.read().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn downcast_plan<T: GraphObject>(plan: Arc<dyn Any + Send + Sync>) -> Result<Arc<TypePlan<T>>> {
    plan.downcast::<TypePlan<T>>().map_err(|_| {
        ProtocolError::Custom(format!("plan cache entry for {} has wrong type", T::TYPE_NAME))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::graph::List;

    #[derive(Default)]
    struct Sample {
        zeta: i32,
        alpha: Option<Arc<str>>,
        items: Option<List<i64>>,
        score: Option<f64>,
    }

    impl GraphObject for Sample {
        const TYPE_NAME: &'static str = "Sample";

        fn describe(plan: &mut PlanBuilder<Self>) {
            plan.required("zeta", |s| &s.zeta, |s| &mut s.zeta)
                .required("alpha", |s| &s.alpha, |s| &mut s.alpha)
                .optional("items", |s| &s.items, |s| &mut s.items)
                .optional("score", |s| &s.score, |s| &mut s.score);
        }
    }

    #[derive(Default)]
    struct Duplicated {
        a: i32,
    }

    impl GraphObject for Duplicated {
        const TYPE_NAME: &'static str = "Duplicated";

        fn describe(plan: &mut PlanBuilder<Self>) {
            plan.required("a", |d| &d.a, |d| &mut d.a)
                .required("a", |d| &d.a, |d| &mut d.a);
        }
    }

    #[test]
    fn test_members_sorted_and_classified() {
        let cache = PlanCache::new();
        let plan = cache.plan::<Sample>().unwrap();
        let members: Vec<_> = plan.members().collect();
        let names: Vec<_> = members.iter().map(|m| m.name).collect();
        assert_eq!(names, ["alpha", "items", "score", "zeta"]);
        assert_eq!(members[0].tag, TypeTag::String);
        assert!(!members[0].optional);
        assert_eq!(members[1].tag, TypeTag::List);
        assert_eq!(members[2].tag, TypeTag::Nullable);
        assert_eq!(members[3].tag, TypeTag::Primitive);
    }

    #[test]
    fn test_plan_built_once() {
        let cache = PlanCache::new();
        let first = cache.plan::<Sample>().unwrap();
        let second = cache.plan::<Sample>().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_duplicate_member_rejected() {
        let cache = PlanCache::new();
        assert!(matches!(
            cache.plan::<Duplicated>(),
            Err(ProtocolError::ConfigError(_))
        ));
    }

    #[test]
    fn test_nullable_tags() {
        assert_eq!(TypeTag::Primitive.nullable(), TypeTag::Nullable);
        assert_eq!(TypeTag::Enum.nullable(), TypeTag::Nullable);
        assert_eq!(TypeTag::List.nullable(), TypeTag::List);
        assert!(TypeTag::Dict.is_reference());
        assert!(!TypeTag::Nullable.is_reference());
    }
}
