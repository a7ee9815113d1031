//! Declarative macros for record shape registration.
//!
//! `field!` builds a typed [`FieldDescriptor`](crate::db::record::FieldDescriptor)
//! from a struct field, generating the getter/setter pair at compile time.
//! `impl_record_set!` implements the multi-shape `RecordSet` trait for tuples.

/// Build a field descriptor for `$record.$field`.
///
/// # Example
///
/// ```ignore
/// RecordShape::new("Customer")
///     .with(field!(Customer, id))
///     .with(field!(Customer, name).column("customer_name"))
///     .with(field!(Customer, is_active).transient())
/// ```
#[macro_export]
macro_rules! field {
    ($record:ty, $field:ident) => {
        $crate::db::record::FieldDescriptor::<$record>::new(
            stringify!($field),
            |record| &record.$field,
            |record| &mut record.$field,
        )
    };
}

/// Implement `RecordSet` for a tuple of `Record` types.
///
/// The type parameter names double as bindings for the per-shape values when
/// destructuring the shape tuple.
macro_rules! impl_record_set {
    ($($record:ident),+) => {
        impl<$($record: $crate::db::record::Record),+> $crate::db::record::RecordSet
            for ($($record,)+)
        {
            type Shapes = ($($crate::db::record::RecordShape<$record>,)+);

            fn shapes() -> Self::Shapes {
                ($($record::shape(),)+)
            }

            #[allow(non_snake_case)]
            fn slots(shapes: &Self::Shapes) -> Vec<$crate::db::record::FieldSlot> {
                let ($($record,)+) = shapes;
                let mut slots = Vec::new();
                $(slots.extend($record.slots());)+
                slots
            }

            #[allow(non_snake_case)]
            fn assemble(
                shapes: &Self::Shapes,
                values: Vec<$crate::models::Value>,
            ) -> $crate::error::DbResult<Self> {
                let ($($record,)+) = shapes;
                let mut values = values.into_iter();
                Ok(($($record.assemble(&mut values)?,)+))
            }
        }
    };
}

pub(crate) use impl_record_set;
