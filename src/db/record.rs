//! Record shapes.
//!
//! A record shape is the registration-time description of how a Rust struct
//! maps onto result columns: an ordered list of fields, each with a logical
//! name, an optional column-name override, a transient marker and a typed
//! getter/setter pair. Shapes are declared by implementing [`Record`].

use crate::db::macros::impl_record_set;
use crate::error::{DbError, DbResult};
use crate::models::{FieldType, SqlValue, Value};

type Getter<R> = Box<dyn Fn(&R) -> Value + Send + Sync>;
type Setter<R> = Box<dyn Fn(&mut R, Value) -> Result<(), String> + Send + Sync>;

/// Metadata and accessors for one field of a record shape.
pub struct FieldDescriptor<R> {
    name: &'static str,
    column: Option<&'static str>,
    transient: bool,
    field_type: FieldType,
    get: Getter<R>,
    set: Setter<R>,
}

impl<R: 'static> FieldDescriptor<R> {
    /// Describe a field through its accessors. Usually built with [`field!`](crate::field).
    pub fn new<T: SqlValue + 'static>(
        name: &'static str,
        get: fn(&R) -> &T,
        get_mut: fn(&mut R) -> &mut T,
    ) -> Self {
        Self {
            name,
            column: None,
            transient: false,
            field_type: T::FIELD_TYPE,
            get: Box::new(move |record: &R| get(record).to_value()),
            set: Box::new(move |record: &mut R, value: Value| {
                *get_mut(record) = T::from_value(value)?;
                Ok(())
            }),
        }
    }
}

impl<R> FieldDescriptor<R> {
    /// Match result columns against `column` instead of the field name.
    pub fn column(mut self, column: &'static str) -> Self {
        self.column = Some(column);
        self
    }

    /// Never fill this field from a result column.
    pub fn transient(mut self) -> Self {
        self.transient = true;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn column_override(&self) -> Option<&'static str> {
        self.column
    }

    pub fn is_transient(&self) -> bool {
        self.transient
    }

    pub fn field_type(&self) -> FieldType {
        self.field_type
    }

    /// Lower-cased name used for column lookup; the override wins over the field name.
    pub fn lookup_key(&self) -> String {
        self.column.unwrap_or(self.name).to_lowercase()
    }

    pub fn read(&self, record: &R) -> Value {
        (self.get)(record)
    }

    pub fn write(&self, record: &mut R, value: Value) -> Result<(), String> {
        (self.set)(record, value)
    }
}

impl<R> std::fmt::Debug for FieldDescriptor<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("name", &self.name)
            .field("column", &self.column)
            .field("transient", &self.transient)
            .field("field_type", &self.field_type)
            .finish_non_exhaustive()
    }
}

/// Position-independent summary of one field, used to lay out scan slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSlot {
    pub record: &'static str,
    pub field: &'static str,
    pub field_type: FieldType,
    pub transient: bool,
}

/// A named, ordered set of fields describing one row's in-memory representation.
#[derive(Debug)]
pub struct RecordShape<R> {
    name: &'static str,
    fields: Vec<FieldDescriptor<R>>,
}

impl<R> RecordShape<R> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            fields: Vec::new(),
        }
    }

    /// Append a field in declaration order.
    pub fn with(mut self, field: FieldDescriptor<R>) -> Self {
        self.fields.push(field);
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn fields(&self) -> &[FieldDescriptor<R>] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn slots(&self) -> Vec<FieldSlot> {
        self.fields
            .iter()
            .map(|f| FieldSlot {
                record: self.name,
                field: f.name,
                field_type: f.field_type,
                transient: f.transient,
            })
            .collect()
    }

    /// Store a scanned value into the field at `index`.
    pub(crate) fn assign(&self, record: &mut R, index: usize, value: Value) -> DbResult<()> {
        let field = self.fields.get(index).ok_or_else(|| {
            DbError::internal(format!("Field index {} out of range for {}", index, self.name))
        })?;
        field
            .write(record, value)
            .map_err(|e| DbError::mapping(format!("field '{}': {}", field.name, e), self.name))
    }

    /// Field values from `offset` onward, in declaration order.
    ///
    /// Transient fields are included: the marker only governs reads from rows.
    pub fn values_from(&self, record: &R, offset: usize) -> DbResult<Vec<Value>> {
        if offset > self.fields.len() {
            return Err(DbError::mapping(
                format!(
                    "Field offset {} exceeds field count {}",
                    offset,
                    self.fields.len()
                ),
                self.name,
            ));
        }
        Ok(self.fields[offset..].iter().map(|f| f.read(record)).collect())
    }
}

impl<R: Default> RecordShape<R> {
    /// Build a fresh record from one value per declared field, in order.
    ///
    /// Values for transient fields are consumed to keep alignment, then dropped.
    pub(crate) fn assemble(&self, values: &mut impl Iterator<Item = Value>) -> DbResult<R> {
        let mut record = R::default();
        for (index, field) in self.fields.iter().enumerate() {
            let value = values.next().ok_or_else(|| {
                DbError::mapping("Row has fewer values than record fields", self.name)
            })?;
            if field.transient {
                continue;
            }
            self.assign(&mut record, index, value)?;
        }
        Ok(record)
    }
}

/// A Rust type with a registered record shape.
pub trait Record: Default + Send + Sized + 'static {
    fn shape() -> RecordShape<Self>;
}

/// An ordered group of record shapes filled from one joined row.
///
/// Implemented for tuples of up to six `Record` types.
pub trait RecordSet: Sized + Send + 'static {
    type Shapes: Send + Sync;

    fn shapes() -> Self::Shapes;

    /// Every field of every shape, flattened in shape order.
    fn slots(shapes: &Self::Shapes) -> Vec<FieldSlot>;

    /// Build one instance per shape from a row's flattened values.
    fn assemble(shapes: &Self::Shapes, values: Vec<Value>) -> DbResult<Self>;
}

impl_record_set!(A);
impl_record_set!(A, B);
impl_record_set!(A, B, C);
impl_record_set!(A, B, C, D);
impl_record_set!(A, B, C, D, E);
impl_record_set!(A, B, C, D, E, F);
