//! Lattice type definitions.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::compile::shape::ShapeDescriptor;
use crate::ir::core::FunctionPrototype;

/// Shape component of a table type.
#[derive(Clone)]
pub enum TableShape {
    /// Any table
    Unknown,
    /// Tables built from this shape's compiled layout
    Known(Arc<ShapeDescriptor>),
}

impl TableShape {
    pub fn descriptor(&self) -> Option<&Arc<ShapeDescriptor>> {
        match self {
            TableShape::Unknown => None,
            TableShape::Known(shape) => Some(shape),
        }
    }
}

impl PartialEq for TableShape {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (TableShape::Unknown, TableShape::Unknown) => true,
            (TableShape::Known(a), TableShape::Known(b)) => a.id() == b.id(),
            _ => false,
        }
    }
}

impl Eq for TableShape {}

impl Hash for TableShape {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            TableShape::Unknown => 0u64.hash(state),
            TableShape::Known(shape) => shape.id().hash(state),
        }
    }
}

/// Static type of a value.
///
/// `Table` and `Function` compare by shape id and prototype id.
#[derive(Clone)]
pub enum Type {
    Nil,
    Boolean,
    Integer,
    Float,
    String,
    Table(TableShape),
    Function(Arc<FunctionPrototype>),
    Unknown,
}

impl Type {
    /// Table type for a shape, canonicalized to the shape's current
    /// representative.
    pub fn table(shape: &Arc<ShapeDescriptor>) -> Self {
        Type::Table(TableShape::Known(shape.resolve()))
    }

    pub fn any_table() -> Self {
        Type::Table(TableShape::Unknown)
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Type::Unknown)
    }

    pub fn is_known(&self) -> bool {
        !self.is_unknown()
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Type::Integer | Type::Float)
    }

    /// Shape descriptor, for tables of a known shape.
    pub fn shape(&self) -> Option<&Arc<ShapeDescriptor>> {
        match self {
            Type::Table(shape) => shape.descriptor(),
            _ => None,
        }
    }

    pub fn prototype(&self) -> Option<&Arc<FunctionPrototype>> {
        match self {
            Type::Function(proto) => Some(proto),
            _ => None,
        }
    }

    /// Same type with table shapes re-resolved through any merges that
    /// happened since it was built.
    pub fn canonical(&self) -> Self {
        match self {
            Type::Table(TableShape::Known(shape)) => Type::table(shape),
            other => other.clone(),
        }
    }

    /// Type without references to shapes or prototypes.
    pub fn shallow(&self) -> Self {
        match self {
            Type::Table(_) => Type::any_table(),
            Type::Function(_) => Type::Unknown,
            other => other.clone(),
        }
    }
}

impl PartialEq for Type {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Type::Nil, Type::Nil)
            | (Type::Boolean, Type::Boolean)
            | (Type::Integer, Type::Integer)
            | (Type::Float, Type::Float)
            | (Type::String, Type::String)
            | (Type::Unknown, Type::Unknown) => true,
            (Type::Table(a), Type::Table(b)) => a == b,
            (Type::Function(a), Type::Function(b)) => a.id() == b.id(),
            _ => false,
        }
    }
}

impl Eq for Type {}

impl Hash for Type {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Type::Table(shape) => shape.hash(state),
            Type::Function(proto) => proto.id().hash(state),
            _ => {}
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Nil => write!(f, "Nil"),
            Type::Boolean => write!(f, "Boolean"),
            Type::Integer => write!(f, "Integer"),
            Type::Float => write!(f, "Float"),
            Type::String => write!(f, "String"),
            Type::Table(TableShape::Unknown) => write!(f, "Table"),
            Type::Table(TableShape::Known(shape)) => write!(f, "Table<#{}>", shape.id()),
            Type::Function(proto) => write!(f, "Function<{}#{}>", proto.name(), proto.id()),
            Type::Unknown => write!(f, "Unknown"),
        }
    }
}

impl fmt::Debug for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Debug for TableShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableShape::Unknown => write!(f, "Unknown"),
            TableShape::Known(shape) => write!(f, "Known(#{})", shape.id()),
        }
    }
}

/// Render a type list as `(A, B)`.
pub fn format_types(types: &[Type]) -> String {
    let parts: Vec<String> = types.iter().map(|t| t.to_string()).collect();
    format!("({})", parts.join(", "))
}
