use std::slice;

use crate::error::{EngineError, EngineResult};
use crate::field::{width_of, FieldType, Role};

/// Position of one field inside an encoded key or counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub field: FieldType,
    pub width: u8,
    pub offset: usize,
}

impl FieldSpec {
    pub fn range(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + usize::from(self.width)
    }
}

/// Ordered, duplicate-free list of fields of a single role. The order
/// given at construction is the encoding order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldList {
    role: Role,
    specs: Vec<FieldSpec>,
    width: usize,
}

impl FieldList {
    /// Build a list using each field's default width.
    pub fn new(role: Role, fields: &[FieldType]) -> EngineResult<Self> {
        let with_defaults: Vec<_> = fields.iter().map(|f| (*f, None)).collect();
        Self::with_widths(role, &with_defaults)
    }

    /// Build a list where custom fields may carry an explicit width.
    /// A repeated field keeps its first position.
    pub fn with_widths(role: Role, fields: &[(FieldType, Option<u8>)]) -> EngineResult<Self> {
        let mut specs: Vec<FieldSpec> = Vec::with_capacity(fields.len());
        let mut offset = 0usize;

        for &(field, custom_width) in fields {
            if field.role() != role {
                return Err(EngineError::FieldRole(field));
            }
            if specs.iter().any(|s| s.field == field) {
                continue;
            }
            let width = width_of(field, custom_width)?;
            specs.push(FieldSpec {
                field,
                width,
                offset,
            });
            offset += usize::from(width);
        }

        if specs.is_empty() {
            return Err(EngineError::EmptyFieldList(role.as_str()));
        }

        Ok(Self {
            role,
            specs,
            width: offset,
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Total encoded width in octets.
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn iter(&self) -> slice::Iter<'_, FieldSpec> {
        self.specs.iter()
    }

    pub fn fields(&self) -> impl Iterator<Item = FieldType> + '_ {
        self.specs.iter().map(|s| s.field)
    }

    pub fn get(&self, index: usize) -> Option<&FieldSpec> {
        self.specs.get(index)
    }

    pub fn spec(&self, field: FieldType) -> Option<&FieldSpec> {
        self.specs.iter().find(|s| s.field == field)
    }

    pub fn contains(&self, field: FieldType) -> bool {
        self.spec(field).is_some()
    }

    /// True when both lists hold the same fields regardless of order
    /// and width.
    pub fn same_fields(&self, other: &FieldList) -> bool {
        self.len() == other.len() && self.fields().all(|f| other.contains(f))
    }
}

impl<'a> IntoIterator for &'a FieldList {
    type Item = &'a FieldSpec;
    type IntoIter = slice::Iter<'a, FieldSpec>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
