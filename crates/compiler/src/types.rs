//! Type model for the C subset
//!
//! Types are a base type plus a pointer depth. There is no separate array
//! type: array declarators decay to one extra pointer level at parse time,
//! and `short`/`unsigned`/`signed` spellings collapse onto `Int`.

use std::fmt;

/// Base types recognized by the checker and the IR lowering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BaseType {
    Int,
    Char,
    Void,
    Long,
    Float,
    Double,
    /// Named struct type; the name lives in `Type::struct_name`
    Struct,
}

impl fmt::Display for BaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BaseType::Int => "int",
            BaseType::Char => "char",
            BaseType::Void => "void",
            BaseType::Long => "long",
            BaseType::Float => "float",
            BaseType::Double => "double",
            BaseType::Struct => "struct",
        };
        write!(f, "{}", s)
    }
}

/// A C type: base type, pointer depth, and (for structs) the tag name.
///
/// Equality is structural. Struct names participate in equality only when
/// the base type is `Struct`; `struct foo*` and `struct bar*` differ, but
/// two `int**` values always compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Type {
    pub base: BaseType,
    pub pointer_count: usize,
    pub struct_name: Option<String>,
}

impl Type {
    pub fn new(base: BaseType) -> Self {
        Type {
            base,
            pointer_count: 0,
            struct_name: None,
        }
    }

    pub fn pointer_to(base: BaseType, pointer_count: usize) -> Self {
        Type {
            base,
            pointer_count,
            struct_name: None,
        }
    }

    pub fn structure(name: impl Into<String>, pointer_count: usize) -> Self {
        Type {
            base: BaseType::Struct,
            pointer_count,
            struct_name: Some(name.into()),
        }
    }

    pub fn int() -> Self {
        Type::new(BaseType::Int)
    }

    pub fn char_() -> Self {
        Type::new(BaseType::Char)
    }

    pub fn void() -> Self {
        Type::new(BaseType::Void)
    }

    pub fn long() -> Self {
        Type::new(BaseType::Long)
    }

    pub fn double() -> Self {
        Type::new(BaseType::Double)
    }

    /// `char*`, the type of string literals.
    pub fn char_ptr() -> Self {
        Type::pointer_to(BaseType::Char, 1)
    }

    pub fn is_pointer(&self) -> bool {
        self.pointer_count > 0
    }

    pub fn is_void(&self) -> bool {
        self.base == BaseType::Void && self.pointer_count == 0
    }

    /// `void*` converts to and from any pointer type.
    pub fn is_void_pointer(&self) -> bool {
        self.base == BaseType::Void && self.pointer_count > 0
    }

    pub fn is_struct(&self) -> bool {
        self.base == BaseType::Struct && self.pointer_count == 0
    }

    /// Non-pointer arithmetic type (integer or floating).
    pub fn is_numeric(&self) -> bool {
        !self.is_pointer()
            && matches!(
                self.base,
                BaseType::Int | BaseType::Char | BaseType::Long | BaseType::Float | BaseType::Double
            )
    }

    pub fn is_integer(&self) -> bool {
        !self.is_pointer()
            && matches!(self.base, BaseType::Int | BaseType::Char | BaseType::Long)
    }

    pub fn is_float(&self) -> bool {
        !self.is_pointer() && matches!(self.base, BaseType::Float | BaseType::Double)
    }

    /// One level of pointer indirection added (address-of, array declarator).
    pub fn referenced(&self) -> Type {
        let mut t = self.clone();
        t.pointer_count += 1;
        t
    }

    /// One level of pointer indirection removed (dereference, indexing).
    /// Returns `None` when applied to a non-pointer.
    pub fn dereferenced(&self) -> Option<Type> {
        if self.pointer_count == 0 {
            return None;
        }
        let mut t = self.clone();
        t.pointer_count -= 1;
        Some(t)
    }

    /// Size in bytes, used by `sizeof` folding and member layout.
    pub fn size_in_bytes(&self) -> i64 {
        if self.is_pointer() {
            return 8;
        }
        match self.base {
            BaseType::Char => 1,
            BaseType::Int => 4,
            BaseType::Float => 4,
            BaseType::Long => 8,
            BaseType::Double => 8,
            // Struct sizes are not tracked; one slot is the conservative answer
            BaseType::Struct => 8,
            BaseType::Void => 1,
        }
    }

    /// Rank in the usual-arithmetic-conversion lattice:
    /// DOUBLE > FLOAT > LONG > INT (char promotes to int).
    fn promotion_rank(&self) -> u8 {
        match self.base {
            BaseType::Double => 4,
            BaseType::Float => 3,
            BaseType::Long => 2,
            _ => 1,
        }
    }

    /// Result type of binary arithmetic between two numeric operands.
    pub fn promote(lhs: &Type, rhs: &Type) -> Type {
        let winner = if rhs.promotion_rank() > lhs.promotion_rank() {
            rhs
        } else {
            lhs
        };
        match winner.base {
            BaseType::Double => Type::new(BaseType::Double),
            BaseType::Float => Type::new(BaseType::Float),
            BaseType::Long => Type::new(BaseType::Long),
            _ => Type::int(),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.base, &self.struct_name) {
            (BaseType::Struct, Some(name)) => write!(f, "struct {}", name)?,
            (BaseType::Struct, None) => write!(f, "struct")?,
            (base, _) => write!(f, "{}", base)?,
        }
        for _ in 0..self.pointer_count {
            write!(f, "*")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pointer_predicates() {
        let p = Type::pointer_to(BaseType::Int, 2);
        assert!(p.is_pointer());
        assert!(!p.is_numeric());
        assert_eq!(p.dereferenced().unwrap().pointer_count, 1);
        assert_eq!(Type::int().dereferenced(), None);
    }

    #[test]
    fn test_structural_equality_ignores_struct_name_for_scalars() {
        assert_eq!(Type::int(), Type::int());
        assert_ne!(Type::structure("task", 0), Type::structure("file", 0));
        assert_eq!(Type::structure("task", 1), Type::structure("task", 1));
    }

    #[test]
    fn test_promotion_lattice() {
        let d = Type::new(BaseType::Double);
        let f = Type::new(BaseType::Float);
        let l = Type::long();
        let i = Type::int();
        let c = Type::char_();

        assert_eq!(Type::promote(&i, &d).base, BaseType::Double);
        assert_eq!(Type::promote(&f, &l).base, BaseType::Float);
        assert_eq!(Type::promote(&l, &i).base, BaseType::Long);
        assert_eq!(Type::promote(&c, &c).base, BaseType::Int);
    }

    #[test]
    fn test_sizes() {
        assert_eq!(Type::char_().size_in_bytes(), 1);
        assert_eq!(Type::int().size_in_bytes(), 4);
        assert_eq!(Type::long().size_in_bytes(), 8);
        assert_eq!(Type::char_ptr().size_in_bytes(), 8);
    }

    #[test]
    fn test_display() {
        assert_eq!(Type::pointer_to(BaseType::Char, 1).to_string(), "char*");
        assert_eq!(Type::structure("inode", 2).to_string(), "struct inode**");
    }
}
