//! Builtin function registry
//!
//! The semantic analyzer pre-registers a small set of compiler intrinsics
//! and kernel-style helpers so that source using them passes type
//! checking without declarations. Codegen treats them as ordinary calls;
//! resolving the symbols is the linker's problem.

use crate::symbols::FunctionSignature;
use crate::types::{BaseType, Type};

/// Signature for a pre-registered builtin, or `None` for unknown names.
pub fn builtin_signature(name: &str) -> Option<FunctionSignature> {
    let void_ptr = Type::pointer_to(BaseType::Void, 1);
    let sig = match name {
        "__builtin_expect" => FunctionSignature {
            return_type: Type::long(),
            params: vec![Type::long(), Type::long()],
        },
        "__builtin_memcpy" => FunctionSignature {
            return_type: void_ptr.clone(),
            params: vec![void_ptr.clone(), void_ptr.clone(), Type::long()],
        },
        "__builtin_memset" => FunctionSignature {
            return_type: void_ptr.clone(),
            params: vec![void_ptr.clone(), Type::int(), Type::long()],
        },
        "__builtin_strlen" => FunctionSignature {
            return_type: Type::long(),
            params: vec![Type::char_ptr()],
        },
        "min" | "max" => FunctionSignature {
            return_type: Type::int(),
            params: vec![Type::int(), Type::int()],
        },
        "BIT" => FunctionSignature {
            return_type: Type::int(),
            params: vec![Type::int()],
        },
        _ => return None,
    };
    Some(sig)
}

/// Names the analyzer registers up front.
pub const BUILTIN_NAMES: &[&str] = &[
    "__builtin_expect",
    "__builtin_memcpy",
    "__builtin_memset",
    "__builtin_strlen",
    "min",
    "max",
    "BIT",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_listed_builtin_has_a_signature() {
        for name in BUILTIN_NAMES {
            assert!(builtin_signature(name).is_some(), "missing {}", name);
        }
    }

    #[test]
    fn test_expect_signature() {
        let sig = builtin_signature("__builtin_expect").unwrap();
        assert_eq!(sig.params.len(), 2);
        assert_eq!(sig.return_type, Type::long());
    }

    #[test]
    fn test_unknown_name() {
        assert!(builtin_signature("likely").is_none());
    }
}
